//! # trellis-wgpu
//!
//! WGPU backend for trellis.
//!
//! [`WgpuDevice`] implements [`GraphicsDevice`]: buffer calls go straight to
//! the queue, while state changes and draws are recorded as commands and
//! replayed into a render pass by [`WgpuDevice::render`]. Each recorded draw
//! captures the pipeline it needs (program, topology, blend, cull and vertex
//! layout), its texture bind groups, scissor, viewport and a slot in a
//! dynamic-offset uniform buffer.
//!
//! Programs and textures are registered up front under the ids that
//! `State::Shader` and `State::Texture` refer to.

mod convert;
mod render_state;
mod uniforms;

pub use convert::*;

use render_state::{clip_rect, RenderState};
use std::collections::HashMap;
use std::num::NonZeroU64;
use std::ops::Range;
use trellis::{
    BlendFactor, BufferHandle, BufferKind, BufferUsage, CullFace, DeviceCapabilities, DrawMode,
    GraphicsDevice, PixelRect, State, VertexLayout, WithBuilders,
};
use uniforms::{pack_uniforms, UniformArena};

/// Configuration of a [`WgpuDevice`]
#[derive(Clone, Debug, PartialEq, WithBuilders)]
pub struct WgpuDeviceConfig {
    /// Prefix for every wgpu object label
    #[with_builders(into)]
    pub label_prefix: String,
    /// Format of the render targets passed to [`WgpuDevice::render`]
    pub target_format: wgpu::TextureFormat,
    /// Dynamic offset alignment of the uniform buffer
    pub uniform_block_alignment: u64,
    /// Bytes of uniform data available to one draw
    pub uniform_block_size: u64,
    pub initial_uniform_arena_size: u64,
}

impl Default for WgpuDeviceConfig {
    fn default() -> Self {
        Self {
            label_prefix: "Trellis".to_string(),
            target_format: wgpu::TextureFormat::Bgra8UnormSrgb,
            uniform_block_alignment: 256,
            uniform_block_size: 256,
            initial_uniform_arena_size: 64 * 1024,
        }
    }
}

/// A shader program that `State::Shader` can select
pub struct ProgramDescriptor {
    pub module: wgpu::ShaderModule,
    pub vertex_entry: String,
    pub fragment_entry: String,
    /// Texture units the program samples; unit `n` is bind group `n + 1`
    pub texture_units: u32,
    /// Byte offset of each uniform in the program's uniform block (bind group 0)
    pub uniforms: Vec<(String, u64)>,
}

struct Program {
    descriptor: ProgramDescriptor,
    pipeline_layout: wgpu::PipelineLayout,
}

struct GpuBuffer {
    buffer: wgpu::Buffer,
    /// Copy of the contents, so unaligned uploads can be widened to 4 bytes
    shadow: Vec<u8>,
    kind: BufferKind,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct VertexBufferKey {
    stride: u64,
    step_mode: wgpu::VertexStepMode,
    location: u32,
    offset: u64,
    format: wgpu::VertexFormat,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct PipelineKey {
    program: u32,
    topology: wgpu::PrimitiveTopology,
    strip_index_format: Option<wgpu::IndexFormat>,
    blend: Option<(BlendFactor, BlendFactor)>,
    cull: Option<CullFace>,
    buffers: Vec<VertexBufferKey>,
}

#[derive(Clone, Debug)]
enum DrawCall {
    Vertices {
        vertices: Range<u32>,
        instances: Range<u32>,
    },
    Indexed {
        indices: Range<u32>,
        base_vertex: i32,
        instances: Range<u32>,
    },
}

/// A draw with everything needed to replay it
#[derive(Clone, Debug)]
struct DrawCommand {
    pipeline: usize,
    vertex_buffers: Vec<BufferHandle>,
    index: Option<(BufferHandle, wgpu::IndexFormat)>,
    /// Texture id per unit, in unit order
    textures: Vec<u32>,
    uniform_offset: u32,
    scissor: Option<PixelRect>,
    viewport: Option<PixelRect>,
    call: DrawCall,
}

/// [`GraphicsDevice`] on top of a wgpu device and queue
pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: WgpuDeviceConfig,
    capabilities: DeviceCapabilities,
    target_size: [u32; 2],

    next_buffer: u64,
    buffers: HashMap<BufferHandle, GpuBuffer>,

    programs: HashMap<u32, Program>,
    textures: HashMap<u32, wgpu::BindGroup>,
    uniform_layout: wgpu::BindGroupLayout,
    texture_layout: wgpu::BindGroupLayout,

    uniform_buffer: wgpu::Buffer,
    uniform_bind_group: wgpu::BindGroup,
    uniform_capacity: u64,
    arena: UniformArena,

    pipeline_ids: HashMap<PipelineKey, usize>,
    pipelines: Vec<wgpu::RenderPipeline>,

    state: RenderState,
    layout: Option<VertexLayout>,
    commands: Vec<DrawCommand>,
    warned_depth: bool,
}

impl WgpuDevice {
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue, config: WgpuDeviceConfig) -> Self {
        let arena = UniformArena::new(config.uniform_block_size, config.uniform_block_alignment);
        let prefix = config.label_prefix.clone();

        let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(&format!("{prefix} Uniform Bind Group Layout")),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: NonZeroU64::new(arena.block_size()),
                },
                count: None,
            }],
        });

        let texture_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(&format!("{prefix} Texture Bind Group Layout")),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let uniform_capacity = config
            .initial_uniform_arena_size
            .max(arena.block_size())
            .next_power_of_two();
        let (uniform_buffer, uniform_bind_group) =
            create_uniform_buffer(device, &uniform_layout, &prefix, uniform_capacity, arena.block_size());

        let max_buffer_size = device.limits().max_buffer_size;
        let capabilities = DeviceCapabilities {
            max_buffer_size: usize::try_from(max_buffer_size).unwrap_or(usize::MAX),
            multi_draw: false,
            base_vertex: true,
        };

        Self {
            device: device.clone(),
            queue: queue.clone(),
            config,
            capabilities,
            target_size: [1, 1],
            next_buffer: 0,
            buffers: HashMap::new(),
            programs: HashMap::new(),
            textures: HashMap::new(),
            uniform_layout,
            texture_layout,
            uniform_buffer,
            uniform_bind_group,
            uniform_capacity,
            arena,
            pipeline_ids: HashMap::new(),
            pipelines: Vec::new(),
            state: RenderState::default(),
            layout: None,
            commands: Vec::new(),
            warned_depth: false,
        }
    }

    pub fn config(&self) -> &WgpuDeviceConfig {
        &self.config
    }

    /// Size of the render target, used for the default scissor and viewport
    pub fn set_target_size(&mut self, width: u32, height: u32) {
        self.target_size = [width.max(1), height.max(1)];
    }

    /// Draws recorded since the last [`render`](Self::render)
    pub fn command_count(&self) -> usize {
        self.commands.len()
    }

    /// Make `program` available as `State::shader(id)`, replacing any program
    /// registered under the same id
    pub fn register_program(&mut self, id: u32, program: ProgramDescriptor) {
        let mut bind_group_layouts = vec![&self.uniform_layout];
        bind_group_layouts.extend((0..program.texture_units).map(|_| &self.texture_layout));

        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(&format!("{} Program {id} Pipeline Layout", self.config.label_prefix)),
                bind_group_layouts: &bind_group_layouts,
                immediate_size: 0,
            });

        self.pipeline_ids.retain(|key, _| key.program != id);
        self.programs.insert(
            id,
            Program {
                descriptor: program,
                pipeline_layout,
            },
        );
    }

    /// Make a texture available as `State::texture(unit, id)`
    pub fn register_texture(&mut self, id: u32, view: &wgpu::TextureView, sampler: &wgpu::Sampler) {
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&format!("{} Texture {id} Bind Group", self.config.label_prefix)),
            layout: &self.texture_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(sampler),
                },
            ],
        });
        self.textures.insert(id, bind_group);
    }

    fn pipeline(&mut self, key: PipelineKey) -> Option<usize> {
        if let Some(&index) = self.pipeline_ids.get(&key) {
            return Some(index);
        }
        let Some(program) = self.programs.get(&key.program) else {
            log::warn!("draw with unregistered program {}", key.program);
            return None;
        };

        let attributes: Vec<[wgpu::VertexAttribute; 1]> = key
            .buffers
            .iter()
            .map(|buffer| {
                [wgpu::VertexAttribute {
                    format: buffer.format,
                    offset: buffer.offset,
                    shader_location: buffer.location,
                }]
            })
            .collect();
        let buffers: Vec<wgpu::VertexBufferLayout> = key
            .buffers
            .iter()
            .zip(&attributes)
            .map(|(buffer, attributes)| wgpu::VertexBufferLayout {
                array_stride: buffer.stride,
                step_mode: buffer.step_mode,
                attributes,
            })
            .collect();

        let descriptor = &program.descriptor;
        let pipeline = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(&format!(
                    "{} Program {} Pipeline {}",
                    self.config.label_prefix,
                    key.program,
                    self.pipelines.len()
                )),
                layout: Some(&program.pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &descriptor.module,
                    entry_point: Some(&descriptor.vertex_entry),
                    buffers: &buffers,
                    compilation_options: Default::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &descriptor.module,
                    entry_point: Some(&descriptor.fragment_entry),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: self.config.target_format,
                        blend: key.blend.map(|(src, dst)| blend_state(src, dst)),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: Default::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology: key.topology,
                    strip_index_format: key.strip_index_format,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode: key.cull.map(cull_face),
                    polygon_mode: wgpu::PolygonMode::Fill,
                    unclipped_depth: false,
                    conservative: false,
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview_mask: None,
                cache: None,
            });

        log::debug!(
            "created pipeline {} for program {} ({:?}, {} vertex buffers)",
            self.pipelines.len(),
            key.program,
            key.topology,
            key.buffers.len()
        );
        let index = self.pipelines.len();
        self.pipelines.push(pipeline);
        self.pipeline_ids.insert(key, index);
        Some(index)
    }

    fn record(&mut self, mode: DrawMode, call: DrawCall) {
        let Some(program_id) = self.state.program else {
            log::warn!("draw without a bound shader program");
            return;
        };
        let Some(topology) = topology(mode) else {
            log::warn!("{mode:?} has no wgpu primitive topology");
            return;
        };
        let Some(layout) = self.layout.clone() else {
            log::warn!("draw without a bound vertex layout");
            return;
        };
        if self.state.depth.is_some() && !self.warned_depth {
            log::warn!("depth testing requested but the device renders without a depth target");
            self.warned_depth = true;
        }

        let index = match (&call, layout.index) {
            (DrawCall::Vertices { .. }, _) => None,
            (DrawCall::Indexed { .. }, Some((buffer, index_type))) => match index_format(index_type) {
                Some(format) => Some((buffer, format)),
                None => {
                    log::warn!("{index_type:?} indices cannot be drawn with wgpu");
                    return;
                }
            },
            (DrawCall::Indexed { .. }, None) => {
                log::warn!("indexed draw without an index buffer");
                return;
            }
        };

        let mut buffers = Vec::with_capacity(layout.bindings.len());
        for binding in &layout.bindings {
            let Some(format) = vertex_format(&binding.format) else {
                log::warn!(
                    "attribute `{}` has a format wgpu cannot fetch: {}",
                    binding.name,
                    binding.format
                );
                return;
            };
            buffers.push(VertexBufferKey {
                stride: binding.stride as u64,
                step_mode: if binding.per_instance() {
                    wgpu::VertexStepMode::Instance
                } else {
                    wgpu::VertexStepMode::Vertex
                },
                location: binding.location,
                offset: binding.offset as u64,
                format,
            });
        }

        let strips = matches!(
            topology,
            wgpu::PrimitiveTopology::LineStrip | wgpu::PrimitiveTopology::TriangleStrip
        );
        let key = PipelineKey {
            program: program_id,
            topology,
            strip_index_format: index.filter(|_| strips).map(|(_, format)| format),
            blend: self.state.blend,
            cull: self.state.cull,
            buffers,
        };
        let Some(pipeline) = self.pipeline(key) else {
            return;
        };

        let Some(program) = self.programs.get(&program_id) else {
            return;
        };
        let mut textures = Vec::with_capacity(program.descriptor.texture_units as usize);
        for unit in 0..program.descriptor.texture_units {
            match self.state.textures.get(&unit) {
                Some(&texture) if self.textures.contains_key(&texture) => textures.push(texture),
                _ => {
                    log::warn!("program {program_id} samples texture unit {unit}, which has no registered texture bound");
                    return;
                }
            }
        }

        let block = pack_uniforms(
            &program.descriptor.uniforms,
            &self.state.uniforms,
            self.arena.block_size(),
        );
        let uniform_offset = self.arena.push(block);

        self.commands.push(DrawCommand {
            pipeline,
            vertex_buffers: layout.bindings.iter().map(|binding| binding.buffer).collect(),
            index,
            textures,
            uniform_offset,
            scissor: self.state.scissor,
            viewport: self.state.viewport,
            call,
        });
    }

    fn upload_uniforms(&mut self) {
        let len = self.arena.bytes().len() as u64;
        if len == 0 {
            return;
        }
        if len > self.uniform_capacity {
            self.uniform_capacity = (len * 2).next_power_of_two();
            let (buffer, bind_group) = create_uniform_buffer(
                &self.device,
                &self.uniform_layout,
                &self.config.label_prefix,
                self.uniform_capacity,
                self.arena.block_size(),
            );
            self.uniform_buffer.destroy();
            self.uniform_buffer = buffer;
            self.uniform_bind_group = bind_group;
            log::debug!("uniform buffer grew to {} bytes", self.uniform_capacity);
        }
        self.queue
            .write_buffer(&self.uniform_buffer, 0, self.arena.bytes());
    }

    /// Replay every recorded draw into a render pass on `target`, then clear
    /// the recording.
    pub fn render(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        target: &wgpu::TextureView,
        load: wgpu::LoadOp<wgpu::Color>,
    ) {
        self.upload_uniforms();
        let commands = std::mem::take(&mut self.commands);
        let full = PixelRect::new(0, 0, self.target_size[0], self.target_size[1]);

        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(&format!("{} Render Pass", self.config.label_prefix)),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: target,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load,
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });

            // Track the bound pipeline to avoid redundant switches
            let mut current_pipeline = None;

            for command in &commands {
                let Some(vertex_buffers) = command
                    .vertex_buffers
                    .iter()
                    .map(|handle| self.buffers.get(handle))
                    .collect::<Option<Vec<_>>>()
                else {
                    log::warn!("skipping a draw whose vertex buffers were destroyed");
                    continue;
                };

                let (x, y, width, height) =
                    clip_rect(command.scissor.unwrap_or(full), self.target_size);
                if width == 0 || height == 0 {
                    continue;
                }

                if current_pipeline != Some(command.pipeline) {
                    render_pass.set_pipeline(&self.pipelines[command.pipeline]);
                    current_pipeline = Some(command.pipeline);
                }
                render_pass.set_bind_group(0, &self.uniform_bind_group, &[command.uniform_offset]);
                for (unit, texture) in command.textures.iter().enumerate() {
                    if let Some(bind_group) = self.textures.get(texture) {
                        render_pass.set_bind_group(unit as u32 + 1, bind_group, &[]);
                    }
                }
                for (slot, buffer) in vertex_buffers.iter().enumerate() {
                    render_pass.set_vertex_buffer(slot as u32, buffer.buffer.slice(..));
                }

                render_pass.set_scissor_rect(x, y, width, height);
                let (vx, vy, vw, vh) =
                    clip_rect(command.viewport.unwrap_or(full), self.target_size);
                render_pass.set_viewport(vx as f32, vy as f32, vw.max(1) as f32, vh.max(1) as f32, 0.0, 1.0);

                match &command.call {
                    DrawCall::Vertices {
                        vertices,
                        instances,
                    } => render_pass.draw(vertices.clone(), instances.clone()),
                    DrawCall::Indexed {
                        indices,
                        base_vertex,
                        instances,
                    } => {
                        let Some((handle, format)) = command.index else {
                            continue;
                        };
                        let Some(index_buffer) = self.buffers.get(&handle) else {
                            log::warn!("skipping a draw whose index buffer was destroyed");
                            continue;
                        };
                        render_pass.set_index_buffer(index_buffer.buffer.slice(..), format);
                        render_pass.draw_indexed(indices.clone(), *base_vertex, instances.clone());
                    }
                }
            }
        }

        self.arena.clear();
    }
}

fn create_uniform_buffer(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    prefix: &str,
    capacity: u64,
    block_size: u64,
) -> (wgpu::Buffer, wgpu::BindGroup) {
    let buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(&format!("{prefix} Uniform Buffer")),
        size: capacity,
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(&format!("{prefix} Uniform Bind Group")),
        layout,
        entries: &[wgpu::BindGroupEntry {
            binding: 0,
            resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                buffer: &buffer,
                offset: 0,
                size: NonZeroU64::new(block_size),
            }),
        }],
    });
    (buffer, bind_group)
}

fn buffer_usages(kind: BufferKind) -> wgpu::BufferUsages {
    let base = wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC;
    match kind {
        BufferKind::Vertex => base | wgpu::BufferUsages::VERTEX,
        BufferKind::Index => base | wgpu::BufferUsages::INDEX,
    }
}

impl GraphicsDevice for WgpuDevice {
    fn capabilities(&self) -> DeviceCapabilities {
        self.capabilities
    }

    fn create_buffer(&mut self, byte_size: usize, kind: BufferKind, usage: BufferUsage) -> BufferHandle {
        self.next_buffer += 1;
        let handle = BufferHandle(self.next_buffer);
        let size = align_up(byte_size.max(4) as u64, wgpu::COPY_BUFFER_ALIGNMENT);
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&format!(
                "{} {kind:?} Buffer {} ({usage:?})",
                self.config.label_prefix, handle.0
            )),
            size,
            usage: buffer_usages(kind),
            mapped_at_creation: false,
        });
        self.buffers.insert(
            handle,
            GpuBuffer {
                buffer,
                shadow: vec![0; size as usize],
                kind,
            },
        );
        handle
    }

    fn upload(&mut self, buffer: BufferHandle, byte_offset: usize, data: &[u8]) {
        let Some(gpu) = self.buffers.get_mut(&buffer) else {
            log::warn!("upload to unknown buffer {buffer:?}");
            return;
        };
        let end = byte_offset + data.len();
        let Some(target) = gpu.shadow.get_mut(byte_offset..end) else {
            log::warn!("upload of {} bytes at {byte_offset} overruns buffer {buffer:?}", data.len());
            return;
        };
        target.copy_from_slice(data);

        let start = align_down(byte_offset as u64, wgpu::COPY_BUFFER_ALIGNMENT) as usize;
        let end = (align_up(end as u64, wgpu::COPY_BUFFER_ALIGNMENT) as usize).min(gpu.shadow.len());
        if start < end {
            self.queue
                .write_buffer(&gpu.buffer, start as u64, &gpu.shadow[start..end]);
        }
    }

    fn resize_buffer(&mut self, buffer: BufferHandle, new_byte_size: usize) {
        let Some(gpu) = self.buffers.get_mut(&buffer) else {
            log::warn!("resize of unknown buffer {buffer:?}");
            return;
        };
        let size = align_up(new_byte_size.max(4) as u64, wgpu::COPY_BUFFER_ALIGNMENT);
        let resized = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&format!(
                "{} {:?} Buffer {}",
                self.config.label_prefix, gpu.kind, buffer.0
            )),
            size,
            usage: buffer_usages(gpu.kind),
            mapped_at_creation: false,
        });

        // Copy on the GPU; pending queue writes to the old buffer land first
        let copy_size = size.min(gpu.buffer.size());
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some(&format!("{} Buffer Resize Encoder", self.config.label_prefix)),
            });
        encoder.copy_buffer_to_buffer(&gpu.buffer, 0, &resized, 0, copy_size);
        self.queue.submit(std::iter::once(encoder.finish()));

        gpu.buffer.destroy();
        gpu.buffer = resized;
        gpu.shadow.resize(size as usize, 0);
        log::debug!("resized buffer {buffer:?} to {size} bytes");
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        if let Some(gpu) = self.buffers.remove(&buffer) {
            gpu.buffer.destroy();
        }
    }

    fn bind_vertex_layout(&mut self, layout: &VertexLayout) {
        self.layout = Some(layout.clone());
    }

    fn draw(&mut self, mode: DrawMode, start: u32, count: u32) {
        self.record(
            mode,
            DrawCall::Vertices {
                vertices: start..start + count,
                instances: 0..1,
            },
        );
    }

    fn draw_indexed(&mut self, mode: DrawMode, index_start: u32, index_count: u32, base_vertex: i32) {
        self.record(
            mode,
            DrawCall::Indexed {
                indices: index_start..index_start + index_count,
                base_vertex,
                instances: 0..1,
            },
        );
    }

    fn draw_instanced(&mut self, mode: DrawMode, start: u32, count: u32, instance_count: u32) {
        self.record(
            mode,
            DrawCall::Vertices {
                vertices: start..start + count,
                instances: 0..instance_count,
            },
        );
    }

    fn draw_indexed_instanced(
        &mut self,
        mode: DrawMode,
        index_start: u32,
        index_count: u32,
        base_vertex: i32,
        instance_count: u32,
    ) {
        self.record(
            mode,
            DrawCall::Indexed {
                indices: index_start..index_start + index_count,
                base_vertex,
                instances: 0..instance_count,
            },
        );
    }

    fn set_state(&mut self, state: &State) {
        match state {
            State::Shader { program } if !self.programs.contains_key(program) => {
                log::warn!("shader state names unregistered program {program}");
            }
            State::Texture { texture, .. } if !self.textures.contains_key(texture) => {
                log::warn!("texture state names unregistered texture {texture}");
            }
            _ => {}
        }
        self.state.apply(state);
    }

    fn unset_state(&mut self, state: &State) {
        self.state.revert(state);
    }
}
