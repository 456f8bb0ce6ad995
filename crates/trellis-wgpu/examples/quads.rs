//! Quads example
//!
//! One batch with three kinds of geometry:
//! - indexed, alpha-blended background tiles;
//! - a spinning quad rewritten every frame through a cached attribute region,
//!   clipped by a scissor group;
//! - instanced quads whose per-instance offsets move every frame.
//!
//! Run with `PROFILE=1` (or press F) to print frame timings and draw counts.

mod shared;

use glam::Vec4;
use rand::Rng;
use shared::{run_example, ExampleApp};
use trellis::{
    AttributeData, AttributeRegion, AttributeSignature, Batch, DrawMode, GraphicsDevice, Group,
    Instance, PixelRect, State, VertexList,
};
use trellis_wgpu::{ProgramDescriptor, WgpuDevice};

const PLAIN_PROGRAM: u32 = 1;
const INSTANCED_PROGRAM: u32 = 2;

const QUAD_INDICES: [u32; 6] = [0, 1, 2, 2, 3, 0];

/// Corners of an axis-aligned quad, counter-clockwise from bottom-left
fn quad_positions(cx: f32, cy: f32, half: f32) -> [f32; 8] {
    [
        cx - half,
        cy - half,
        cx + half,
        cy - half,
        cx + half,
        cy + half,
        cx - half,
        cy + half,
    ]
}

/// Two triangles covering a quad rotated by `angle`
fn spinner_positions(angle: f32, half: f32) -> [f32; 12] {
    let (sin, cos) = angle.sin_cos();
    let corner = |x: f32, y: f32| [x * cos - y * sin, x * sin + y * cos];
    let [a, b, c, d] = [
        corner(-half, -half),
        corner(half, -half),
        corner(half, half),
        corner(-half, half),
    ];
    [
        a[0], a[1], b[0], b[1], c[0], c[1], c[0], c[1], d[0], d[1], a[0], a[1],
    ]
}

fn solid_color(rgba: [u8; 4], vertices: usize) -> Vec<u8> {
    rgba.iter().copied().cycle().take(vertices * 4).collect()
}

struct QuadsApp {
    batch: Batch,
    _tiles: Vec<VertexList>,
    spinner: VertexList,
    spinner_region: AttributeRegion,
    _sprite: VertexList,
    instances: Vec<(Instance, [f32; 2])>,
    time: f32,
}

impl ExampleApp for QuadsApp {
    fn new(renderer: &mut WgpuDevice, device: &wgpu::Device, _queue: &wgpu::Queue) -> Self {
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Quads Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/quads.wgsl").into()),
        });
        for (id, vertex_entry) in [(PLAIN_PROGRAM, "vs_plain"), (INSTANCED_PROGRAM, "vs_instanced")] {
            renderer.register_program(
                id,
                ProgramDescriptor {
                    module: module.clone(),
                    vertex_entry: vertex_entry.to_string(),
                    fragment_entry: "fs_main".to_string(),
                    texture_units: 0,
                    uniforms: vec![("tint".to_string(), 0)],
                },
            );
        }

        let mut batch = Batch::for_device(&renderer.capabilities());
        let mut rng = rand::rng();

        let plain = AttributeSignature::parse(&[("position", "2f"), ("color", "4Bn")]).unwrap();
        let instanced =
            AttributeSignature::parse(&[("position", "2f"), ("color", "4Bn"), ("offset", "2fi")])
                .unwrap();

        let scene = Group::root(
            0,
            vec![State::shader(PLAIN_PROGRAM), State::uniform("tint", Vec4::ONE)],
        );
        let tiles_group = scene.child(0, vec![State::alpha_blend()]);
        let clipped = scene.child(1, vec![State::Scissor(PixelRect::new(200, 150, 400, 300))]);
        let sprites = Group::root(
            1,
            vec![
                State::shader(INSTANCED_PROGRAM),
                State::uniform("tint", Vec4::new(1.0, 0.9, 0.8, 1.0)),
                State::alpha_blend(),
            ],
        );

        let mut tiles = Vec::new();
        for row in 0..4 {
            for column in 0..6 {
                let cx = -0.75 + column as f32 * 0.3;
                let cy = -0.6 + row as f32 * 0.4;
                let rgba = [rng.random(), rng.random(), rng.random(), 160];
                let tile = batch
                    .vertex_list_indexed(
                        4,
                        DrawMode::Triangles,
                        &tiles_group,
                        &QUAD_INDICES,
                        &plain,
                        &[
                            ("position", AttributeData::from(&quad_positions(cx, cy, 0.12))),
                            ("color", AttributeData::from(&solid_color(rgba, 4))),
                        ],
                    )
                    .expect("tile");
                tiles.push(tile);
            }
        }

        let spinner = batch
            .vertex_list(
                6,
                DrawMode::Triangles,
                &clipped,
                &plain,
                &[("color", AttributeData::from(&solid_color([250, 179, 135, 255], 6)))],
            )
            .expect("spinner");
        let spinner_region = spinner.attribute_region("position").expect("region");

        let sprite_corners: [f32; 8] = [-0.04, -0.04, 0.04, -0.04, -0.04, 0.04, 0.04, 0.04];
        let mut sprite = batch
            .vertex_list(
                4,
                DrawMode::TriangleStrip,
                &sprites,
                &instanced,
                &[
                    ("position", AttributeData::from(&sprite_corners)),
                    ("color", AttributeData::from(&solid_color([166, 227, 161, 255], 4))),
                ],
            )
            .expect("sprite");

        let instances = (0..24)
            .map(|i| {
                let base = [-0.9 + i as f32 * 0.078, 0.85];
                let instance = sprite
                    .create_instance(&[("offset", AttributeData::from(&base))])
                    .expect("instance");
                (instance, base)
            })
            .collect();

        Self {
            batch,
            _tiles: tiles,
            spinner,
            spinner_region,
            _sprite: sprite,
            instances,
            time: 0.0,
        }
    }

    fn update(&mut self, dt: f32) {
        self.time += dt;

        let positions = spinner_positions(self.time, 0.5);
        if let Err(err) = self
            .spinner
            .write_region(&mut self.spinner_region, &positions)
        {
            log::error!("spinner update failed: {err}");
        }

        for (i, (instance, base)) in self.instances.iter_mut().enumerate() {
            let offset = [base[0], base[1] - 0.05 * (self.time * 2.0 + i as f32 * 0.4).sin().abs()];
            if let Err(err) = instance.set_attribute_data("offset", &offset) {
                log::error!("instance update failed: {err}");
            }
        }
    }

    fn batch(&mut self) -> &mut Batch {
        &mut self.batch
    }

    fn window_title() -> &'static str {
        "Trellis Quads"
    }
}

fn main() {
    run_example::<QuadsApp>();
}
