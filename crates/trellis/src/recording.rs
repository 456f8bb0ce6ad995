//! An in-memory [`GraphicsDevice`] that records every call
//!
//! `RecordingDevice` keeps a byte-exact copy of each buffer it was asked to
//! create, tracks the effective render state the way a real driver would, and
//! expands every draw into the vertex indices it touched. It backs the test
//! suite and is handy for headless inspection of what a batch would submit.

use crate::device::{
    BufferHandle, BufferKind, BufferUsage, DeviceCapabilities, DrawMode, GraphicsDevice,
    VertexLayout,
};
use crate::state::{State, StateKey};
use std::collections::{BTreeMap, HashMap};

/// One recorded device call
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeviceCall {
    CreateBuffer {
        buffer: BufferHandle,
        size: usize,
        kind: BufferKind,
        usage: BufferUsage,
    },
    Upload {
        buffer: BufferHandle,
        offset: usize,
        len: usize,
    },
    ResizeBuffer {
        buffer: BufferHandle,
        size: usize,
    },
    DestroyBuffer {
        buffer: BufferHandle,
    },
    BindVertexLayout {
        key: Option<BufferHandle>,
    },
    Draw {
        mode: DrawMode,
        start: u32,
        count: u32,
    },
    DrawIndexed {
        mode: DrawMode,
        index_start: u32,
        index_count: u32,
        base_vertex: i32,
    },
    DrawInstanced {
        mode: DrawMode,
        start: u32,
        count: u32,
        instance_count: u32,
    },
    DrawIndexedInstanced {
        mode: DrawMode,
        index_start: u32,
        index_count: u32,
        base_vertex: i32,
        instance_count: u32,
    },
    DrawMulti {
        mode: DrawMode,
        starts: Vec<u32>,
        counts: Vec<u32>,
    },
    DrawMultiIndexed {
        mode: DrawMode,
        index_starts: Vec<u32>,
        index_counts: Vec<u32>,
        base_vertices: Vec<i32>,
    },
    SetState(State),
    UnsetState(State),
}

impl DeviceCall {
    pub fn is_draw(&self) -> bool {
        matches!(
            self,
            DeviceCall::Draw { .. }
                | DeviceCall::DrawIndexed { .. }
                | DeviceCall::DrawInstanced { .. }
                | DeviceCall::DrawIndexedInstanced { .. }
                | DeviceCall::DrawMulti { .. }
                | DeviceCall::DrawMultiIndexed { .. }
        )
    }

    pub fn is_state_change(&self) -> bool {
        matches!(self, DeviceCall::SetState(_) | DeviceCall::UnsetState(_))
    }
}

/// What one draw call touched, under which state
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DrawnPrimitives {
    /// Effective state at the time of the draw, ordered by key
    pub state: Vec<State>,
    /// Identity of the bound layout
    pub layout: Option<BufferHandle>,
    pub mode: DrawMode,
    /// Vertex indices fetched, in submission order
    pub vertices: Vec<u32>,
    pub instances: u32,
}

/// Mock device recording calls and simulating buffer contents and state
#[derive(Debug, Default)]
pub struct RecordingDevice {
    capabilities: DeviceCapabilities,
    next_handle: u64,
    buffers: HashMap<BufferHandle, Vec<u8>>,
    calls: Vec<DeviceCall>,
    active: BTreeMap<StateKey, State>,
    layout: Option<VertexLayout>,
    drawn: Vec<DrawnPrimitives>,
    uploads: usize,
}

impl RecordingDevice {
    pub fn new(capabilities: DeviceCapabilities) -> Self {
        Self {
            capabilities,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> &[DeviceCall] {
        &self.calls
    }

    /// Forget recorded calls and draws. Buffers and state are kept.
    pub fn clear_calls(&mut self) {
        self.calls.clear();
        self.drawn.clear();
    }

    pub fn draw_calls(&self) -> Vec<&DeviceCall> {
        self.calls.iter().filter(|c| c.is_draw()).collect()
    }

    /// Draw and state calls only, in order
    pub fn render_calls(&self) -> Vec<&DeviceCall> {
        self.calls
            .iter()
            .filter(|c| c.is_draw() || c.is_state_change())
            .collect()
    }

    /// Uploads performed since creation
    pub fn upload_count(&self) -> usize {
        self.uploads
    }

    pub fn buffer_contents(&self, buffer: BufferHandle) -> Option<&[u8]> {
        self.buffers.get(&buffer).map(Vec::as_slice)
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    /// Effective state, ordered by key
    pub fn active_state(&self) -> Vec<State> {
        self.active.values().cloned().collect()
    }

    pub fn drawn(&self) -> &[DrawnPrimitives] {
        &self.drawn
    }

    fn record_draw(&mut self, mode: DrawMode, vertices: Vec<u32>, instances: u32) {
        self.drawn.push(DrawnPrimitives {
            state: self.active_state(),
            layout: self.layout.as_ref().and_then(VertexLayout::key),
            mode,
            vertices,
            instances,
        });
    }

    fn resolve_indices(&self, index_start: u32, index_count: u32, base_vertex: i32) -> Vec<u32> {
        let Some((buffer, index_type)) = self.layout.as_ref().and_then(|l| l.index) else {
            return Vec::new();
        };
        let Some(bytes) = self.buffers.get(&buffer) else {
            return Vec::new();
        };
        let size = index_type.size();
        (index_start..index_start + index_count)
            .map(|i| {
                let offset = i as usize * size;
                let index = index_type.decode(&bytes[offset..offset + size]);
                (index as i64 + base_vertex as i64) as u32
            })
            .collect()
    }
}

impl GraphicsDevice for RecordingDevice {
    fn capabilities(&self) -> DeviceCapabilities {
        self.capabilities
    }

    fn create_buffer(
        &mut self,
        byte_size: usize,
        kind: BufferKind,
        usage: BufferUsage,
    ) -> BufferHandle {
        self.next_handle += 1;
        let buffer = BufferHandle(self.next_handle);
        self.buffers.insert(buffer, vec![0; byte_size]);
        self.calls.push(DeviceCall::CreateBuffer {
            buffer,
            size: byte_size,
            kind,
            usage,
        });
        buffer
    }

    fn upload(&mut self, buffer: BufferHandle, byte_offset: usize, data: &[u8]) {
        if let Some(bytes) = self.buffers.get_mut(&buffer) {
            bytes[byte_offset..byte_offset + data.len()].copy_from_slice(data);
        }
        self.uploads += 1;
        self.calls.push(DeviceCall::Upload {
            buffer,
            offset: byte_offset,
            len: data.len(),
        });
    }

    fn resize_buffer(&mut self, buffer: BufferHandle, new_byte_size: usize) {
        if let Some(bytes) = self.buffers.get_mut(&buffer) {
            bytes.resize(new_byte_size, 0);
        }
        self.calls.push(DeviceCall::ResizeBuffer {
            buffer,
            size: new_byte_size,
        });
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.buffers.remove(&buffer);
        self.calls.push(DeviceCall::DestroyBuffer { buffer });
    }

    fn bind_vertex_layout(&mut self, layout: &VertexLayout) {
        self.calls
            .push(DeviceCall::BindVertexLayout { key: layout.key() });
        self.layout = Some(layout.clone());
    }

    fn draw(&mut self, mode: DrawMode, start: u32, count: u32) {
        self.calls.push(DeviceCall::Draw { mode, start, count });
        self.record_draw(mode, (start..start + count).collect(), 1);
    }

    fn draw_indexed(&mut self, mode: DrawMode, index_start: u32, index_count: u32, base_vertex: i32) {
        self.calls.push(DeviceCall::DrawIndexed {
            mode,
            index_start,
            index_count,
            base_vertex,
        });
        let vertices = self.resolve_indices(index_start, index_count, base_vertex);
        self.record_draw(mode, vertices, 1);
    }

    fn draw_instanced(&mut self, mode: DrawMode, start: u32, count: u32, instance_count: u32) {
        self.calls.push(DeviceCall::DrawInstanced {
            mode,
            start,
            count,
            instance_count,
        });
        self.record_draw(mode, (start..start + count).collect(), instance_count);
    }

    fn draw_indexed_instanced(
        &mut self,
        mode: DrawMode,
        index_start: u32,
        index_count: u32,
        base_vertex: i32,
        instance_count: u32,
    ) {
        self.calls.push(DeviceCall::DrawIndexedInstanced {
            mode,
            index_start,
            index_count,
            base_vertex,
            instance_count,
        });
        let vertices = self.resolve_indices(index_start, index_count, base_vertex);
        self.record_draw(mode, vertices, instance_count);
    }

    fn draw_multi(&mut self, mode: DrawMode, starts: &[u32], counts: &[u32]) {
        if !self.capabilities.multi_draw {
            for (&start, &count) in starts.iter().zip(counts) {
                self.draw(mode, start, count);
            }
            return;
        }
        self.calls.push(DeviceCall::DrawMulti {
            mode,
            starts: starts.to_vec(),
            counts: counts.to_vec(),
        });
        let vertices = starts
            .iter()
            .zip(counts)
            .flat_map(|(&start, &count)| start..start + count)
            .collect();
        self.record_draw(mode, vertices, 1);
    }

    fn draw_multi_indexed(
        &mut self,
        mode: DrawMode,
        index_starts: &[u32],
        index_counts: &[u32],
        base_vertices: &[i32],
    ) {
        if !self.capabilities.multi_draw {
            for ((&start, &count), &base) in index_starts.iter().zip(index_counts).zip(base_vertices)
            {
                self.draw_indexed(mode, start, count, base);
            }
            return;
        }
        self.calls.push(DeviceCall::DrawMultiIndexed {
            mode,
            index_starts: index_starts.to_vec(),
            index_counts: index_counts.to_vec(),
            base_vertices: base_vertices.to_vec(),
        });
        let mut vertices = Vec::new();
        for ((&start, &count), &base) in index_starts.iter().zip(index_counts).zip(base_vertices) {
            vertices.extend(self.resolve_indices(start, count, base));
        }
        self.record_draw(mode, vertices, 1);
    }

    fn set_state(&mut self, state: &State) {
        self.active.insert(state.key(), state.clone());
        self.calls.push(DeviceCall::SetState(state.clone()));
    }

    fn unset_state(&mut self, state: &State) {
        self.active.remove(&state.key());
        self.calls.push(DeviceCall::UnsetState(state.clone()));
    }
}
