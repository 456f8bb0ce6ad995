//! The graphics device seam
//!
//! Everything below this trait (OpenGL, wgpu, a test recorder) is a
//! collaborator. Domains and batches only ever create and fill buffers, bind a
//! vertex layout, toggle render state and issue draw calls through it.

use crate::format::AttributeFormat;
use crate::state::State;

/// Opaque id of a device buffer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(pub u64);

/// How often a buffer is expected to change
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    Static,
    #[default]
    Dynamic,
    Stream,
}

/// What a buffer holds, so backends can pick the right usage flags
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferKind {
    Vertex,
    Index,
}

/// Primitive assembly mode
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DrawMode {
    Points,
    Lines,
    LineStrip,
    #[default]
    Triangles,
    TriangleStrip,
    TriangleFan,
}

/// Integer type stored in index buffers
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum IndexType {
    U8,
    U16,
    #[default]
    U32,
}

impl IndexType {
    pub const fn size(self) -> usize {
        match self {
            IndexType::U8 => 1,
            IndexType::U16 => 2,
            IndexType::U32 => 4,
        }
    }

    pub const fn max_value(self) -> u64 {
        match self {
            IndexType::U8 => u8::MAX as u64,
            IndexType::U16 => u16::MAX as u64,
            IndexType::U32 => u32::MAX as u64,
        }
    }

    pub(crate) fn encode(self, value: u32, out: &mut [u8]) {
        match self {
            IndexType::U8 => out[0] = value as u8,
            IndexType::U16 => out.copy_from_slice(&(value as u16).to_le_bytes()),
            IndexType::U32 => out.copy_from_slice(&value.to_le_bytes()),
        }
    }

    pub(crate) fn decode(self, bytes: &[u8]) -> u32 {
        match self {
            IndexType::U8 => u32::from(bytes[0]),
            IndexType::U16 => u32::from(u16::from_le_bytes([bytes[0], bytes[1]])),
            IndexType::U32 => u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        }
    }
}

/// What the device can do
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceCapabilities {
    /// Largest buffer the device accepts, in bytes
    pub max_buffer_size: usize,
    /// `draw_multi*` is a single native call rather than a loop
    pub multi_draw: bool,
    /// Indexed draws accept a base vertex
    pub base_vertex: bool,
}

impl Default for DeviceCapabilities {
    fn default() -> Self {
        Self {
            max_buffer_size: 256 << 20,
            multi_draw: true,
            base_vertex: true,
        }
    }
}

/// One attribute pointer of a bound layout
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VertexBinding {
    pub buffer: BufferHandle,
    pub name: String,
    pub location: u32,
    pub format: AttributeFormat,
    pub stride: usize,
    pub offset: usize,
}

impl VertexBinding {
    pub fn per_instance(&self) -> bool {
        self.format.instanced
    }
}

/// Everything a device needs to fetch vertices for a domain
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VertexLayout {
    pub bindings: Vec<VertexBinding>,
    pub index: Option<(BufferHandle, IndexType)>,
}

impl VertexLayout {
    /// Stable identity of the layout, the first bound buffer
    pub fn key(&self) -> Option<BufferHandle> {
        self.bindings.first().map(|b| b.buffer)
    }
}

/// The capabilities the core consumes from a graphics API.
///
/// Index ranges passed to indexed draws are in index elements, not bytes.
/// When the device does not support base vertices, the core always passes a
/// base vertex of zero and stores absolute indices instead.
pub trait GraphicsDevice {
    fn capabilities(&self) -> DeviceCapabilities;

    fn create_buffer(&mut self, byte_size: usize, kind: BufferKind, usage: BufferUsage)
        -> BufferHandle;

    fn upload(&mut self, buffer: BufferHandle, byte_offset: usize, data: &[u8]);

    /// Must preserve the first `min(old, new)` bytes
    fn resize_buffer(&mut self, buffer: BufferHandle, new_byte_size: usize);

    fn destroy_buffer(&mut self, buffer: BufferHandle);

    fn bind_vertex_layout(&mut self, layout: &VertexLayout);

    fn draw(&mut self, mode: DrawMode, start: u32, count: u32);

    fn draw_indexed(&mut self, mode: DrawMode, index_start: u32, index_count: u32, base_vertex: i32);

    fn draw_instanced(&mut self, mode: DrawMode, start: u32, count: u32, instance_count: u32);

    fn draw_indexed_instanced(
        &mut self,
        mode: DrawMode,
        index_start: u32,
        index_count: u32,
        base_vertex: i32,
        instance_count: u32,
    );

    /// Draw several vertex ranges in one call. Defaults to a loop.
    fn draw_multi(&mut self, mode: DrawMode, starts: &[u32], counts: &[u32]) {
        for (&start, &count) in starts.iter().zip(counts) {
            self.draw(mode, start, count);
        }
    }

    /// Draw several index ranges in one call. Defaults to a loop.
    fn draw_multi_indexed(
        &mut self,
        mode: DrawMode,
        index_starts: &[u32],
        index_counts: &[u32],
        base_vertices: &[i32],
    ) {
        for ((&start, &count), &base) in index_starts.iter().zip(index_counts).zip(base_vertices) {
            self.draw_indexed(mode, start, count, base);
        }
    }

    fn set_state(&mut self, state: &State);

    fn unset_state(&mut self, state: &State);
}
