//! Mapping trellis descriptions onto wgpu types

use trellis::{
    AttributeFormat, BlendFactor, CompareFunc, CullFace, DrawMode, IndexType, ScalarType,
};

/// Vertex format for an attribute, if wgpu can fetch it
pub fn vertex_format(format: &AttributeFormat) -> Option<wgpu::VertexFormat> {
    use wgpu::VertexFormat as F;
    use ScalarType as S;

    let normalized = format.normalized;
    let vertex_format = match (format.scalar, format.count, normalized) {
        (S::U8, 1, false) => F::Uint8,
        (S::U8, 2, false) => F::Uint8x2,
        (S::U8, 4, false) => F::Uint8x4,
        (S::U8, 1, true) => F::Unorm8,
        (S::U8, 2, true) => F::Unorm8x2,
        (S::U8, 4, true) => F::Unorm8x4,
        (S::I8, 1, false) => F::Sint8,
        (S::I8, 2, false) => F::Sint8x2,
        (S::I8, 4, false) => F::Sint8x4,
        (S::I8, 1, true) => F::Snorm8,
        (S::I8, 2, true) => F::Snorm8x2,
        (S::I8, 4, true) => F::Snorm8x4,
        (S::U16, 1, false) => F::Uint16,
        (S::U16, 2, false) => F::Uint16x2,
        (S::U16, 4, false) => F::Uint16x4,
        (S::U16, 1, true) => F::Unorm16,
        (S::U16, 2, true) => F::Unorm16x2,
        (S::U16, 4, true) => F::Unorm16x4,
        (S::I16, 1, false) => F::Sint16,
        (S::I16, 2, false) => F::Sint16x2,
        (S::I16, 4, false) => F::Sint16x4,
        (S::I16, 1, true) => F::Snorm16,
        (S::I16, 2, true) => F::Snorm16x2,
        (S::I16, 4, true) => F::Snorm16x4,
        (S::U32, 1, false) => F::Uint32,
        (S::U32, 2, false) => F::Uint32x2,
        (S::U32, 3, false) => F::Uint32x3,
        (S::U32, 4, false) => F::Uint32x4,
        (S::I32, 1, false) => F::Sint32,
        (S::I32, 2, false) => F::Sint32x2,
        (S::I32, 3, false) => F::Sint32x3,
        (S::I32, 4, false) => F::Sint32x4,
        (S::F32, 1, _) => F::Float32,
        (S::F32, 2, _) => F::Float32x2,
        (S::F32, 3, _) => F::Float32x3,
        (S::F32, 4, _) => F::Float32x4,
        (S::F64, 1, _) => F::Float64,
        (S::F64, 2, _) => F::Float64x2,
        (S::F64, 3, _) => F::Float64x3,
        (S::F64, 4, _) => F::Float64x4,
        _ => return None,
    };
    Some(vertex_format)
}

/// Primitive topology for a draw mode. Fans have no wgpu equivalent.
pub fn topology(mode: DrawMode) -> Option<wgpu::PrimitiveTopology> {
    match mode {
        DrawMode::Points => Some(wgpu::PrimitiveTopology::PointList),
        DrawMode::Lines => Some(wgpu::PrimitiveTopology::LineList),
        DrawMode::LineStrip => Some(wgpu::PrimitiveTopology::LineStrip),
        DrawMode::Triangles => Some(wgpu::PrimitiveTopology::TriangleList),
        DrawMode::TriangleStrip => Some(wgpu::PrimitiveTopology::TriangleStrip),
        DrawMode::TriangleFan => None,
    }
}

/// Index format; wgpu has no 8-bit indices
pub fn index_format(index_type: IndexType) -> Option<wgpu::IndexFormat> {
    match index_type {
        IndexType::U8 => None,
        IndexType::U16 => Some(wgpu::IndexFormat::Uint16),
        IndexType::U32 => Some(wgpu::IndexFormat::Uint32),
    }
}

pub fn blend_factor(factor: BlendFactor) -> wgpu::BlendFactor {
    match factor {
        BlendFactor::Zero => wgpu::BlendFactor::Zero,
        BlendFactor::One => wgpu::BlendFactor::One,
        BlendFactor::SrcColor => wgpu::BlendFactor::Src,
        BlendFactor::OneMinusSrcColor => wgpu::BlendFactor::OneMinusSrc,
        BlendFactor::DstColor => wgpu::BlendFactor::Dst,
        BlendFactor::OneMinusDstColor => wgpu::BlendFactor::OneMinusDst,
        BlendFactor::SrcAlpha => wgpu::BlendFactor::SrcAlpha,
        BlendFactor::OneMinusSrcAlpha => wgpu::BlendFactor::OneMinusSrcAlpha,
        BlendFactor::DstAlpha => wgpu::BlendFactor::DstAlpha,
        BlendFactor::OneMinusDstAlpha => wgpu::BlendFactor::OneMinusDstAlpha,
    }
}

/// Same factors for color and alpha, additive
pub fn blend_state(src: BlendFactor, dst: BlendFactor) -> wgpu::BlendState {
    let component = wgpu::BlendComponent {
        src_factor: blend_factor(src),
        dst_factor: blend_factor(dst),
        operation: wgpu::BlendOperation::Add,
    };
    wgpu::BlendState {
        color: component,
        alpha: component,
    }
}

pub fn compare_function(func: CompareFunc) -> wgpu::CompareFunction {
    match func {
        CompareFunc::Never => wgpu::CompareFunction::Never,
        CompareFunc::Less => wgpu::CompareFunction::Less,
        CompareFunc::Equal => wgpu::CompareFunction::Equal,
        CompareFunc::LessEqual => wgpu::CompareFunction::LessEqual,
        CompareFunc::Greater => wgpu::CompareFunction::Greater,
        CompareFunc::NotEqual => wgpu::CompareFunction::NotEqual,
        CompareFunc::GreaterEqual => wgpu::CompareFunction::GreaterEqual,
        CompareFunc::Always => wgpu::CompareFunction::Always,
    }
}

pub fn cull_face(face: CullFace) -> wgpu::Face {
    match face {
        CullFace::Front => wgpu::Face::Front,
        CullFace::Back => wgpu::Face::Back,
    }
}

/// Round `value` up to a multiple of `alignment` (a power of two)
pub const fn align_up(value: u64, alignment: u64) -> u64 {
    (value + alignment - 1) & !(alignment - 1)
}

pub const fn align_down(value: u64, alignment: u64) -> u64 {
    value & !(alignment - 1)
}
