//! The effective render state a draw is recorded under

use std::collections::BTreeMap;
use trellis::{BlendFactor, CompareFunc, CullFace, PixelRect, State, UniformValue};

#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct RenderState {
    pub program: Option<u32>,
    pub blend: Option<(BlendFactor, BlendFactor)>,
    pub depth: Option<CompareFunc>,
    pub cull: Option<CullFace>,
    pub scissor: Option<PixelRect>,
    pub viewport: Option<PixelRect>,
    /// Texture id per unit
    pub textures: BTreeMap<u32, u32>,
    pub uniforms: BTreeMap<String, UniformValue>,
}

impl RenderState {
    pub fn apply(&mut self, state: &State) {
        match state {
            State::Shader { program } => {
                if self.program != Some(*program) {
                    // Uniform values belong to the program they were written to
                    self.uniforms.clear();
                }
                self.program = Some(*program);
            }
            State::Texture { unit, texture, .. } => {
                self.textures.insert(*unit, *texture);
            }
            State::Blend { src, dst } => self.blend = Some((*src, *dst)),
            State::Scissor(rect) => self.scissor = Some(*rect),
            State::Viewport(rect) => self.viewport = Some(*rect),
            State::DepthTest(func) => self.depth = Some(*func),
            State::Cull(face) => self.cull = Some(*face),
            State::Uniform { name, value } => {
                self.uniforms.insert(name.clone(), *value);
            }
        }
    }

    pub fn revert(&mut self, state: &State) {
        match state {
            State::Shader { .. } => {
                self.program = None;
                self.uniforms.clear();
            }
            State::Texture { unit, .. } => {
                self.textures.remove(unit);
            }
            State::Blend { .. } => self.blend = None,
            State::Scissor(_) => self.scissor = None,
            State::Viewport(_) => self.viewport = None,
            State::DepthTest(_) => self.depth = None,
            State::Cull(_) => self.cull = None,
            State::Uniform { .. } => {}
        }
    }
}

/// Clip `rect` to a target of `size`, as a wgpu scissor rectangle
pub(crate) fn clip_rect(rect: PixelRect, size: [u32; 2]) -> (u32, u32, u32, u32) {
    let x0 = rect.x.clamp(0, size[0] as i32) as u32;
    let y0 = rect.y.clamp(0, size[1] as i32) as u32;
    let x1 = (i64::from(rect.x) + i64::from(rect.width)).clamp(0, i64::from(size[0])) as u32;
    let y1 = (i64::from(rect.y) + i64::from(rect.height)).clamp(0, i64::from(size[1])) as u32;
    (x0, y0, x1.saturating_sub(x0), y1.saturating_sub(y0))
}
