//! Render state carried by groups
//!
//! A [`State`] is one piece of device state a group needs while its vertices
//! are drawn: a texture binding, a shader program, a blend mode, a scissor
//! rect, a uniform value, and so on. States are plain values so groups that
//! declare the same states compare equal and can share draw calls.
//!
//! Every state has a [`StateKey`]. A child group's state overrides its
//! parent's state with the same key, and the batch scheduler diffs composed
//! states by key to emit only the calls that actually change something.

use std::hash::{Hash, Hasher};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TextureTarget {
    #[default]
    Texture2D,
    Texture2DArray,
    Texture3D,
    CubeMap,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    Zero,
    One,
    SrcColor,
    OneMinusSrcColor,
    DstColor,
    OneMinusDstColor,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstAlpha,
    OneMinusDstAlpha,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CompareFunc {
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CullFace {
    Front,
    Back,
}

/// Pixel rectangle for scissor and viewport states
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct PixelRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// A uniform value.
///
/// Equality and hashing are bitwise so that uniform states can be used as
/// hash keys (a NaN uniform equals itself).
#[derive(Clone, Copy, Debug)]
pub enum UniformValue {
    Float(f32),
    Int(i32),
    UInt(u32),
    Vec2(glam::Vec2),
    Vec3(glam::Vec3),
    Vec4(glam::Vec4),
    Mat4(glam::Mat4),
}

impl UniformValue {
    /// Raw little-endian bytes, tightly packed
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            UniformValue::Float(v) => v.to_le_bytes().to_vec(),
            UniformValue::Int(v) => v.to_le_bytes().to_vec(),
            UniformValue::UInt(v) => v.to_le_bytes().to_vec(),
            UniformValue::Vec2(v) => bytemuck::cast_slice::<f32, u8>(&v.to_array()).to_vec(),
            UniformValue::Vec3(v) => bytemuck::cast_slice::<f32, u8>(&v.to_array()).to_vec(),
            UniformValue::Vec4(v) => bytemuck::cast_slice::<f32, u8>(&v.to_array()).to_vec(),
            UniformValue::Mat4(m) => bytemuck::cast_slice::<f32, u8>(&m.to_cols_array()).to_vec(),
        }
    }

    fn discriminant(&self) -> u8 {
        match self {
            UniformValue::Float(_) => 0,
            UniformValue::Int(_) => 1,
            UniformValue::UInt(_) => 2,
            UniformValue::Vec2(_) => 3,
            UniformValue::Vec3(_) => 4,
            UniformValue::Vec4(_) => 5,
            UniformValue::Mat4(_) => 6,
        }
    }
}

impl PartialEq for UniformValue {
    fn eq(&self, other: &Self) -> bool {
        self.discriminant() == other.discriminant() && self.to_bytes() == other.to_bytes()
    }
}

impl Eq for UniformValue {}

impl Hash for UniformValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.discriminant().hash(state);
        self.to_bytes().hash(state);
    }
}

impl From<f32> for UniformValue {
    fn from(v: f32) -> Self {
        UniformValue::Float(v)
    }
}

impl From<i32> for UniformValue {
    fn from(v: i32) -> Self {
        UniformValue::Int(v)
    }
}

impl From<u32> for UniformValue {
    fn from(v: u32) -> Self {
        UniformValue::UInt(v)
    }
}

impl From<glam::Vec2> for UniformValue {
    fn from(v: glam::Vec2) -> Self {
        UniformValue::Vec2(v)
    }
}

impl From<glam::Vec3> for UniformValue {
    fn from(v: glam::Vec3) -> Self {
        UniformValue::Vec3(v)
    }
}

impl From<glam::Vec4> for UniformValue {
    fn from(v: glam::Vec4) -> Self {
        UniformValue::Vec4(v)
    }
}

impl From<glam::Mat4> for UniformValue {
    fn from(m: glam::Mat4) -> Self {
        UniformValue::Mat4(m)
    }
}

/// A piece of device state
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum State {
    Shader {
        program: u32,
    },
    Texture {
        unit: u32,
        target: TextureTarget,
        texture: u32,
    },
    Blend {
        src: BlendFactor,
        dst: BlendFactor,
    },
    Scissor(PixelRect),
    Viewport(PixelRect),
    DepthTest(CompareFunc),
    Cull(CullFace),
    Uniform {
        name: String,
        value: UniformValue,
    },
}

/// What a state overrides when groups are nested
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StateKey {
    Shader,
    Texture(u32),
    Blend,
    Scissor,
    Viewport,
    DepthTest,
    Cull,
    Uniform(String),
}

impl State {
    pub const fn shader(program: u32) -> Self {
        State::Shader { program }
    }

    /// A 2D texture bound to `unit`
    pub const fn texture(unit: u32, texture: u32) -> Self {
        State::Texture {
            unit,
            target: TextureTarget::Texture2D,
            texture,
        }
    }

    pub const fn blend(src: BlendFactor, dst: BlendFactor) -> Self {
        State::Blend { src, dst }
    }

    /// Standard premultiplied-free alpha blending
    pub const fn alpha_blend() -> Self {
        State::Blend {
            src: BlendFactor::SrcAlpha,
            dst: BlendFactor::OneMinusSrcAlpha,
        }
    }

    pub fn uniform(name: impl Into<String>, value: impl Into<UniformValue>) -> Self {
        State::Uniform {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn key(&self) -> StateKey {
        match self {
            State::Shader { .. } => StateKey::Shader,
            State::Texture { unit, .. } => StateKey::Texture(*unit),
            State::Blend { .. } => StateKey::Blend,
            State::Scissor(_) => StateKey::Scissor,
            State::Viewport(_) => StateKey::Viewport,
            State::DepthTest(_) => StateKey::DepthTest,
            State::Cull(_) => StateKey::Cull,
            State::Uniform { name, .. } => StateKey::Uniform(name.clone()),
        }
    }

    /// Whether leaving this state needs a device call.
    ///
    /// A uniform write has nothing to restore.
    pub fn unsets(&self) -> bool {
        !matches!(self, State::Uniform { .. })
    }
}

/// Calls that move the device from one composed state to another
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StateDiff {
    /// States to revert, innermost first
    pub unset: Vec<State>,
    /// States to apply, in declaration order
    pub set: Vec<State>,
}

impl StateDiff {
    pub fn is_empty(&self) -> bool {
        self.unset.is_empty() && self.set.is_empty()
    }
}

/// An ordered list of states with at most one state per key
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ComposedState {
    states: Vec<State>,
}

impl ComposedState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn states(&self) -> &[State] {
        &self.states
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn get(&self, key: &StateKey) -> Option<&State> {
        self.states.iter().find(|s| &s.key() == key)
    }

    /// Override this state with `own`, key by key.
    ///
    /// An overriding state keeps the position of the state it replaces; new
    /// keys are appended.
    pub fn compose(&self, own: &[State]) -> ComposedState {
        let mut states = self.states.clone();
        for state in own {
            let key = state.key();
            match states.iter_mut().find(|s| s.key() == key) {
                Some(existing) => *existing = state.clone(),
                None => states.push(state.clone()),
            }
        }
        ComposedState { states }
    }

    /// Calls needed to go from `self` (active) to `target`.
    ///
    /// States present in both with equal values produce no call. A different
    /// value for the same key is rebound without an unset. When the shader
    /// changes every uniform of the target is written again, since uniform
    /// values belong to a program.
    pub fn diff(&self, target: &ComposedState) -> StateDiff {
        let shader_changed = self.get(&StateKey::Shader) != target.get(&StateKey::Shader);

        let unset = self
            .states
            .iter()
            .rev()
            .filter(|s| s.unsets() && target.get(&s.key()).is_none())
            .cloned()
            .collect();

        let set = target
            .states
            .iter()
            .filter(|s| {
                let rewrite_uniform = shader_changed && !s.unsets();
                rewrite_uniform || self.get(&s.key()) != Some(*s)
            })
            .cloned()
            .collect();

        StateDiff { unset, set }
    }

    /// Calls that revert everything this state applied
    pub fn teardown(&self) -> Vec<State> {
        self.states
            .iter()
            .rev()
            .filter(|s| s.unsets())
            .cloned()
            .collect()
    }
}
