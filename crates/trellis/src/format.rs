//! Vertex attribute formats
//!
//! An attribute is described by a short format string in the style of
//! `"<count><type>[n][i]"`:
//!
//! | code | type  |
//! |------|-------|
//! | `b`  | `i8`  |
//! | `B`  | `u8`  |
//! | `s`  | `i16` |
//! | `S`  | `u16` |
//! | `i`  | `i32` |
//! | `I`  | `u32` |
//! | `f`  | `f32` |
//! | `d`  | `f64` |
//!
//! A trailing `n` marks integer data that the shader reads normalized to
//! `0..1` (or `-1..1`), and a trailing `i` marks a per-instance attribute.
//! `"2f"` is a 2D position, `"4Bn"` an RGBA8 color, `"2fi"` a per-instance
//! translation.

use crate::error::FormatError;
use std::fmt;
use std::str::FromStr;

/// Scalar component type of an attribute
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScalarType {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    F32,
    F64,
}

impl ScalarType {
    /// Size of one component in bytes
    pub const fn size(self) -> usize {
        match self {
            ScalarType::I8 | ScalarType::U8 => 1,
            ScalarType::I16 | ScalarType::U16 => 2,
            ScalarType::I32 | ScalarType::U32 | ScalarType::F32 => 4,
            ScalarType::F64 => 8,
        }
    }

    pub const fn code(self) -> char {
        match self {
            ScalarType::I8 => 'b',
            ScalarType::U8 => 'B',
            ScalarType::I16 => 's',
            ScalarType::U16 => 'S',
            ScalarType::I32 => 'i',
            ScalarType::U32 => 'I',
            ScalarType::F32 => 'f',
            ScalarType::F64 => 'd',
        }
    }

    pub const fn from_code(code: char) -> Option<Self> {
        match code {
            'b' => Some(ScalarType::I8),
            'B' => Some(ScalarType::U8),
            's' => Some(ScalarType::I16),
            'S' => Some(ScalarType::U16),
            'i' => Some(ScalarType::I32),
            'I' => Some(ScalarType::U32),
            'f' => Some(ScalarType::F32),
            'd' => Some(ScalarType::F64),
            _ => None,
        }
    }

    pub const fn is_integer(self) -> bool {
        !matches!(self, ScalarType::F32 | ScalarType::F64)
    }
}

/// Plain-old-data types that can be stored in an attribute
pub trait Scalar: bytemuck::Pod {
    const TYPE: ScalarType;
}

macro_rules! impl_scalar {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(impl Scalar for $ty {
            const TYPE: ScalarType = ScalarType::$variant;
        })*
    };
}

impl_scalar!(
    i8 => I8,
    u8 => U8,
    i16 => I16,
    u16 => U16,
    i32 => I32,
    u32 => U32,
    f32 => F32,
    f64 => F64,
);

/// Layout of one attribute element
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AttributeFormat {
    /// Components per element (1-4)
    pub count: u8,
    pub scalar: ScalarType,
    pub normalized: bool,
    /// One element per instance instead of per vertex
    pub instanced: bool,
}

impl AttributeFormat {
    pub const fn new(count: u8, scalar: ScalarType) -> Self {
        Self {
            count,
            scalar,
            normalized: false,
            instanced: false,
        }
    }

    pub const fn with_normalized(mut self, normalized: bool) -> Self {
        self.normalized = normalized;
        self
    }

    pub const fn with_instanced(mut self, instanced: bool) -> Self {
        self.instanced = instanced;
        self
    }

    /// Bytes per element
    pub const fn stride(&self) -> usize {
        self.count as usize * self.scalar.size()
    }
}

impl FromStr for AttributeFormat {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        let Some(count_char) = chars.next() else {
            return Err(FormatError::Empty(s.to_string()));
        };
        let count = match count_char.to_digit(10) {
            Some(count @ 1..=4) => count as u8,
            _ => return Err(FormatError::BadCount(s.to_string())),
        };

        let Some(type_char) = chars.next() else {
            return Err(FormatError::Empty(s.to_string()));
        };
        let scalar = ScalarType::from_code(type_char).ok_or_else(|| FormatError::UnknownType {
            format: s.to_string(),
            found: type_char,
        })?;

        let mut format = AttributeFormat::new(count, scalar);
        for flag in chars {
            match flag {
                'n' => format.normalized = true,
                'i' => format.instanced = true,
                other => {
                    return Err(FormatError::UnknownFlag {
                        format: s.to_string(),
                        found: other,
                    })
                }
            }
        }
        Ok(format)
    }
}

impl fmt::Display for AttributeFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.count, self.scalar.code())?;
        if self.normalized {
            f.write_str("n")?;
        }
        if self.instanced {
            f.write_str("i")?;
        }
        Ok(())
    }
}

/// A named attribute bound to a shader location.
///
/// Attributes are stored non-interleaved: each one has its own buffer, so the
/// stride is the element size and the offset is always zero.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Attribute {
    pub name: String,
    pub location: u32,
    pub format: AttributeFormat,
    pub stride: usize,
    pub offset: usize,
}

impl Attribute {
    pub fn new(name: impl Into<String>, location: u32, format: AttributeFormat) -> Self {
        Self {
            name: name.into(),
            location,
            stride: format.stride(),
            offset: 0,
            format,
        }
    }

    pub fn component_count(&self) -> usize {
        self.format.count as usize
    }

    pub fn is_instanced(&self) -> bool {
        self.format.instanced
    }
}

/// The ordered set of attributes a domain stores.
///
/// Two signatures are equal when every attribute matches in name, location and
/// format, which is what lets a batch reuse a domain.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct AttributeSignature {
    attributes: Vec<Attribute>,
}

impl AttributeSignature {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a signature from `(name, format)` pairs, assigning locations in order
    ///
    /// ```
    /// use trellis::AttributeSignature;
    ///
    /// let signature = AttributeSignature::parse(&[("position", "2f"), ("colors", "4Bn")]).unwrap();
    /// assert_eq!(signature.get("colors").unwrap().location, 1);
    /// ```
    pub fn parse(attributes: &[(&str, &str)]) -> Result<Self, FormatError> {
        let mut signature = Self::new();
        for (location, (name, format)) in attributes.iter().enumerate() {
            signature.add(*name, location as u32, format.parse()?)?;
        }
        Ok(signature)
    }

    pub fn add(
        &mut self,
        name: impl Into<String>,
        location: u32,
        format: AttributeFormat,
    ) -> Result<(), FormatError> {
        let name = name.into();
        if self.get(&name).is_some() {
            return Err(FormatError::DuplicateAttribute(name));
        }
        self.attributes.push(Attribute::new(name, location, format));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Attribute> {
        self.attributes.iter()
    }

    pub fn per_vertex(&self) -> impl Iterator<Item = &Attribute> {
        self.attributes.iter().filter(|a| !a.is_instanced())
    }

    pub fn per_instance(&self) -> impl Iterator<Item = &Attribute> {
        self.attributes.iter().filter(|a| a.is_instanced())
    }

    pub fn has_instanced(&self) -> bool {
        self.attributes.iter().any(Attribute::is_instanced)
    }

    /// Attribute names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.attributes.iter().map(|a| a.name.clone()).collect();
        names.sort();
        names
    }

    /// Whether both signatures store the same names with the same formats.
    ///
    /// Locations may differ; data can be copied between such domains byte for byte.
    pub fn is_compatible(&self, other: &AttributeSignature) -> bool {
        self.attributes.len() == other.attributes.len()
            && self.attributes.iter().all(|a| {
                other
                    .get(&a.name)
                    .is_some_and(|b| b.format == a.format)
            })
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }
}

/// Borrowed attribute values of any scalar type
#[derive(Clone, Copy, Debug)]
pub struct AttributeData<'a> {
    scalar: ScalarType,
    len: usize,
    bytes: &'a [u8],
}

impl<'a> AttributeData<'a> {
    pub fn new<T: Scalar>(values: &'a [T]) -> Self {
        Self {
            scalar: T::TYPE,
            len: values.len(),
            bytes: bytemuck::cast_slice(values),
        }
    }

    pub fn scalar_type(&self) -> ScalarType {
        self.scalar
    }

    /// Number of scalar values
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Check that this data fits `count` elements of `attribute`
    pub(crate) fn check(
        &self,
        attribute: &Attribute,
        count: usize,
    ) -> Result<(), crate::DomainError> {
        if self.scalar != attribute.format.scalar {
            return Err(crate::DomainError::ScalarTypeMismatch {
                name: attribute.name.clone(),
                expected: attribute.format.scalar,
                actual: self.scalar,
            });
        }
        let expected = count * attribute.component_count();
        if self.len != expected {
            return Err(crate::DomainError::DataLengthMismatch {
                name: attribute.name.clone(),
                expected,
                actual: self.len,
            });
        }
        Ok(())
    }
}

impl<'a, T: Scalar> From<&'a [T]> for AttributeData<'a> {
    fn from(values: &'a [T]) -> Self {
        Self::new(values)
    }
}

impl<'a, T: Scalar, const N: usize> From<&'a [T; N]> for AttributeData<'a> {
    fn from(values: &'a [T; N]) -> Self {
        Self::new(values.as_slice())
    }
}

impl<'a, T: Scalar> From<&'a Vec<T>> for AttributeData<'a> {
    fn from(values: &'a Vec<T>) -> Self {
        Self::new(values.as_slice())
    }
}

/// Decode tightly packed scalars from an unaligned byte slice
pub(crate) fn read_scalars<T: Scalar>(bytes: &[u8]) -> Vec<T> {
    bytes
        .chunks_exact(std::mem::size_of::<T>())
        .map(bytemuck::pod_read_unaligned)
        .collect()
}
