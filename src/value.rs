//! Typed values: a small closed set of scalar types, plus fixed-length
//! arrays of them, standing in for a tagged union over application memory.
//!
//! Instead of pairing a type tag with a raw pointer into application state,
//! the tag and the storage are collapsed into a single tagged variant, and
//! the live value is reached through an `Arc<Mutex<Value>>` that both the
//! attaching thread and the session thread hold a handle to.

use std::sync::{Arc, Mutex};

use crate::error::CodecError;

/// Maximum number of elements in an array-valued [`Value`] ("dimension").
pub const MAX_DIM: usize = 16;

/// The maximum length of a `Str` scalar, wire-quoted on encode.
pub const MAX_STR_LEN: usize = 64;

/// A bounded string used for `Str`-tagged values.
pub type ValueString = heapless::String<MAX_STR_LEN>;

/// A scalar's type tag, with its on-wire name and numeric printability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    I32,
    I16,
    I8,
    U32,
    U16,
    U8,
    F32,
    F64,
    Bool,
    Str,
}

impl Tag {
    /// The on-wire tag name used in the `{t:<tag>,v:<value>}` parameter form.
    /// Note the asymmetry: `F32` wires as `"f64"` and `F64` wires as `"double"`.
    pub fn wire_name(self) -> &'static str {
        match self {
            Tag::I32 => "i32",
            Tag::I16 => "i16",
            Tag::I8 => "i8",
            Tag::U32 => "u32",
            Tag::U16 => "u16",
            Tag::U8 => "u8",
            Tag::F32 => "f64",
            Tag::F64 => "double",
            Tag::Bool => "bool",
            Tag::Str => "str",
        }
    }

    /// Parse a wire tag name back into a [`Tag`].
    pub fn from_wire_name(name: &str) -> Option<Self> {
        Some(match name {
            "i32" => Tag::I32,
            "i16" => Tag::I16,
            "i8" => Tag::I8,
            "u32" => Tag::U32,
            "u16" => Tag::U16,
            "u8" => Tag::U8,
            "f64" => Tag::F32,
            "double" => Tag::F64,
            "bool" => Tag::Bool,
            "str" => Tag::Str,
            _ => return None,
        })
    }

    /// Whether the tag is numeric (renders as a bare decimal, not quoted/literal).
    pub fn is_numeric(self) -> bool {
        !matches!(self, Tag::Bool | Tag::Str)
    }
}

/// A single scalar of one of the tagged types.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    I32(i32),
    I16(i16),
    I8(i8),
    U32(u32),
    U16(u16),
    U8(u8),
    F32(f32),
    F64(f64),
    Bool(bool),
    Str(ValueString),
}

impl Scalar {
    pub fn tag(&self) -> Tag {
        match self {
            Scalar::I32(_) => Tag::I32,
            Scalar::I16(_) => Tag::I16,
            Scalar::I8(_) => Tag::I8,
            Scalar::U32(_) => Tag::U32,
            Scalar::U16(_) => Tag::U16,
            Scalar::U8(_) => Tag::U8,
            Scalar::F32(_) => Tag::F32,
            Scalar::F64(_) => Tag::F64,
            Scalar::Bool(_) => Tag::Bool,
            Scalar::Str(_) => Tag::Str,
        }
    }
}

/// A scalar or a fixed-length array of scalars, all of the same [`Tag`].
///
/// `dimension() > 1` renders as a `[v1,v2,...]` array on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Scalar(Scalar),
    Array(heapless::Vec<Scalar, MAX_DIM>),
}

impl Value {
    pub fn tag(&self) -> Tag {
        match self {
            Value::Scalar(s) => s.tag(),
            Value::Array(v) => v.first().map(Scalar::tag).unwrap_or(Tag::I32),
        }
    }

    pub fn dimension(&self) -> usize {
        match self {
            Value::Scalar(_) => 1,
            Value::Array(v) => v.len(),
        }
    }

    /// Validate that `self` matches the schema's declared `(tag, dim)`.
    pub fn matches_schema(&self, tag: Tag, dim: usize) -> bool {
        if self.dimension() != dim {
            return false;
        }
        match self {
            Value::Scalar(s) => s.tag() == tag,
            Value::Array(v) => v.iter().all(|s| s.tag() == tag),
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Scalar(Scalar::I32(v))
    }
}
impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Scalar(Scalar::U32(v))
    }
}
impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Scalar(Scalar::Bool(v))
    }
}
impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Scalar(Scalar::F64(v))
    }
}

/// Shared handle to a value living in application memory.
///
/// Both the attaching thread and the session thread (which reads the value
/// while encoding a publish, or writes it after a validated parameter
/// update) hold a clone of this handle.
#[derive(Clone)]
pub struct ValueCell(Arc<Mutex<Value>>);

impl ValueCell {
    pub fn new(initial: Value) -> Self {
        Self(Arc::new(Mutex::new(initial)))
    }

    pub fn get(&self) -> Value {
        self.0.lock().unwrap().clone()
    }

    /// Overwrite the cell, rejecting a value whose tag/dimension disagrees
    /// with `tag`/`dim`.
    pub fn set(&self, tag: Tag, dim: usize, value: Value) -> Result<(), CodecError> {
        if !value.matches_schema(tag, dim) {
            return Err(CodecError::TypeMismatch);
        }
        *self.0.lock().unwrap() = value;
        Ok(())
    }
}

impl core::fmt::Debug for ValueCell {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "ValueCell({:?})", self.0.lock().unwrap())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_round_trip() {
        for tag in [
            Tag::I32,
            Tag::I16,
            Tag::I8,
            Tag::U32,
            Tag::U16,
            Tag::U8,
            Tag::F32,
            Tag::F64,
            Tag::Bool,
            Tag::Str,
        ] {
            assert_eq!(Tag::from_wire_name(tag.wire_name()), Some(tag));
        }
    }

    #[test]
    fn cell_rejects_type_mismatch() {
        let cell = ValueCell::new(Value::from(10u32));
        assert!(cell.set(Tag::U32, 1, Value::from(true)).is_err());
        assert!(cell.set(Tag::U32, 1, Value::from(20u32)).is_ok());
    }
}
