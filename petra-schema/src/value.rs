//! Dynamic value model: what the generic codec produces for classes it has
//! no compiled type for.
//!
//! A [`Record`] is an ordered field list (wire order) with by-name lookup;
//! nested objects are `Record`s all the way down. Values are exactly the
//! shapes a [`StreamerElement`](crate::desc::ElementShape) can describe.

use crate::codec;
use crate::desc::BasicType;
use crate::obj::{Object, Streamed};
use crate::registry::Registry;
use petra_core::cursor::{ReadCursor, WriteCursor};
use petra_core::error::{Error, Result};
use std::any::Any;

/// One decoded value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    Str(String),
    /// Fixed, variable, or container runs alike.
    Array(Vec<Value>),
    /// Nested object.
    Object(Record),
    /// Nullable nested object.
    ObjectPtr(Option<Box<Record>>),
}

impl Value {
    /// The basic type of a scalar value, if it is one.
    pub fn basic_type(&self) -> Option<BasicType> {
        Some(match self {
            Value::Bool(_) => BasicType::Bool,
            Value::I8(_) => BasicType::I8,
            Value::I16(_) => BasicType::I16,
            Value::I32(_) => BasicType::I32,
            Value::I64(_) => BasicType::I64,
            Value::U8(_) => BasicType::U8,
            Value::U16(_) => BasicType::U16,
            Value::U32(_) => BasicType::U32,
            Value::U64(_) => BasicType::U64,
            Value::F32(_) => BasicType::F32,
            Value::F64(_) => BasicType::F64,
            _ => return None,
        })
    }

    /// Interpret an integer scalar as an unsigned count (for count members
    /// and count leaves). Negative values are rejected.
    pub fn as_count(&self) -> Option<u64> {
        match *self {
            Value::I8(v) => u64::try_from(v).ok(),
            Value::I16(v) => u64::try_from(v).ok(),
            Value::I32(v) => u64::try_from(v).ok(),
            Value::I64(v) => u64::try_from(v).ok(),
            Value::U8(v) => Some(v as u64),
            Value::U16(v) => Some(v as u64),
            Value::U32(v) => Some(v as u64),
            Value::U64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(vs) => Some(vs),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Value::Object(r) => Some(r),
            _ => None,
        }
    }
}

/// A generically decoded object: class, version, and ordered fields.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    pub class: String,
    pub version: u16,
    fields: Vec<(String, Value)>,
}

impl Record {
    /// An empty record for `class` at `version`, to be filled field by field.
    pub fn new(class: impl Into<String>, version: u16) -> Self {
        Self {
            class: class.into(),
            version,
            fields: Vec::new(),
        }
    }

    /// Append a field; wire order is insertion order.
    pub fn push(&mut self, name: impl Into<String>, value: Value) {
        self.fields.push((name.into(), value));
    }

    /// By-name lookup (first match; field names are unique per schema).
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Ordered field view.
    pub fn fields(&self) -> &[(String, Value)] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Fetch a field that must be present, as a typed decode error otherwise.
    pub fn require(&self, name: &str) -> Result<&Value> {
        self.get(name).ok_or_else(|| {
            Error::invalid_file(format!("{}: missing field {name:?}", self.class))
        })
    }
}

impl Object for Record {
    fn class(&self) -> &str {
        &self.class
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Streamed for Record {
    fn unmarshal(&mut self, r: &mut ReadCursor<'_>, reg: &Registry) -> Result<()> {
        self.fields.clear();
        codec::decode_record_body(self, r, reg)
    }

    fn marshal(&self, w: &mut WriteCursor, reg: &Registry) -> Result<()> {
        codec::encode_record(self, w, reg)
    }
}

// =============================================================================
// Tests
// =============================================================================
