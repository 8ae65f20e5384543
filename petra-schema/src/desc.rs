//! Streamer descriptors: the on-disk member layout of one class version.
//!
//! A [`StreamerInfo`] is the unit the schema registry stores and the file
//! persists. Its ordered [`StreamerElement`] list is exactly the on-disk
//! field order; the generic codec walks it element by element. The shape set
//! is closed — all polymorphism in the codec is over this enum, never
//! runtime reflection.
//!
//! Element wire layout (inside the `PStreamerInfo` envelope):
//!
//! ```text
//! name: string
//! tag:  u8      0=Basic 1=BasicArray 2=BasicPointer 3=Object
//!               4=ObjectPtr 5=String 6=StlContainer
//! payload per tag:
//!   Basic        type_code u8
//!   BasicArray   type_code u8, len u32
//!   BasicPointer type_code u8, count member name string
//!   Object       class name string
//!   ObjectPtr    class name string
//!   String       (none)
//!   StlContainer kind u8, nested element (recursive)
//! ```

use petra_core::cursor::{ReadCursor, WriteCursor};
use petra_core::envelope::{check_envelope, close_envelope, read_envelope, write_envelope};
use petra_core::error::{Error, Result};

/// Class name under which streamer infos are stored and decoded.
pub const STREAMER_INFO_CLASS: &str = "PStreamerInfo";

/// Wire version of the `PStreamerInfo` encoding itself.
pub const STREAMER_INFO_VERSION: u16 = 1;

/// Upper bound on element counts read from disk; anything above this is a
/// corrupt length field, not a real schema.
const MAX_ELEMENTS: u32 = 1 << 16;

// ============================================================================
// Basic types
// ============================================================================

/// Primitive wire types a leaf or basic element can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BasicType {
    Bool = 1,
    I8 = 2,
    I16 = 3,
    I32 = 4,
    I64 = 5,
    U8 = 6,
    U16 = 7,
    U32 = 8,
    U64 = 9,
    F32 = 10,
    F64 = 11,
}

impl BasicType {
    pub fn from_u8(code: u8) -> Result<Self> {
        Ok(match code {
            1 => Self::Bool,
            2 => Self::I8,
            3 => Self::I16,
            4 => Self::I32,
            5 => Self::I64,
            6 => Self::U8,
            7 => Self::U16,
            8 => Self::U32,
            9 => Self::U64,
            10 => Self::F32,
            11 => Self::F64,
            _ => return Err(Error::invalid_file(format!("unknown basic type code {code}"))),
        })
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    /// Encoded size of one value, in bytes.
    pub fn size(self) -> usize {
        match self {
            Self::Bool | Self::I8 | Self::U8 => 1,
            Self::I16 | Self::U16 => 2,
            Self::I32 | Self::U32 | Self::F32 => 4,
            Self::I64 | Self::U64 | Self::F64 => 8,
        }
    }
}

// ============================================================================
// Element shapes
// ============================================================================

/// STL-style container kinds. One value element each; no map variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StlKind {
    Vector = 1,
    List = 2,
    Deque = 3,
    Set = 4,
}

impl StlKind {
    fn from_u8(code: u8) -> Result<Self> {
        Ok(match code {
            1 => Self::Vector,
            2 => Self::List,
            3 => Self::Deque,
            4 => Self::Set,
            _ => return Err(Error::invalid_file(format!("unknown STL kind {code}"))),
        })
    }
}

/// The closed shape set driving the generic codec's per-field step.
#[derive(Debug, Clone, PartialEq)]
pub enum ElementShape {
    /// One primitive value.
    Basic(BasicType),
    /// Fixed-length run of primitives.
    BasicArray(BasicType, u32),
    /// Variable-length run; the count comes from a previously decoded
    /// sibling member of this name.
    BasicPointer(BasicType, String),
    /// Nested object of the named class (envelope + fields, recursive).
    Object(String),
    /// Nullable nested object: 1-byte discriminant, then the object if set.
    ObjectPtr(String),
    /// Length-prefixed string.
    Str,
    /// Container: u32 element count, then that many values of the nested
    /// element's shape.
    Stl(StlKind, Box<StreamerElement>),
}

/// One member descriptor: field name + shape.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamerElement {
    pub name: String,
    pub shape: ElementShape,
}

impl StreamerElement {
    pub fn new(name: impl Into<String>, shape: ElementShape) -> Self {
        Self {
            name: name.into(),
            shape,
        }
    }

    pub(crate) fn encode(&self, w: &mut WriteCursor) {
        w.write_string(&self.name);
        match &self.shape {
            ElementShape::Basic(ty) => {
                w.write_u8(0);
                w.write_u8(ty.code());
            }
            ElementShape::BasicArray(ty, n) => {
                w.write_u8(1);
                w.write_u8(ty.code());
                w.write_u32(*n);
            }
            ElementShape::BasicPointer(ty, count) => {
                w.write_u8(2);
                w.write_u8(ty.code());
                w.write_string(count);
            }
            ElementShape::Object(class) => {
                w.write_u8(3);
                w.write_string(class);
            }
            ElementShape::ObjectPtr(class) => {
                w.write_u8(4);
                w.write_string(class);
            }
            ElementShape::Str => w.write_u8(5),
            ElementShape::Stl(kind, elem) => {
                w.write_u8(6);
                w.write_u8(*kind as u8);
                elem.encode(w);
            }
        }
    }

    pub(crate) fn decode(r: &mut ReadCursor<'_>) -> Result<Self> {
        let name = r.read_string()?;
        let tag = r.read_u8()?;
        let shape = match tag {
            0 => ElementShape::Basic(BasicType::from_u8(r.read_u8()?)?),
            1 => {
                let ty = BasicType::from_u8(r.read_u8()?)?;
                ElementShape::BasicArray(ty, r.read_u32()?)
            }
            2 => {
                let ty = BasicType::from_u8(r.read_u8()?)?;
                ElementShape::BasicPointer(ty, r.read_string()?)
            }
            3 => ElementShape::Object(r.read_string()?),
            4 => ElementShape::ObjectPtr(r.read_string()?),
            5 => ElementShape::Str,
            6 => {
                let kind = StlKind::from_u8(r.read_u8()?)?;
                ElementShape::Stl(kind, Box::new(StreamerElement::decode(r)?))
            }
            _ => return Err(Error::invalid_file(format!("unknown element tag {tag}"))),
        };
        Ok(Self { name, shape })
    }
}

// ============================================================================
// StreamerInfo
// ============================================================================

/// On-disk member layout of one class version. Immutable once read from a
/// file; the registry deduplicates by `(class, version)`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StreamerInfo {
    pub class: String,
    pub class_version: i16,
    pub elements: Vec<StreamerElement>,
}

impl StreamerInfo {
    pub fn new(
        class: impl Into<String>,
        class_version: i16,
        elements: Vec<StreamerElement>,
    ) -> Self {
        Self {
            class: class.into(),
            class_version,
            elements,
        }
    }

    /// Encode as a `PStreamerInfo` object (envelope-wrapped).
    pub fn encode(&self, w: &mut WriteCursor) {
        let h = write_envelope(w, STREAMER_INFO_VERSION);
        w.write_string(&self.class);
        w.write_i16(self.class_version);
        w.write_u32(self.elements.len() as u32);
        for el in &self.elements {
            el.encode(w);
        }
        close_envelope(w, h);
    }

    /// Decode a `PStreamerInfo` object.
    pub fn decode(r: &mut ReadCursor<'_>) -> Result<Self> {
        let env = read_envelope(r)?;
        if env.vers > STREAMER_INFO_VERSION {
            return Err(Error::UnsupportedVersion {
                class: STREAMER_INFO_CLASS.to_string(),
                got: env.vers,
                known: STREAMER_INFO_VERSION,
            });
        }
        let class = r.read_string()?;
        let class_version = r.read_i16()?;
        let n = r.read_u32()?;
        if n > MAX_ELEMENTS {
            return Err(Error::invalid_file(format!(
                "streamer info for {class:?} declares {n} elements"
            )));
        }
        let mut elements = Vec::with_capacity(n as usize);
        for _ in 0..n {
            elements.push(StreamerElement::decode(r)?);
        }
        check_envelope(r, &env, STREAMER_INFO_CLASS)?;
        Ok(Self {
            class,
            class_version,
            elements,
        })
    }
}

impl crate::obj::Object for StreamerInfo {
    fn class(&self) -> &str {
        STREAMER_INFO_CLASS
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

impl crate::obj::Streamed for StreamerInfo {
    fn unmarshal(
        &mut self,
        r: &mut ReadCursor<'_>,
        _reg: &crate::registry::Registry,
    ) -> Result<()> {
        *self = StreamerInfo::decode(r)?;
        Ok(())
    }

    fn marshal(&self, w: &mut WriteCursor, _reg: &crate::registry::Registry) -> Result<()> {
        self.encode(w);
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn event_info() -> StreamerInfo {
        StreamerInfo::new(
            "Event",
            2,
            vec![
                StreamerElement::new("run", ElementShape::Basic(BasicType::I32)),
                StreamerElement::new("weights", ElementShape::BasicArray(BasicType::F64, 3)),
                StreamerElement::new("ntrk", ElementShape::Basic(BasicType::U32)),
                StreamerElement::new(
                    "pt",
                    ElementShape::BasicPointer(BasicType::F64, "ntrk".into()),
                ),
                StreamerElement::new("label", ElementShape::Str),
                StreamerElement::new("vertex", ElementShape::Object("Vertex".into())),
                StreamerElement::new("mother", ElementShape::ObjectPtr("Vertex".into())),
                StreamerElement::new(
                    "hits",
                    ElementShape::Stl(
                        StlKind::Vector,
                        Box::new(StreamerElement::new("", ElementShape::Basic(BasicType::I16))),
                    ),
                ),
            ],
        )
    }

    #[test]
    fn info_round_trip() {
        let info = event_info();
        let mut w = WriteCursor::new();
        info.encode(&mut w);
        let bytes = w.into_bytes();
        let mut r = ReadCursor::new(&bytes);
        let back = StreamerInfo::decode(&mut r).unwrap();
        assert_eq!(back, info);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn future_version_is_unsupported() {
        let info = event_info();
        let mut w = WriteCursor::new();
        info.encode(&mut w);
        let mut bytes = w.into_bytes();
        // Bump the envelope version field (bytes 4..6).
        bytes[4..6].copy_from_slice(&(STREAMER_INFO_VERSION + 1).to_be_bytes());
        let mut r = ReadCursor::new(&bytes);
        assert!(matches!(
            StreamerInfo::decode(&mut r),
            Err(Error::UnsupportedVersion { .. })
        ));
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let mut w = WriteCursor::new();
        let h = petra_core::envelope::write_envelope(&mut w, STREAMER_INFO_VERSION);
        w.write_string("Broken");
        w.write_i16(1);
        w.write_u32(1);
        w.write_string("field");
        w.write_u8(99); // no such shape tag
        petra_core::envelope::close_envelope(&mut w, h);
        let bytes = w.into_bytes();
        let mut r = ReadCursor::new(&bytes);
        assert!(matches!(
            StreamerInfo::decode(&mut r),
            Err(Error::InvalidFile(_))
        ));
    }

    #[test]
    fn basic_type_codes_round_trip() {
        for ty in [
            BasicType::Bool,
            BasicType::I8,
            BasicType::I16,
            BasicType::I32,
            BasicType::I64,
            BasicType::U8,
            BasicType::U16,
            BasicType::U32,
            BasicType::U64,
            BasicType::F32,
            BasicType::F64,
        ] {
            assert_eq!(BasicType::from_u8(ty.code()).unwrap(), ty);
        }
        assert!(BasicType::from_u8(0).is_err());
        assert!(BasicType::from_u8(12).is_err());
    }
}
