//! Leaves: the typed fields of a branch.
//!
//! A leaf is always primitive-shaped — scalar, fixed array, or
//! variable-length array. Variable leaves name a *count leaf* (an integer
//! scalar leaf in the same tree) that supplies the per-entry length; the
//! reference is by name, resolved through the tree, never a back-pointer.

use petra_core::cursor::{ReadCursor, WriteCursor};
use petra_core::error::{Error, Result};
use petra_schema::codec::{decode_basic, encode_basic};
use petra_schema::{BasicType, Record, Value};

/// Class name of persisted leaf descriptors.
pub const LEAF_CLASS: &str = "PLeaf";

/// Leaf shape.
#[derive(Debug, Clone, PartialEq)]
pub enum LeafKind {
    /// One value per entry.
    Scalar(BasicType),
    /// A fixed-length run per entry.
    FixedArray(BasicType, u32),
    /// A run whose per-entry length is the named count leaf's value.
    VarArray(BasicType, String),
}

/// One leaf descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct Leaf {
    pub name: String,
    pub kind: LeafKind,
}

impl Leaf {
    pub fn scalar(name: impl Into<String>, ty: BasicType) -> Self {
        Self {
            name: name.into(),
            kind: LeafKind::Scalar(ty),
        }
    }

    pub fn fixed_array(name: impl Into<String>, ty: BasicType, len: u32) -> Self {
        Self {
            name: name.into(),
            kind: LeafKind::FixedArray(ty, len),
        }
    }

    pub fn var_array(
        name: impl Into<String>,
        ty: BasicType,
        count_leaf: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: LeafKind::VarArray(ty, count_leaf.into()),
        }
    }

    pub fn basic_type(&self) -> BasicType {
        match self.kind {
            LeafKind::Scalar(ty) | LeafKind::FixedArray(ty, _) | LeafKind::VarArray(ty, _) => ty,
        }
    }

    /// Name of the count leaf, for variable leaves.
    pub fn count_name(&self) -> Option<&str> {
        match &self.kind {
            LeafKind::VarArray(_, count) => Some(count),
            _ => None,
        }
    }

    /// Whether this leaf can drive a variable sibling (integer scalar).
    pub fn is_countable(&self) -> bool {
        matches!(
            self.kind,
            LeafKind::Scalar(
                BasicType::I8
                    | BasicType::I16
                    | BasicType::I32
                    | BasicType::I64
                    | BasicType::U8
                    | BasicType::U16
                    | BasicType::U32
                    | BasicType::U64
            )
        )
    }

    /// Encode one entry's value. `count` is the already-resolved length for
    /// variable leaves; the caller guarantees the count leaf was filled
    /// first.
    pub(crate) fn encode_value(
        &self,
        w: &mut WriteCursor,
        value: &Value,
        count: Option<u64>,
    ) -> Result<()> {
        match (&self.kind, value) {
            (LeafKind::Scalar(ty), v) => encode_basic(w, *ty, v, &self.name),
            (LeafKind::FixedArray(ty, n), Value::Array(vs)) => {
                if vs.len() != *n as usize {
                    return Err(Error::misuse(format!(
                        "leaf {:?}: fixed array wants {n} values, got {}",
                        self.name,
                        vs.len()
                    )));
                }
                for v in vs {
                    encode_basic(w, *ty, v, &self.name)?;
                }
                Ok(())
            }
            (LeafKind::VarArray(ty, count_name), Value::Array(vs)) => {
                let n = count.ok_or_else(|| Error::CountLeafNotYetRead {
                    leaf: self.name.clone(),
                    count: count_name.clone(),
                })?;
                if vs.len() as u64 != n {
                    return Err(Error::misuse(format!(
                        "leaf {:?}: count leaf says {n}, array holds {}",
                        self.name,
                        vs.len()
                    )));
                }
                for v in vs {
                    encode_basic(w, *ty, v, &self.name)?;
                }
                Ok(())
            }
            (_, v) => Err(Error::misuse(format!(
                "leaf {:?}: value {v:?} does not fit {:?}",
                self.name, self.kind
            ))),
        }
    }

    /// Decode one entry's value. `count` as in [`Self::encode_value`].
    pub(crate) fn decode_value(&self, r: &mut ReadCursor<'_>, count: Option<u64>) -> Result<Value> {
        match &self.kind {
            LeafKind::Scalar(ty) => decode_basic(r, *ty),
            LeafKind::FixedArray(ty, n) => {
                let mut out = Vec::with_capacity(*n as usize);
                for _ in 0..*n {
                    out.push(decode_basic(r, *ty)?);
                }
                Ok(Value::Array(out))
            }
            LeafKind::VarArray(ty, count_name) => {
                let n = count.ok_or_else(|| Error::CountLeafNotYetRead {
                    leaf: self.name.clone(),
                    count: count_name.clone(),
                })? as usize;
                let mut out = Vec::with_capacity(n.min(r.remaining()));
                for _ in 0..n {
                    out.push(decode_basic(r, *ty)?);
                }
                Ok(Value::Array(out))
            }
        }
    }

    // ------------------------------------------------------------------
    // Metadata persistence (as generic records)
    // ------------------------------------------------------------------

    pub(crate) fn to_record(&self) -> Record {
        let mut rec = Record::new(LEAF_CLASS, 1);
        rec.push("name", Value::Str(self.name.clone()));
        let (tag, ty, flen, count) = match &self.kind {
            LeafKind::Scalar(ty) => (0u8, *ty, 0u32, String::new()),
            LeafKind::FixedArray(ty, n) => (1, *ty, *n, String::new()),
            LeafKind::VarArray(ty, count) => (2, *ty, 0, count.clone()),
        };
        rec.push("kind", Value::U8(tag));
        rec.push("type_code", Value::U8(ty.code()));
        rec.push("flen", Value::U32(flen));
        rec.push("count", Value::Str(count));
        rec
    }

    pub(crate) fn from_record(rec: &Record) -> Result<Self> {
        let name = rec
            .require("name")?
            .as_str()
            .ok_or_else(|| Error::invalid_file("leaf name is not a string"))?
            .to_string();
        let tag = match rec.require("kind")? {
            Value::U8(t) => *t,
            other => {
                return Err(Error::invalid_file(format!(
                    "leaf {name:?}: bad kind value {other:?}"
                )))
            }
        };
        let ty = match rec.require("type_code")? {
            Value::U8(c) => BasicType::from_u8(*c)?,
            other => {
                return Err(Error::invalid_file(format!(
                    "leaf {name:?}: bad type code {other:?}"
                )))
            }
        };
        let kind = match tag {
            0 => LeafKind::Scalar(ty),
            1 => match rec.require("flen")? {
                Value::U32(n) => LeafKind::FixedArray(ty, *n),
                other => {
                    return Err(Error::invalid_file(format!(
                        "leaf {name:?}: bad fixed length {other:?}"
                    )))
                }
            },
            2 => {
                let count = rec
                    .require("count")?
                    .as_str()
                    .ok_or_else(|| Error::invalid_file("count leaf name is not a string"))?;
                LeafKind::VarArray(ty, count.to_string())
            }
            _ => {
                return Err(Error::invalid_file(format!(
                    "leaf {name:?}: unknown kind tag {tag}"
                )))
            }
        };
        Ok(Self { name, kind })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_entry_round_trip() {
        let leaf = Leaf::scalar("e", BasicType::F64);
        let mut w = WriteCursor::new();
        leaf.encode_value(&mut w, &Value::F64(2.5), None).unwrap();
        let bytes = w.into_bytes();
        let mut r = ReadCursor::new(&bytes);
        assert_eq!(leaf.decode_value(&mut r, None).unwrap(), Value::F64(2.5));
    }

    #[test]
    fn fixed_array_entry_round_trip() {
        let leaf = Leaf::fixed_array("pos", BasicType::F32, 3);
        let v = Value::Array(vec![Value::F32(1.0), Value::F32(2.0), Value::F32(3.0)]);
        let mut w = WriteCursor::new();
        leaf.encode_value(&mut w, &v, None).unwrap();
        let bytes = w.into_bytes();
        assert_eq!(bytes.len(), 12);
        let mut r = ReadCursor::new(&bytes);
        assert_eq!(leaf.decode_value(&mut r, None).unwrap(), v);
    }

    #[test]
    fn var_array_length_is_enforced() {
        let leaf = Leaf::var_array("pt", BasicType::F64, "n");
        let v = Value::Array(vec![Value::F64(1.0), Value::F64(2.0)]);
        let mut w = WriteCursor::new();
        leaf.encode_value(&mut w, &v, Some(2)).unwrap();
        assert!(leaf.encode_value(&mut w, &v, Some(3)).is_err());
    }

    #[test]
    fn wrong_value_shape_is_misuse() {
        let leaf = Leaf::scalar("e", BasicType::I32);
        let mut w = WriteCursor::new();
        assert!(matches!(
            leaf.encode_value(&mut w, &Value::F64(1.0), None),
            Err(Error::Misuse(_))
        ));
    }

    #[test]
    fn countable_classification() {
        assert!(Leaf::scalar("n", BasicType::I32).is_countable());
        assert!(Leaf::scalar("n", BasicType::U16).is_countable());
        assert!(!Leaf::scalar("x", BasicType::F64).is_countable());
        assert!(!Leaf::fixed_array("a", BasicType::I32, 2).is_countable());
    }

    #[test]
    fn descriptor_record_round_trip() {
        for leaf in [
            Leaf::scalar("n", BasicType::I32),
            Leaf::fixed_array("pos", BasicType::F32, 3),
            Leaf::var_array("pt", BasicType::F64, "n"),
        ] {
            assert_eq!(Leaf::from_record(&leaf.to_record()).unwrap(), leaf);
        }
    }
}
