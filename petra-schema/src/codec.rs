//! The generic codec: decode/encode any stored class from its streamer
//! description, without compile-time knowledge of the type.
//!
//! Decoding walks the class's [`StreamerInfo`] element list in wire order,
//! dispatching on each element's shape; the result is a [`Record`]. Classes
//! with a registered factory (compiled-in wrappers) take their own
//! `unmarshal` path instead. Either way the object envelope is validated:
//! wrong byte counts fail, versions newer than the registry knows fail —
//! never a guess, never a panic.

use crate::desc::{BasicType, ElementShape, StreamerElement};
use crate::obj::Streamed;
use crate::registry::Registry;
use crate::value::{Record, Value};
use petra_core::cursor::{ReadCursor, WriteCursor};
use petra_core::envelope::{check_envelope, close_envelope, read_envelope, write_envelope};
use petra_core::error::{Error, Result};

/// Decode one object of class `class` from the cursor.
///
/// Factory-registered classes construct an empty instance and unmarshal it;
/// everything else resolves a streamer info and decodes generically.
pub fn decode_any(
    r: &mut ReadCursor<'_>,
    class: &str,
    reg: &Registry,
) -> Result<Box<dyn Streamed>> {
    if let Some(ctor) = reg.factory(class) {
        let mut obj = ctor();
        obj.unmarshal(r, reg)?;
        return Ok(obj);
    }
    let mut rec = Record::new(class, 0);
    rec.unmarshal(r, reg)?;
    Ok(Box::new(rec))
}

/// Encode one object to the cursor (the structural mirror of [`decode_any`]).
pub fn encode_any(w: &mut WriteCursor, obj: &dyn Streamed, reg: &Registry) -> Result<()> {
    obj.marshal(w, reg)
}

/// Decode the envelope + fields of a record whose class is already set.
pub(crate) fn decode_record_body(
    rec: &mut Record,
    r: &mut ReadCursor<'_>,
    reg: &Registry,
) -> Result<()> {
    let env = read_envelope(r)?;
    let known = match reg.latest_version(&rec.class) {
        Some(v) => v,
        None => {
            return Err(Error::UnknownSchema {
                class: rec.class.clone(),
                version: env.vers,
            })
        }
    };
    if env.vers as i32 > known as i32 {
        return Err(Error::UnsupportedVersion {
            class: rec.class.clone(),
            got: env.vers,
            known: known.max(0) as u16,
        });
    }
    let info = reg.info(&rec.class, env.vers as i16).ok_or_else(|| {
        Error::UnknownSchema {
            class: rec.class.clone(),
            version: env.vers,
        }
    })?;

    rec.version = env.vers;
    for el in &info.elements {
        let value = decode_element(r, el, rec, reg)?;
        rec.push(el.name.clone(), value);
    }
    check_envelope(r, &env, &rec.class)
}

fn decode_record_value(r: &mut ReadCursor<'_>, class: &str, reg: &Registry) -> Result<Record> {
    let mut rec = Record::new(class, 0);
    decode_record_body(&mut rec, r, reg)?;
    Ok(rec)
}

/// Guard a length declared on disk against the bytes actually left, so a
/// corrupt count fails cleanly instead of over-allocating.
fn check_len(r: &ReadCursor<'_>, n: usize, min_item: usize) -> Result<()> {
    let want = n.saturating_mul(min_item.max(1));
    if want > r.remaining() {
        return Err(Error::OutOfBounds {
            pos: r.pos(),
            want,
            len: r.pos() + r.remaining(),
        });
    }
    Ok(())
}

fn decode_element(
    r: &mut ReadCursor<'_>,
    el: &StreamerElement,
    decoded_so_far: &Record,
    reg: &Registry,
) -> Result<Value> {
    match &el.shape {
        ElementShape::Basic(ty) => decode_basic(r, *ty),
        ElementShape::BasicArray(ty, n) => {
            check_len(r, *n as usize, ty.size())?;
            let mut out = Vec::with_capacity(*n as usize);
            for _ in 0..*n {
                out.push(decode_basic(r, *ty)?);
            }
            Ok(Value::Array(out))
        }
        ElementShape::BasicPointer(ty, count_name) => {
            let n = decoded_so_far
                .get(count_name)
                .and_then(Value::as_count)
                .ok_or_else(|| Error::CountLeafNotYetRead {
                    leaf: el.name.clone(),
                    count: count_name.clone(),
                })? as usize;
            let _marker = r.read_u8()?;
            check_len(r, n, ty.size())?;
            let mut out = Vec::with_capacity(n);
            for _ in 0..n {
                out.push(decode_basic(r, *ty)?);
            }
            Ok(Value::Array(out))
        }
        ElementShape::Object(class) => Ok(Value::Object(decode_record_value(r, class, reg)?)),
        ElementShape::ObjectPtr(class) => {
            let tag = r.read_u8()?;
            if tag == 0 {
                Ok(Value::ObjectPtr(None))
            } else {
                Ok(Value::ObjectPtr(Some(Box::new(decode_record_value(
                    r, class, reg,
                )?))))
            }
        }
        ElementShape::Str => Ok(Value::Str(r.read_string()?)),
        ElementShape::Stl(_, item) => {
            let n = r.read_u32()? as usize;
            check_len(r, n, 1)?;
            let mut out = Vec::with_capacity(n);
            for _ in 0..n {
                out.push(decode_element(r, item, decoded_so_far, reg)?);
            }
            Ok(Value::Array(out))
        }
    }
}

/// Decode one primitive value of the given type (the codec's primitive path,
/// shared with the columnar leaf decoder).
pub fn decode_basic(r: &mut ReadCursor<'_>, ty: BasicType) -> Result<Value> {
    Ok(match ty {
        BasicType::Bool => Value::Bool(r.read_bool()?),
        BasicType::I8 => Value::I8(r.read_i8()?),
        BasicType::I16 => Value::I16(r.read_i16()?),
        BasicType::I32 => Value::I32(r.read_i32()?),
        BasicType::I64 => Value::I64(r.read_i64()?),
        BasicType::U8 => Value::U8(r.read_u8()?),
        BasicType::U16 => Value::U16(r.read_u16()?),
        BasicType::U32 => Value::U32(r.read_u32()?),
        BasicType::U64 => Value::U64(r.read_u64()?),
        BasicType::F32 => Value::F32(r.read_f32()?),
        BasicType::F64 => Value::F64(r.read_f64()?),
    })
}

/// Encode a record against its registered streamer info.
///
/// Field values must match the schema's shapes exactly; a mismatch is caller
/// misuse, not a data error.
pub(crate) fn encode_record(rec: &Record, w: &mut WriteCursor, reg: &Registry) -> Result<()> {
    let info = reg
        .info(&rec.class, rec.version as i16)
        .ok_or_else(|| Error::UnknownSchema {
            class: rec.class.clone(),
            version: rec.version,
        })?;

    let h = write_envelope(w, rec.version);
    for el in &info.elements {
        let value = rec.get(&el.name).ok_or_else(|| {
            Error::misuse(format!("{}: field {:?} not set", rec.class, el.name))
        })?;
        encode_element(w, el, value, rec, reg)?;
    }
    close_envelope(w, h);
    Ok(())
}

fn encode_element(
    w: &mut WriteCursor,
    el: &StreamerElement,
    value: &Value,
    rec: &Record,
    reg: &Registry,
) -> Result<()> {
    match (&el.shape, value) {
        (ElementShape::Basic(ty), v) => encode_basic(w, *ty, v, &el.name),
        (ElementShape::BasicArray(ty, n), Value::Array(vs)) => {
            if vs.len() != *n as usize {
                return Err(Error::misuse(format!(
                    "{:?}: fixed array wants {n} values, got {}",
                    el.name,
                    vs.len()
                )));
            }
            for v in vs {
                encode_basic(w, *ty, v, &el.name)?;
            }
            Ok(())
        }
        (ElementShape::BasicPointer(ty, count_name), Value::Array(vs)) => {
            let declared = rec
                .get(count_name)
                .and_then(Value::as_count)
                .ok_or_else(|| Error::CountLeafNotYetRead {
                    leaf: el.name.clone(),
                    count: count_name.clone(),
                })?;
            if declared as usize != vs.len() {
                return Err(Error::misuse(format!(
                    "{:?}: count member {count_name:?} is {declared}, array holds {}",
                    el.name,
                    vs.len()
                )));
            }
            w.write_u8(1);
            for v in vs {
                encode_basic(w, *ty, v, &el.name)?;
            }
            Ok(())
        }
        (ElementShape::Object(class), Value::Object(nested)) => {
            if nested.class != *class {
                return Err(Error::misuse(format!(
                    "{:?}: expected class {class:?}, record is {:?}",
                    el.name, nested.class
                )));
            }
            encode_record(nested, w, reg)
        }
        (ElementShape::ObjectPtr(_), Value::ObjectPtr(None)) => {
            w.write_u8(0);
            Ok(())
        }
        (ElementShape::ObjectPtr(class), Value::ObjectPtr(Some(nested))) => {
            if nested.class != *class {
                return Err(Error::misuse(format!(
                    "{:?}: expected class {class:?}, record is {:?}",
                    el.name, nested.class
                )));
            }
            w.write_u8(1);
            encode_record(nested, w, reg)
        }
        (ElementShape::Str, Value::Str(s)) => {
            w.write_string(s);
            Ok(())
        }
        (ElementShape::Stl(_, item), Value::Array(vs)) => {
            w.write_u32(vs.len() as u32);
            for v in vs {
                encode_element(w, item, v, rec, reg)?;
            }
            Ok(())
        }
        (shape, v) => Err(Error::misuse(format!(
            "{:?}: value {v:?} does not fit shape {shape:?}",
            el.name
        ))),
    }
}

/// Encode one primitive value of the given type; a shape mismatch is caller
/// misuse, reported against `field`.
pub fn encode_basic(w: &mut WriteCursor, ty: BasicType, v: &Value, field: &str) -> Result<()> {
    match (ty, v) {
        (BasicType::Bool, Value::Bool(x)) => w.write_bool(*x),
        (BasicType::I8, Value::I8(x)) => w.write_i8(*x),
        (BasicType::I16, Value::I16(x)) => w.write_i16(*x),
        (BasicType::I32, Value::I32(x)) => w.write_i32(*x),
        (BasicType::I64, Value::I64(x)) => w.write_i64(*x),
        (BasicType::U8, Value::U8(x)) => w.write_u8(*x),
        (BasicType::U16, Value::U16(x)) => w.write_u16(*x),
        (BasicType::U32, Value::U32(x)) => w.write_u32(*x),
        (BasicType::U64, Value::U64(x)) => w.write_u64(*x),
        (BasicType::F32, Value::F32(x)) => w.write_f32(*x),
        (BasicType::F64, Value::F64(x)) => w.write_f64(*x),
        (ty, v) => {
            return Err(Error::misuse(format!(
                "{field:?}: value {v:?} is not a {ty:?}"
            )))
        }
    }
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
