//! Baskets: compressed, offset-indexed chunks of one branch's entry bytes.
//!
//! Basket payload (before compression framing):
//!
//! ```text
//! [entry data: data_len bytes]
//! [offset table: nentries × u32]   byte offset of each entry, relative to
//!                                  payload start
//! ```
//!
//! A basket covers the contiguous entry range
//! `[first_entry, first_entry + nentries)`. On disk it is a key-less block:
//! `nbytes` stored bytes at `seek`, compression-framed unless
//! `obj_len == nbytes` (the raw fallback). The locating fields live in the
//! branch's basket index, persisted with the tree metadata.

use petra_core::cursor::{ReadCursor, WriteCursor};
use petra_core::error::{Error, Result};
use petra_schema::{Record, Value};

/// Class name of persisted basket index entries.
pub const BASKET_CLASS: &str = "PBasketRange";

/// One basket's slot in a branch's basket index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BasketRange {
    pub first_entry: u64,
    pub nentries: u32,
    pub seek: u64,
    /// Stored (possibly compressed) block length.
    pub nbytes: u32,
    /// Uncompressed payload length.
    pub obj_len: u32,
    /// Offset of the offset table inside the payload (== entry data length).
    pub data_len: u32,
}

impl BasketRange {
    pub fn contains(&self, entry: u64) -> bool {
        entry >= self.first_entry && entry < self.first_entry + self.nentries as u64
    }

    pub(crate) fn to_record(self) -> Record {
        let mut rec = Record::new(BASKET_CLASS, 1);
        rec.push("first_entry", Value::U64(self.first_entry));
        rec.push("nentries", Value::U32(self.nentries));
        rec.push("seek", Value::U64(self.seek));
        rec.push("nbytes", Value::U32(self.nbytes));
        rec.push("obj_len", Value::U32(self.obj_len));
        rec.push("data_len", Value::U32(self.data_len));
        rec
    }

    pub(crate) fn from_record(rec: &Record) -> Result<Self> {
        let u64_of = |name: &str| -> Result<u64> {
            match rec.require(name)? {
                Value::U64(v) => Ok(*v),
                other => Err(Error::invalid_file(format!(
                    "basket field {name:?}: bad value {other:?}"
                ))),
            }
        };
        let u32_of = |name: &str| -> Result<u32> {
            match rec.require(name)? {
                Value::U32(v) => Ok(*v),
                other => Err(Error::invalid_file(format!(
                    "basket field {name:?}: bad value {other:?}"
                ))),
            }
        };
        let range = Self {
            first_entry: u64_of("first_entry")?,
            nentries: u32_of("nentries")?,
            seek: u64_of("seek")?,
            nbytes: u32_of("nbytes")?,
            obj_len: u32_of("obj_len")?,
            data_len: u32_of("data_len")?,
        };
        if range.data_len > range.obj_len {
            return Err(Error::invalid_file(format!(
                "basket at {}: data_len {} exceeds payload {}",
                range.seek, range.data_len, range.obj_len
            )));
        }
        Ok(range)
    }
}

/// A fetched, decompressed, split-apart basket, cached on the branch for
/// the duration of sequential access.
#[derive(Debug)]
pub(crate) struct DecodedBasket {
    /// Index into the branch's basket list.
    pub index: usize,
    pub first_entry: u64,
    pub nentries: u32,
    pub data: Vec<u8>,
    pub offsets: Vec<u32>,
}

impl DecodedBasket {
    /// Byte range of one entry within `data`.
    pub fn entry_span(&self, entry: u64) -> Result<(usize, usize)> {
        let local = (entry - self.first_entry) as usize;
        let start = self.offsets[local] as usize;
        let end = if local + 1 < self.offsets.len() {
            self.offsets[local + 1] as usize
        } else {
            self.data.len()
        };
        if start > end || end > self.data.len() {
            return Err(Error::invalid_file(format!(
                "basket offset table: entry {entry} spans {start}..{end} of {}",
                self.data.len()
            )));
        }
        Ok((start, end))
    }
}

/// Assemble a basket payload from entry data and its offset table.
pub(crate) fn assemble_payload(data: &[u8], offsets: &[u32]) -> Vec<u8> {
    let mut w = WriteCursor::new();
    w.write_bytes(data);
    w.write_array_u32(offsets);
    w.into_bytes()
}

/// Split a decompressed payload back into entry data + offset table.
pub(crate) fn split_payload(
    payload: Vec<u8>,
    range: &BasketRange,
) -> Result<(Vec<u8>, Vec<u32>)> {
    if payload.len() != range.obj_len as usize {
        return Err(Error::invalid_file(format!(
            "basket at {}: payload is {} bytes, index says {}",
            range.seek,
            payload.len(),
            range.obj_len
        )));
    }
    let table_len = (range.obj_len - range.data_len) as usize;
    if table_len != range.nentries as usize * 4 {
        return Err(Error::invalid_file(format!(
            "basket at {}: offset table is {table_len} bytes for {} entries",
            range.seek, range.nentries
        )));
    }
    let mut data = payload;
    let table = data.split_off(range.data_len as usize);
    let mut r = ReadCursor::new(&table);
    let offsets = r.read_array_u32(range.nentries as usize)?;
    for pair in offsets.windows(2) {
        if pair[0] > pair[1] {
            return Err(Error::invalid_file(format!(
                "basket at {}: offset table not monotonic",
                range.seek
            )));
        }
    }
    Ok((data, offsets))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn range(data_len: u32, nentries: u32) -> BasketRange {
        BasketRange {
            first_entry: 10,
            nentries,
            seek: 512,
            nbytes: data_len + nentries * 4,
            obj_len: data_len + nentries * 4,
            data_len,
        }
    }

    #[test]
    fn payload_round_trip() {
        let data = vec![1u8, 2, 3, 4, 5, 6];
        let offsets = vec![0u32, 2, 5];
        let payload = assemble_payload(&data, &offsets);
        let (d, o) = split_payload(payload, &range(6, 3)).unwrap();
        assert_eq!(d, data);
        assert_eq!(o, offsets);
    }

    #[test]
    fn entry_spans() {
        let basket = DecodedBasket {
            index: 0,
            first_entry: 10,
            nentries: 3,
            data: vec![0; 6],
            offsets: vec![0, 2, 5],
        };
        assert_eq!(basket.entry_span(10).unwrap(), (0, 2));
        assert_eq!(basket.entry_span(11).unwrap(), (2, 5));
        assert_eq!(basket.entry_span(12).unwrap(), (5, 6));
    }

    #[test]
    fn bad_table_length_rejected() {
        let payload = assemble_payload(&[1, 2, 3], &[0, 1]);
        let mut r = range(3, 2);
        r.nentries = 3; // table too short for three entries
        r.obj_len = payload.len() as u32;
        assert!(split_payload(payload, &r).is_err());
    }

    #[test]
    fn non_monotonic_offsets_rejected() {
        let payload = assemble_payload(&[1, 2, 3, 4], &[2, 0]);
        let mut r = range(4, 2);
        r.obj_len = payload.len() as u32;
        assert!(split_payload(payload, &r).is_err());
    }

    #[test]
    fn contains_is_half_open() {
        let r = range(4, 2);
        assert!(!r.contains(9));
        assert!(r.contains(10));
        assert!(r.contains(11));
        assert!(!r.contains(12));
    }

    #[test]
    fn index_record_round_trip() {
        let r = range(100, 7);
        assert_eq!(BasketRange::from_record(&r.to_record()).unwrap(), r);
    }
}
