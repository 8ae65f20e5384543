//! Free-segment list: byte ranges no longer owned by any live record.
//!
//! Superseded metadata records (key lists, streamer infos, the free record
//! itself) donate their regions here. Segments are kept sorted and adjacent
//! ranges are merged. Reuse of freed regions for new allocations is a valid
//! optimization the writer does not perform; the record exists so a
//! compacting writer could.
//!
//! On disk each segment is envelope-wrapped: `first` and `last` pointers,
//! 4-byte or 8-byte depending on the segment's version.

use petra_core::cursor::{ReadCursor, WriteCursor};
use petra_core::envelope::{check_envelope, close_envelope, read_envelope, write_envelope};
use petra_core::error::{Error, Result};

const FREE_VERSION: u16 = 1;
const FREE_LARGE_OFFSET: u16 = 1000;
const FREE_CLASS: &str = "PFree";

/// One free byte range, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeSegment {
    pub first: u64,
    pub last: u64,
}

impl FreeSegment {
    fn encode(&self, w: &mut WriteCursor) {
        let large = self.last >= u32::MAX as u64;
        let vers = if large {
            FREE_VERSION + FREE_LARGE_OFFSET
        } else {
            FREE_VERSION
        };
        let h = write_envelope(w, vers);
        if large {
            w.write_u64(self.first);
            w.write_u64(self.last);
        } else {
            w.write_u32(self.first as u32);
            w.write_u32(self.last as u32);
        }
        close_envelope(w, h);
    }

    fn decode(r: &mut ReadCursor<'_>) -> Result<Self> {
        let env = read_envelope(r)?;
        let base = env.vers % FREE_LARGE_OFFSET;
        if base > FREE_VERSION {
            return Err(Error::UnsupportedVersion {
                class: FREE_CLASS.to_string(),
                got: base,
                known: FREE_VERSION,
            });
        }
        let seg = if env.vers > FREE_LARGE_OFFSET {
            FreeSegment {
                first: r.read_u64()?,
                last: r.read_u64()?,
            }
        } else {
            FreeSegment {
                first: r.read_u32()? as u64,
                last: r.read_u32()? as u64,
            }
        };
        check_envelope(r, &env, FREE_CLASS)?;
        Ok(seg)
    }
}

/// Sorted, consolidated free-segment list.
#[derive(Debug, Default)]
pub struct FreeList {
    segments: Vec<FreeSegment>,
}

impl FreeList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn segments(&self) -> &[FreeSegment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Add `[first, last]`, merging with adjacent or overlapping segments.
    pub fn add(&mut self, first: u64, last: u64) {
        debug_assert!(first <= last);
        self.segments.push(FreeSegment { first, last });
        self.consolidate();
    }

    fn consolidate(&mut self) {
        self.segments
            .sort_by_key(|s| (s.first, s.last));
        let mut out: Vec<FreeSegment> = Vec::with_capacity(self.segments.len());
        for seg in self.segments.drain(..) {
            match out.last_mut() {
                Some(prev) if seg.first <= prev.last + 1 => {
                    prev.last = prev.last.max(seg.last);
                }
                _ => out.push(seg),
            }
        }
        self.segments = out;
    }

    /// Encode every segment, back to back.
    pub fn encode(&self) -> Vec<u8> {
        let mut w = WriteCursor::new();
        for seg in &self.segments {
            seg.encode(&mut w);
        }
        w.into_bytes()
    }

    /// Decode a free record payload, consuming the whole buffer.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut r = ReadCursor::new(buf);
        let mut list = FreeList::new();
        while r.remaining() > 0 {
            list.segments.push(FreeSegment::decode(&mut r)?);
        }
        list.consolidate();
        Ok(list)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_consolidates_adjacent() {
        let mut fl = FreeList::new();
        fl.add(100, 199);
        fl.add(300, 399);
        fl.add(200, 299);
        assert_eq!(fl.segments(), &[FreeSegment { first: 100, last: 399 }]);
    }

    #[test]
    fn add_keeps_disjoint_apart() {
        let mut fl = FreeList::new();
        fl.add(100, 150);
        fl.add(200, 250);
        assert_eq!(fl.len(), 2);
    }

    #[test]
    fn overlapping_segments_merge() {
        let mut fl = FreeList::new();
        fl.add(100, 300);
        fl.add(200, 250);
        fl.add(250, 400);
        assert_eq!(fl.segments(), &[FreeSegment { first: 100, last: 400 }]);
    }

    #[test]
    fn record_round_trip_mixed_widths() {
        let mut fl = FreeList::new();
        fl.add(512, 1023);
        fl.add(0x1_0000_0000, 0x1_0000_ffff); // needs 8-byte pointers
        let bytes = fl.encode();
        let back = FreeList::decode(&bytes).unwrap();
        assert_eq!(back.segments(), fl.segments());
    }

    #[test]
    fn empty_record_round_trip() {
        let fl = FreeList::new();
        let back = FreeList::decode(&fl.encode()).unwrap();
        assert!(back.is_empty());
    }
}
