//! Container file header.
//!
//! Layout (big-endian, pointer width selected by `units`):
//!
//! ```text
//! [magic "petr": 4B]
//! [version: u32]          += 1_000_000 when units == 8
//! [begin:   u32]          offset of the first data record (256)
//! [end:     u32|u64]      first unused byte
//! [seek_free:   u32|u64]  free-segment record
//! [nbytes_free: u32]
//! [nfree:       u32]
//! [nbytes_name: u32]      length of the root name record at `begin`
//! [units:       u8]       pointer width, 4 or 8
//! [compression: u32]      algorithm * 100 + level
//! [seek_info:   u32|u64]  streamer-info record
//! [nbytes_info: u32]
//! [zero padding to 256 bytes]
//! ```
//!
//! The header region is a fixed 256 bytes so it can be rewritten in place at
//! every close. A file starts with 4-byte pointers; once `end` crosses the
//! 2 GiB boundary the header is rewritten in the 8-byte layout and the
//! version gains the large-file offset.

use petra_core::cursor::{ReadCursor, WriteCursor};
use petra_core::error::{Error, Result};

/// File magic bytes.
pub const MAGIC: [u8; 4] = *b"petr";

/// Current container format version (without the large-file offset).
pub const FORMAT_VERSION: u32 = 100;

/// Added to the header version when pointers are 8 bytes.
pub const LARGE_VERSION_OFFSET: u32 = 1_000_000;

/// Offset of the first data record; the header region spans `0..BEGIN`.
pub const BEGIN: u64 = 256;

/// Files growing past this size switch to 8-byte pointers.
pub const LARGE_FILE_BOUNDARY: u64 = 0x8000_0000;

/// Decoded container header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub version: u32,
    pub begin: u64,
    pub end: u64,
    pub seek_free: u64,
    pub nbytes_free: u32,
    pub nfree: u32,
    pub nbytes_name: u32,
    pub units: u8,
    pub compression: u32,
    pub seek_info: u64,
    pub nbytes_info: u32,
}

impl Header {
    /// A fresh header for a file being created.
    pub fn new(compression: u32) -> Self {
        Self {
            version: FORMAT_VERSION,
            begin: BEGIN,
            end: BEGIN,
            seek_free: 0,
            nbytes_free: 0,
            nfree: 0,
            nbytes_name: 0,
            units: 4,
            compression,
            seek_info: 0,
            nbytes_info: 0,
        }
    }

    pub fn is_large(&self) -> bool {
        self.units == 8
    }

    /// Encode into the fixed 256-byte header region.
    pub fn encode(&self) -> Vec<u8> {
        let mut w = WriteCursor::new();
        w.write_bytes(&MAGIC);
        let vers = if self.is_large() {
            self.version + LARGE_VERSION_OFFSET
        } else {
            self.version
        };
        w.write_u32(vers);
        w.write_u32(self.begin as u32);
        self.write_ptr(&mut w, self.end);
        self.write_ptr(&mut w, self.seek_free);
        w.write_u32(self.nbytes_free);
        w.write_u32(self.nfree);
        w.write_u32(self.nbytes_name);
        w.write_u8(self.units);
        w.write_u32(self.compression);
        self.write_ptr(&mut w, self.seek_info);
        w.write_u32(self.nbytes_info);
        let mut out = w.into_bytes();
        debug_assert!(out.len() <= BEGIN as usize);
        out.resize(BEGIN as usize, 0);
        out
    }

    fn write_ptr(&self, w: &mut WriteCursor, v: u64) {
        if self.is_large() {
            w.write_u64(v);
        } else {
            w.write_u32(v as u32);
        }
    }

    /// Decode and validate the header region.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut r = ReadCursor::new(buf);
        let magic = r.read_bytes(4)?;
        if magic != MAGIC {
            return Err(Error::invalid_file(format!(
                "bad magic bytes {magic:?}, not a petra container"
            )));
        }
        let raw_version = r.read_u32()?;
        let large = raw_version >= LARGE_VERSION_OFFSET;
        let version = raw_version % LARGE_VERSION_OFFSET;
        if version > FORMAT_VERSION {
            return Err(Error::invalid_file(format!(
                "container format version {version} is newer than supported {FORMAT_VERSION}"
            )));
        }
        let read_ptr = |r: &mut ReadCursor<'_>| -> Result<u64> {
            if large {
                r.read_u64()
            } else {
                r.read_u32().map(u64::from)
            }
        };
        let begin = r.read_u32()? as u64;
        let end = read_ptr(&mut r)?;
        let seek_free = read_ptr(&mut r)?;
        let nbytes_free = r.read_u32()?;
        let nfree = r.read_u32()?;
        let nbytes_name = r.read_u32()?;
        let units = r.read_u8()?;
        if (units == 8) != large {
            return Err(Error::invalid_file(format!(
                "units byte {units} disagrees with header version {raw_version}"
            )));
        }
        if units != 4 && units != 8 {
            return Err(Error::invalid_file(format!("bad pointer width {units}")));
        }
        let compression = r.read_u32()?;
        let seek_info = read_ptr(&mut r)?;
        let nbytes_info = r.read_u32()?;
        Ok(Self {
            version,
            begin,
            end,
            seek_free,
            nbytes_free,
            nfree,
            nbytes_name,
            units,
            compression,
            seek_info,
            nbytes_info,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
