//! Key records: the index entries locating stored objects.
//!
//! Layout (big-endian; seeks are 4 bytes, or 8 when the key version carries
//! the large offset):
//!
//! ```text
//! nbytes   u32      total record length (this header + stored data)
//! version  u16      key struct version, +1000 when seeks are 8-byte
//! obj_len  u32      uncompressed data length
//! cycle    u16
//! key_len  u16      byte length of this header
//! seek_key u32|u64  offset of this record (self pointer, cross-check)
//! seek_dir u32|u64  offset of the owning directory record
//! class    string
//! name     string
//! title    string
//! ```
//!
//! `nbytes - key_len` is the stored (possibly compressed) data length; when
//! it equals `obj_len` the data is raw.

use petra_core::cursor::{ReadCursor, WriteCursor};
use petra_core::error::{Error, Result};

/// Current key struct version.
pub const KEY_VERSION: u16 = 1;

/// Added to the key version when its seek fields are 8 bytes.
pub const LARGE_KEY_OFFSET: u16 = 1000;

/// One stored object's index entry. Multiple keys may share a name with
/// different cycles; the highest cycle is authoritative. Immutable once
/// flushed; superseded, never deleted, by re-writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Key {
    pub nbytes: u32,
    pub version: u16,
    pub obj_len: u32,
    pub cycle: u16,
    pub key_len: u16,
    pub seek_key: u64,
    pub seek_dir: u64,
    pub class: String,
    pub name: String,
    pub title: String,
}

/// Encoded length of a length-prefixed string.
pub(crate) fn string_len(s: &str) -> usize {
    if s.len() >= 0xFF {
        5 + s.len()
    } else {
        1 + s.len()
    }
}

impl Key {
    /// Build a key for `data_len` stored bytes of an object that inflates to
    /// `obj_len`, to be written at `seek_key`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        class: impl Into<String>,
        name: impl Into<String>,
        title: impl Into<String>,
        cycle: u16,
        obj_len: u32,
        data_len: u32,
        seek_key: u64,
        seek_dir: u64,
        large: bool,
    ) -> Self {
        let class = class.into();
        let name = name.into();
        let title = title.into();
        let version = if large {
            KEY_VERSION + LARGE_KEY_OFFSET
        } else {
            KEY_VERSION
        };
        let key_len = Self::sizeof(&class, &name, &title, large);
        Self {
            nbytes: key_len as u32 + data_len,
            version,
            obj_len,
            cycle,
            key_len,
            seek_key,
            seek_dir,
            class,
            name,
            title,
        }
    }

    /// Header length for the given strings and pointer width.
    pub fn sizeof(class: &str, name: &str, title: &str, large: bool) -> u16 {
        let ptr = if large { 8 } else { 4 };
        (4 + 2 + 4 + 2 + 2 + 2 * ptr + string_len(class) + string_len(name) + string_len(title))
            as u16
    }

    pub fn is_large(&self) -> bool {
        self.version > LARGE_KEY_OFFSET
    }

    /// Stored data length (compressed size when framing is in effect).
    pub fn stored_len(&self) -> u32 {
        self.nbytes - self.key_len as u32
    }

    /// Whether the stored data is compression-framed.
    pub fn is_compressed(&self) -> bool {
        self.obj_len != self.stored_len()
    }

    pub fn encode(&self, w: &mut WriteCursor) {
        w.write_u32(self.nbytes);
        w.write_u16(self.version);
        w.write_u32(self.obj_len);
        w.write_u16(self.cycle);
        w.write_u16(self.key_len);
        if self.is_large() {
            w.write_u64(self.seek_key);
            w.write_u64(self.seek_dir);
        } else {
            w.write_u32(self.seek_key as u32);
            w.write_u32(self.seek_dir as u32);
        }
        w.write_string(&self.class);
        w.write_string(&self.name);
        w.write_string(&self.title);
    }

    pub fn decode(r: &mut ReadCursor<'_>) -> Result<Self> {
        let start = r.pos();
        let nbytes = r.read_u32()?;
        let version = r.read_u16()?;
        let base = version % LARGE_KEY_OFFSET;
        if base > KEY_VERSION {
            return Err(Error::UnsupportedVersion {
                class: "PKey".to_string(),
                got: base,
                known: KEY_VERSION,
            });
        }
        let obj_len = r.read_u32()?;
        let cycle = r.read_u16()?;
        let key_len = r.read_u16()?;
        let large = version > LARGE_KEY_OFFSET;
        let (seek_key, seek_dir) = if large {
            (r.read_u64()?, r.read_u64()?)
        } else {
            (r.read_u32()? as u64, r.read_u32()? as u64)
        };
        let class = r.read_string()?;
        let name = r.read_string()?;
        let title = r.read_string()?;
        if r.pos() - start != key_len as usize {
            return Err(Error::invalid_file(format!(
                "key {name:?}: header is {} bytes, key_len declares {key_len}",
                r.pos() - start
            )));
        }
        if (nbytes as usize) < key_len as usize {
            return Err(Error::invalid_file(format!(
                "key {name:?}: nbytes {nbytes} smaller than key_len {key_len}"
            )));
        }
        Ok(Self {
            nbytes,
            version,
            obj_len,
            cycle,
            key_len,
            seek_key,
            seek_dir,
            class,
            name,
            title,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(large: bool) -> Key {
        Key::new(
            "PString", "k", "a title", 3, 120, 80, 0x1234, 0x100, large,
        )
    }

    #[test]
    fn key_round_trip_small() {
        let k = sample(false);
        let mut w = WriteCursor::new();
        k.encode(&mut w);
        let bytes = w.into_bytes();
        assert_eq!(bytes.len(), k.key_len as usize);
        let mut r = ReadCursor::new(&bytes);
        assert_eq!(Key::decode(&mut r).unwrap(), k);
    }

    #[test]
    fn key_round_trip_large() {
        let k = sample(true);
        assert!(k.is_large());
        let mut w = WriteCursor::new();
        k.encode(&mut w);
        let bytes = w.into_bytes();
        assert_eq!(bytes.len(), k.key_len as usize);
        let mut r = ReadCursor::new(&bytes);
        let back = Key::decode(&mut r).unwrap();
        assert_eq!(back, k);
        assert_eq!(back.seek_key, 0x1234);
    }

    #[test]
    fn compression_detection() {
        let raw = Key::new("C", "n", "", 1, 80, 80, 0, 0, false);
        assert!(!raw.is_compressed());
        let packed = Key::new("C", "n", "", 1, 200, 80, 0, 0, false);
        assert!(packed.is_compressed());
        assert_eq!(packed.stored_len(), 80);
        assert_eq!(packed.obj_len, 200);
    }

    #[test]
    fn future_key_version_rejected() {
        let k = sample(false);
        let mut w = WriteCursor::new();
        k.encode(&mut w);
        let mut bytes = w.into_bytes();
        bytes[4..6].copy_from_slice(&(KEY_VERSION + 5).to_be_bytes());
        let mut r = ReadCursor::new(&bytes);
        assert!(matches!(
            Key::decode(&mut r),
            Err(Error::UnsupportedVersion { .. })
        ));
    }

    #[test]
    fn truncated_key_is_out_of_bounds() {
        let k = sample(false);
        let mut w = WriteCursor::new();
        k.encode(&mut w);
        let bytes = w.into_bytes();
        let mut r = ReadCursor::new(&bytes[..10]);
        assert!(matches!(
            Key::decode(&mut r),
            Err(Error::OutOfBounds { .. })
        ));
    }
}
