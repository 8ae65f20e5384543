//! Directories: the filesystem-like namespace inside one container.
//!
//! A directory owns an ordered key list plus nested sub-directories; the
//! arena lives in [`File`](crate::file::File) and children are referenced by
//! index, never by back-pointer. On disk a directory is two records:
//!
//! ```text
//! directory record (envelope-wrapped, always 8-byte seeks):
//!   nbytes_keys u32   length of the key-list record
//!   nbytes_name u32   length of the name record (root only, else 0)
//!   seek_dir    u64   offset of this record
//!   seek_parent u64   offset of the parent's record (0 for the root)
//!   seek_keys   u64   offset of the key-list record
//!
//! key-list record (keyed): u32 key count, then each key header
//! ```
//!
//! The root's directory record sits in a reserved slot right after the name
//! record at `begin`, so it can be rewritten in place at every close;
//! sub-directory records are ordinary keyed objects of class `PDirectory`.

use crate::key::Key;
use petra_core::cursor::{ReadCursor, WriteCursor};
use petra_core::envelope::{check_envelope, close_envelope, read_envelope, write_envelope};
use petra_core::error::{Error, Result};

/// Class name of directory records and key-list records.
pub const DIRECTORY_CLASS: &str = "PDirectory";

/// Directory record version; always written with the large offset so the
/// record size is pointer-width independent.
pub const DIR_VERSION: u16 = 1;
const DIR_LARGE_OFFSET: u16 = 1000;

/// Reserved size of the root directory record slot.
pub const DIR_RECORD_RESERVED: u32 = 64;

/// Upper bound on key counts read from one key-list record.
const MAX_KEYS: u32 = 1 << 24;

/// Index of a directory in the file's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirId(pub(crate) usize);

impl DirId {
    /// The root directory.
    pub const ROOT: DirId = DirId(0);
}

/// In-memory directory state.
#[derive(Debug)]
pub struct Directory {
    pub name: String,
    pub title: String,
    pub keys: Vec<Key>,
    pub(crate) parent: Option<usize>,
    pub(crate) children: Vec<usize>,
    // Record bookkeeping, mirrored on disk.
    pub(crate) nbytes_keys: u32,
    pub(crate) nbytes_name: u32,
    pub(crate) seek_dir: u64,
    pub(crate) seek_parent: u64,
    pub(crate) seek_keys: u64,
}

impl Directory {
    pub(crate) fn new(name: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            title: title.into(),
            keys: Vec::new(),
            parent: None,
            children: Vec::new(),
            nbytes_keys: 0,
            nbytes_name: 0,
            seek_dir: 0,
            seek_parent: 0,
            seek_keys: 0,
        }
    }

    /// The key with the given name and the highest cycle.
    pub fn best_key(&self, name: &str) -> Option<&Key> {
        self.keys
            .iter()
            .filter(|k| k.name == name)
            .max_by_key(|k| k.cycle)
    }

    /// The key with an explicit cycle.
    pub fn key_at_cycle(&self, name: &str, cycle: u16) -> Option<&Key> {
        self.keys
            .iter()
            .find(|k| k.name == name && k.cycle == cycle)
    }

    /// Cycle number the next write under `name` should use.
    pub fn next_cycle(&self, name: &str) -> u16 {
        self.best_key(name).map(|k| k.cycle + 1).unwrap_or(1)
    }

    /// Ordered view of every key, superseded cycles included.
    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    /// Encode the directory record (fits inside `DIR_RECORD_RESERVED`).
    pub(crate) fn encode_record(&self) -> Vec<u8> {
        let mut w = WriteCursor::new();
        let h = write_envelope(&mut w, DIR_VERSION + DIR_LARGE_OFFSET);
        w.write_u32(self.nbytes_keys);
        w.write_u32(self.nbytes_name);
        w.write_u64(self.seek_dir);
        w.write_u64(self.seek_parent);
        w.write_u64(self.seek_keys);
        close_envelope(&mut w, h);
        let out = w.into_bytes();
        debug_assert!(out.len() <= DIR_RECORD_RESERVED as usize);
        out
    }

    /// Decode a directory record into an otherwise-empty directory.
    pub(crate) fn decode_record(
        name: impl Into<String>,
        title: impl Into<String>,
        r: &mut ReadCursor<'_>,
    ) -> Result<Self> {
        let env = read_envelope(r)?;
        let base = env.vers % DIR_LARGE_OFFSET;
        if base > DIR_VERSION {
            return Err(Error::UnsupportedVersion {
                class: DIRECTORY_CLASS.to_string(),
                got: base,
                known: DIR_VERSION,
            });
        }
        let large = env.vers > DIR_LARGE_OFFSET;
        let mut dir = Directory::new(name, title);
        dir.nbytes_keys = r.read_u32()?;
        dir.nbytes_name = r.read_u32()?;
        if large {
            dir.seek_dir = r.read_u64()?;
            dir.seek_parent = r.read_u64()?;
            dir.seek_keys = r.read_u64()?;
        } else {
            dir.seek_dir = r.read_u32()? as u64;
            dir.seek_parent = r.read_u32()? as u64;
            dir.seek_keys = r.read_u32()? as u64;
        }
        check_envelope(r, &env, DIRECTORY_CLASS)?;
        Ok(dir)
    }

    /// Encode the key-list payload (count + key headers).
    pub(crate) fn encode_key_list(&self) -> Vec<u8> {
        let mut w = WriteCursor::new();
        w.write_u32(self.keys.len() as u32);
        for k in &self.keys {
            k.encode(&mut w);
        }
        w.into_bytes()
    }

    /// Decode a key-list payload into this directory.
    pub(crate) fn decode_key_list(&mut self, r: &mut ReadCursor<'_>) -> Result<()> {
        let n = r.read_u32()?;
        if n > MAX_KEYS {
            return Err(Error::invalid_file(format!(
                "directory {:?} declares {n} keys",
                self.name
            )));
        }
        self.keys.clear();
        self.keys.reserve(n as usize);
        for _ in 0..n {
            self.keys.push(Key::decode(r)?);
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str, cycle: u16) -> Key {
        Key::new("PString", name, "", cycle, 10, 10, 0x400, 0x100, false)
    }

    #[test]
    fn cycle_resolution() {
        let mut dir = Directory::new("root", "");
        dir.keys.push(key("a", 1));
        dir.keys.push(key("b", 1));
        dir.keys.push(key("a", 2));
        assert_eq!(dir.best_key("a").unwrap().cycle, 2);
        assert_eq!(dir.key_at_cycle("a", 1).unwrap().cycle, 1);
        assert_eq!(dir.next_cycle("a"), 3);
        assert_eq!(dir.next_cycle("new"), 1);
        assert!(dir.best_key("missing").is_none());
    }

    #[test]
    fn record_round_trip() {
        let mut dir = Directory::new("root", "t");
        dir.nbytes_keys = 123;
        dir.nbytes_name = 40;
        dir.seek_dir = 300;
        dir.seek_parent = 0;
        dir.seek_keys = 9000;
        let bytes = dir.encode_record();
        assert!(bytes.len() <= DIR_RECORD_RESERVED as usize);
        let mut r = ReadCursor::new(&bytes);
        let back = Directory::decode_record("root", "t", &mut r).unwrap();
        assert_eq!(back.nbytes_keys, 123);
        assert_eq!(back.seek_keys, 9000);
    }

    #[test]
    fn key_list_round_trip() {
        let mut dir = Directory::new("root", "");
        dir.keys.push(key("a", 1));
        dir.keys.push(key("a", 2));
        dir.keys.push(key("b", 1));
        let bytes = dir.encode_key_list();
        let mut back = Directory::new("root", "");
        let mut r = ReadCursor::new(&bytes);
        back.decode_key_list(&mut r).unwrap();
        assert_eq!(back.keys, dir.keys);
    }

    #[test]
    fn empty_key_list_round_trip() {
        let dir = Directory::new("root", "");
        let bytes = dir.encode_key_list();
        assert_eq!(bytes, vec![0, 0, 0, 0]);
        let mut back = Directory::new("root", "");
        let mut r = ReadCursor::new(&bytes);
        back.decode_key_list(&mut r).unwrap();
        assert!(back.keys.is_empty());
    }
}
