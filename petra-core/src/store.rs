//! Byte source/sink traits the container is read from and written to.
//!
//! The core is synchronous: the only suspension points are `read_at` /
//! `write_at`, so an async transport wraps one of these traits at its own
//! seam. A remote-file protocol client is usable as a backing store by
//! implementing `ReadAt` — nothing else in the stack knows the difference.

use crate::error::{Error, Result};
use parking_lot::{Mutex, RwLock};
use std::fmt::Debug;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Positioned reads over an immutable-length-agnostic byte source.
pub trait ReadAt: Debug + Send + Sync {
    /// Fill `buf` from `offset`; short reads are errors.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Total size of the source in bytes.
    fn size(&self) -> Result<u64>;
}

/// Positioned writes; extends reads so a writer can re-open what it wrote.
pub trait WriteAt: ReadAt {
    /// Write `data` at `offset`, extending the sink as needed.
    fn write_at(&self, offset: u64, data: &[u8]) -> Result<()>;

    /// Commit written data to stable storage.
    fn sync(&self) -> Result<()>;
}

// ============================================================================
// MemStore
// ============================================================================

/// In-memory byte store. Used by tests and as a staging target for callers
/// that ship whole files elsewhere.
#[derive(Debug, Default)]
pub struct MemStore {
    buf: RwLock<Vec<u8>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap existing bytes (e.g. a file fetched over the wire).
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            buf: RwLock::new(bytes),
        }
    }

    /// Snapshot the current contents.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.buf.read().clone()
    }
}

impl ReadAt for MemStore {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let data = self.buf.read();
        let start = offset as usize;
        let end = start + buf.len();
        if end > data.len() {
            return Err(Error::OutOfBounds {
                pos: start,
                want: buf.len(),
                len: data.len(),
            });
        }
        buf.copy_from_slice(&data[start..end]);
        Ok(())
    }

    fn size(&self) -> Result<u64> {
        Ok(self.buf.read().len() as u64)
    }
}

impl WriteAt for MemStore {
    fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        let mut buf = self.buf.write();
        let start = offset as usize;
        let end = start + data.len();
        if end > buf.len() {
            buf.resize(end, 0);
        }
        buf[start..end].copy_from_slice(data);
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// DiskStore
// ============================================================================

/// Local-file byte store. Positioned access is serialized through a mutex so
/// the handle is shareable between concurrent readers of independent blocks.
#[derive(Debug)]
pub struct DiskStore {
    file: Mutex<std::fs::File>,
}

impl DiskStore {
    /// Open an existing file read-only.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    /// Create (or truncate) a file for writing.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl ReadAt for DiskStore {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let mut f = self.file.lock();
        f.seek(SeekFrom::Start(offset))?;
        f.read_exact(buf)?;
        Ok(())
    }

    fn size(&self) -> Result<u64> {
        Ok(self.file.lock().metadata()?.len())
    }
}

impl WriteAt for DiskStore {
    fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        let mut f = self.file.lock();
        f.seek(SeekFrom::Start(offset))?;
        f.write_all(data)?;
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.file.lock().sync_all()?;
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(store: &dyn WriteAt) {
        store.write_at(0, b"hello world").unwrap();
        store.write_at(6, b"petra").unwrap();

        let mut buf = [0u8; 11];
        store.read_at(0, &mut buf).unwrap();
        assert_eq!(&buf, b"hello petra");
        assert_eq!(store.size().unwrap(), 11);

        // Sparse extension zero-fills the gap.
        store.write_at(16, b"!").unwrap();
        let mut tail = [0u8; 6];
        store.read_at(11, &mut tail).unwrap();
        assert_eq!(&tail, b"\0\0\0\0\0!");

        // Reading past the end is an error, not a short read.
        let mut big = [0u8; 32];
        assert!(store.read_at(0, &mut big).is_err());
    }

    #[test]
    fn mem_store_positioned_io() {
        exercise(&MemStore::new());
    }

    #[test]
    fn disk_store_positioned_io() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::create(dir.path().join("t.petra")).unwrap();
        exercise(&store);
        store.sync().unwrap();
    }

    #[test]
    fn disk_store_reopen_read_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.petra");
        {
            let store = DiskStore::create(&path).unwrap();
            store.write_at(0, b"persist me").unwrap();
            store.sync().unwrap();
        }
        let store = DiskStore::open(&path).unwrap();
        let mut buf = [0u8; 10];
        store.read_at(0, &mut buf).unwrap();
        assert_eq!(&buf, b"persist me");
    }
}
