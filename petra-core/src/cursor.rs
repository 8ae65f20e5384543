//! Binary cursors: big-endian primitive reads/writes over an in-memory window.
//!
//! `ReadCursor` walks a borrowed byte slice, advancing monotonically; there is
//! no backward seek. Callers snapshot `pos()` before a sub-decode to compute
//! consumed bytes (the envelope check relies on this). `WriteCursor` grows an
//! owned buffer lazily and allows exactly one kind of backward access:
//! `patch_u32`, used to back-patch reserved length slots.
//!
//! All multi-byte integers and floats are big-endian on the wire.
//!
//! String encoding: 1-byte length, or `0xFF` followed by a 4-byte length for
//! strings of 255 bytes or more; payload is raw UTF-8.

use crate::error::{Error, Result};

/// Escape byte signalling a 4-byte string length.
const LONG_STRING: u8 = 0xFF;

// ============================================================================
// ReadCursor
// ============================================================================

/// Forward-only big-endian reader over a byte slice.
#[derive(Debug)]
pub struct ReadCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

macro_rules! impl_read_be {
    ($(($fn:ident, $arr:ident, $ty:ty)),* $(,)?) => {
        $(
            #[doc = concat!("Read one big-endian `", stringify!($ty), "`.")]
            pub fn $fn(&mut self) -> Result<$ty> {
                let raw = self.take(std::mem::size_of::<$ty>())?;
                Ok(<$ty>::from_be_bytes(raw.try_into().expect("sized slice")))
            }

            #[doc = concat!("Read `n` consecutive big-endian `", stringify!($ty), "` values.")]
            pub fn $arr(&mut self, n: usize) -> Result<Vec<$ty>> {
                let mut out = Vec::with_capacity(n);
                for _ in 0..n {
                    out.push(self.$fn()?);
                }
                Ok(out)
            }
        )*
    };
}

impl<'a> ReadCursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Current position within the window.
    #[inline]
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Bytes left before the end of the window.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Consume `n` bytes, failing with `OutOfBounds` instead of truncating.
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(Error::OutOfBounds {
                pos: self.pos,
                want: n,
                len: self.buf.len(),
            });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    /// Read `n` raw bytes.
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.take(n)
    }

    /// Advance past `n` bytes without decoding them.
    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n).map(|_| ())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(self.take(1)?[0] as i8)
    }

    /// Read a 1-byte boolean (any nonzero byte is `true`).
    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    impl_read_be!(
        (read_u16, read_array_u16, u16),
        (read_i16, read_array_i16, i16),
        (read_u32, read_array_u32, u32),
        (read_i32, read_array_i32, i32),
        (read_u64, read_array_u64, u64),
        (read_i64, read_array_i64, i64),
        (read_f32, read_array_f32, f32),
        (read_f64, read_array_f64, f64),
    );

    /// Read `n` raw bytes into an owned vector (the `u8` array shape).
    pub fn read_array_u8(&mut self, n: usize) -> Result<Vec<u8>> {
        Ok(self.take(n)?.to_vec())
    }

    /// Read `n` consecutive `i8` values.
    pub fn read_array_i8(&mut self, n: usize) -> Result<Vec<i8>> {
        Ok(self.take(n)?.iter().map(|&b| b as i8).collect())
    }

    /// Read `n` consecutive 1-byte booleans.
    pub fn read_array_bool(&mut self, n: usize) -> Result<Vec<bool>> {
        Ok(self.take(n)?.iter().map(|&b| b != 0).collect())
    }

    /// Read a length-prefixed string.
    pub fn read_string(&mut self) -> Result<String> {
        let mut n = self.read_u8()? as usize;
        if n == LONG_STRING as usize {
            n = self.read_u32()? as usize;
        }
        let raw = self.take(n)?;
        String::from_utf8(raw.to_vec())
            .map_err(|e| Error::invalid_file(format!("non-UTF-8 string at {}: {e}", self.pos - n)))
    }
}

// ============================================================================
// WriteCursor
// ============================================================================

/// Big-endian writer over a lazily grown buffer.
#[derive(Debug, Default)]
pub struct WriteCursor {
    buf: Vec<u8>,
}

macro_rules! impl_write_be {
    ($(($fn:ident, $arr:ident, $ty:ty)),* $(,)?) => {
        $(
            #[doc = concat!("Write one big-endian `", stringify!($ty), "`.")]
            pub fn $fn(&mut self, v: $ty) {
                self.buf.extend_from_slice(&v.to_be_bytes());
            }

            #[doc = concat!("Write a run of big-endian `", stringify!($ty), "` values.")]
            pub fn $arr(&mut self, vs: &[$ty]) {
                for &v in vs {
                    self.$fn(v);
                }
            }
        )*
    };
}

impl WriteCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current position (== bytes written so far).
    #[inline]
    pub fn pos(&self) -> usize {
        self.buf.len()
    }

    /// Consume the cursor, yielding the written bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// View the written bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn write_bytes(&mut self, v: &[u8]) {
        self.buf.extend_from_slice(v);
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_i8(&mut self, v: i8) {
        self.buf.push(v as u8);
    }

    pub fn write_bool(&mut self, v: bool) {
        self.buf.push(v as u8);
    }

    impl_write_be!(
        (write_u16, write_array_u16, u16),
        (write_i16, write_array_i16, i16),
        (write_u32, write_array_u32, u32),
        (write_i32, write_array_i32, i32),
        (write_u64, write_array_u64, u64),
        (write_i64, write_array_i64, i64),
        (write_f32, write_array_f32, f32),
        (write_f64, write_array_f64, f64),
    );

    pub fn write_array_u8(&mut self, vs: &[u8]) {
        self.buf.extend_from_slice(vs);
    }

    pub fn write_array_i8(&mut self, vs: &[i8]) {
        self.buf.extend(vs.iter().map(|&v| v as u8));
    }

    pub fn write_array_bool(&mut self, vs: &[bool]) {
        self.buf.extend(vs.iter().map(|&v| v as u8));
    }

    /// Write a length-prefixed string.
    pub fn write_string(&mut self, s: &str) {
        let n = s.len();
        if n >= LONG_STRING as usize {
            self.write_u8(LONG_STRING);
            self.write_u32(n as u32);
        } else {
            self.write_u8(n as u8);
        }
        self.buf.extend_from_slice(s.as_bytes());
    }

    /// Roll back to an earlier position, discarding bytes written after it.
    /// Used to unwind a partially encoded entry after a failed write.
    pub fn truncate(&mut self, pos: usize) {
        self.buf.truncate(pos);
    }

    /// Back-patch a previously written (or reserved) u32 slot at `pos`.
    ///
    /// Panics if the slot is not fully inside the written region; reserving
    /// the slot first is the caller's contract, not a data-dependent state.
    pub fn patch_u32(&mut self, pos: usize, v: u32) {
        self.buf[pos..pos + 4].copy_from_slice(&v.to_be_bytes());
    }
}

// =============================================================================
// Tests
// =============================================================================
