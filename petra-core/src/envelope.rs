//! Object envelope: the `(byte count, version)` header wrapping every
//! non-primitive encoded value.
//!
//! Wire layout:
//!
//! ```text
//! [byte count: u32, bit 30 set]  covers version + payload
//! [version:    u16]
//! [payload ...]
//! ```
//!
//! A writer reserves the count slot, writes the version and payload, then
//! back-patches the count. A reader snapshots the cursor position before the
//! count and, after decoding the payload, verifies the cursor advanced by
//! exactly `4 + count` bytes. A mismatch means the stream and the decoder
//! disagree about the layout — the current object is corrupt.

use crate::cursor::{ReadCursor, WriteCursor};
use crate::error::{Error, Result};

/// Marker bit distinguishing a byte count from legacy count-less headers.
pub const BYTE_COUNT_MASK: u32 = 0x4000_0000;

/// A decoded envelope header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Envelope {
    /// Version of the encoded object.
    pub vers: u16,
    /// Declared payload length (version field included, count field not).
    pub count: u32,
    /// Cursor position of the first count byte.
    pub start: usize,
}

/// Handle for an envelope opened by [`write_envelope`]; closing it
/// back-patches the byte count.
#[derive(Debug)]
#[must_use = "an open envelope must be closed to patch its byte count"]
pub struct EnvelopeHandle {
    count_pos: usize,
}

/// Reserve a byte-count slot and write the version.
pub fn write_envelope(w: &mut WriteCursor, vers: u16) -> EnvelopeHandle {
    let count_pos = w.pos();
    w.write_u32(0); // reserved, patched by close_envelope
    w.write_u16(vers);
    EnvelopeHandle { count_pos }
}

/// Back-patch the byte count of an envelope opened by [`write_envelope`].
pub fn close_envelope(w: &mut WriteCursor, handle: EnvelopeHandle) {
    let count = (w.pos() - handle.count_pos - 4) as u32;
    w.patch_u32(handle.count_pos, count | BYTE_COUNT_MASK);
}

/// Read an envelope header, validating the marker bit.
pub fn read_envelope(r: &mut ReadCursor<'_>) -> Result<Envelope> {
    let start = r.pos();
    let raw = r.read_u32()?;
    if raw & BYTE_COUNT_MASK == 0 {
        return Err(Error::BadEnvelope { count: raw });
    }
    let count = raw & !BYTE_COUNT_MASK;
    let vers = r.read_u16()?;
    Ok(Envelope { vers, count, start })
}

/// Verify the cursor consumed exactly the declared byte count since
/// `env.start`.
pub fn check_envelope(r: &ReadCursor<'_>, env: &Envelope, class: &str) -> Result<()> {
    let want = env.count;
    let got = (r.pos() - env.start) as u32 - 4;
    if got != want {
        return Err(Error::ByteCountMismatch {
            class: class.to_string(),
            got,
            want,
        });
    }
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_round_trip() {
        let mut w = WriteCursor::new();
        let h = write_envelope(&mut w, 3);
        w.write_i32(42);
        w.write_string("payload");
        close_envelope(&mut w, h);

        let bytes = w.into_bytes();
        let mut r = ReadCursor::new(&bytes);
        let env = read_envelope(&mut r).unwrap();
        assert_eq!(env.vers, 3);
        assert_eq!(env.count as usize, bytes.len() - 4);
        assert_eq!(r.read_i32().unwrap(), 42);
        assert_eq!(r.read_string().unwrap(), "payload");
        check_envelope(&r, &env, "Thing").unwrap();
    }

    #[test]
    fn missing_marker_bit_is_bad_envelope() {
        let mut w = WriteCursor::new();
        w.write_u32(12); // no marker bit
        w.write_u16(1);
        let bytes = w.into_bytes();
        let mut r = ReadCursor::new(&bytes);
        match read_envelope(&mut r) {
            Err(Error::BadEnvelope { count }) => assert_eq!(count, 12),
            other => panic!("expected BadEnvelope, got {other:?}"),
        }
    }

    #[test]
    fn short_decode_is_byte_count_mismatch() {
        let mut w = WriteCursor::new();
        let h = write_envelope(&mut w, 1);
        w.write_i32(7);
        w.write_i32(8);
        close_envelope(&mut w, h);

        let bytes = w.into_bytes();
        let mut r = ReadCursor::new(&bytes);
        let env = read_envelope(&mut r).unwrap();
        let _ = r.read_i32().unwrap(); // decoder stops one field early
        match check_envelope(&r, &env, "Thing") {
            Err(Error::ByteCountMismatch { class, got, want }) => {
                assert_eq!(class, "Thing");
                assert_eq!(got, 6);
                assert_eq!(want, 10);
            }
            other => panic!("expected ByteCountMismatch, got {other:?}"),
        }
    }

    #[test]
    fn nested_envelopes() {
        let mut w = WriteCursor::new();
        let outer = write_envelope(&mut w, 2);
        w.write_u8(1);
        let inner = write_envelope(&mut w, 5);
        w.write_f64(1.5);
        close_envelope(&mut w, inner);
        close_envelope(&mut w, outer);

        let bytes = w.into_bytes();
        let mut r = ReadCursor::new(&bytes);
        let oenv = read_envelope(&mut r).unwrap();
        assert_eq!(r.read_u8().unwrap(), 1);
        let ienv = read_envelope(&mut r).unwrap();
        assert_eq!(ienv.vers, 5);
        assert_eq!(r.read_f64().unwrap(), 1.5);
        check_envelope(&r, &ienv, "Inner").unwrap();
        check_envelope(&r, &oenv, "Outer").unwrap();
    }
}
