//! Compression block framing.
//!
//! Stored payloads larger than a threshold are wrapped in one or more
//! compression blocks:
//!
//! ```text
//! [tag: 4B]   2 ASCII magic bytes + method byte + reserved 0
//! [compressed size:   3B little-endian]
//! [uncompressed size: 3B little-endian]
//! [payload: compressed-size bytes]
//! ```
//!
//! The 3-byte size fields cap a single block at `0xFF_FFFF` uncompressed
//! bytes; larger payloads are split across consecutive blocks and
//! decompression loops until the declared total is reached. LZ4 payloads
//! carry an 8-byte big-endian xxhash64 checksum of the compressed bytes
//! between header and data.
//!
//! Whole-object fallback: when compression is off, the input is tiny, or no
//! block ends up smaller than its input, [`compress`] returns `None` and the
//! caller stores the bytes raw with no framing. Readers detect the raw case
//! upstream (stored size == uncompressed size), so [`decompress`] only ever
//! sees framed input.

use crate::error::{Error, Result};

/// Block header length: 4-byte tag + two 3-byte sizes.
pub const BLOCK_HEADER_LEN: usize = 10;

/// Maximum uncompressed bytes addressable by one block's 3-byte size field.
pub const MAX_BLOCK_PAYLOAD: usize = 0xFF_FFFF;

/// Inputs below this length are never worth framing; stored raw.
const MIN_COMPRESS_LEN: usize = 512;

/// Length of the xxhash64 checksum prefix inside LZ4 block payloads.
const LZ4_CHECKSUM_LEN: usize = 8;

/// Compression algorithm identifiers as stored in the container header
/// (`algorithm * 100 + level`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Algorithm {
    None = 0,
    Lz4 = 4,
    Zstd = 5,
}

/// Compression algorithm + level, the `fCompress`-style setting carried in
/// the file header and tree configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    pub alg: Algorithm,
    pub level: i32,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            alg: Algorithm::Zstd,
            level: 3,
        }
    }
}

impl Settings {
    /// No compression: every payload is stored raw.
    pub fn none() -> Self {
        Settings {
            alg: Algorithm::None,
            level: 0,
        }
    }

    /// Encode as the single `algorithm * 100 + level` header integer.
    pub fn to_id(self) -> u32 {
        self.alg as u32 * 100 + self.level.clamp(0, 99) as u32
    }

    /// Decode the header integer; unknown algorithm codes fail.
    pub fn from_id(id: u32) -> Result<Self> {
        let level = (id % 100) as i32;
        let alg = match id / 100 {
            0 => Algorithm::None,
            4 => Algorithm::Lz4,
            5 => Algorithm::Zstd,
            code => {
                return Err(Error::compression(format!(
                    "unknown compression algorithm code {code}"
                )))
            }
        };
        Ok(Settings { alg, level })
    }
}

/// Compress `src` into framed blocks.
///
/// Returns `None` when the input should be stored raw: compression disabled,
/// input under the minimum length, or the framed output not smaller than the
/// input.
pub fn compress(src: &[u8], settings: Settings) -> Result<Option<Vec<u8>>> {
    if settings.alg == Algorithm::None || src.len() < MIN_COMPRESS_LEN {
        return Ok(None);
    }

    let mut out = Vec::with_capacity(src.len() / 2);
    for chunk in src.chunks(MAX_BLOCK_PAYLOAD) {
        if !compress_block(&mut out, chunk, settings)? {
            // One incompressible chunk voids the whole framing.
            return Ok(None);
        }
    }

    if out.len() >= src.len() {
        return Ok(None);
    }
    tracing::trace!(
        raw = src.len(),
        compressed = out.len(),
        alg = ?settings.alg,
        "payload compressed"
    );
    Ok(Some(out))
}

/// Compress one chunk, appending a framed block to `out`.
/// Returns false when the chunk did not shrink.
fn compress_block(out: &mut Vec<u8>, chunk: &[u8], settings: Settings) -> Result<bool> {
    let header_at = out.len();
    match settings.alg {
        Algorithm::Lz4 => {
            out.extend_from_slice(&[b'L', b'4', 1, 0]);
            out.extend_from_slice(&[0; 6]); // sizes, patched below
            let data = lz4_flex::block::compress(chunk);
            let payload_len = data.len() + LZ4_CHECKSUM_LEN;
            if payload_len >= chunk.len() {
                out.truncate(header_at);
                return Ok(false);
            }
            let sum = twox_hash::XxHash64::oneshot(0, &data);
            out.extend_from_slice(&sum.to_be_bytes());
            out.extend_from_slice(&data);
            patch_sizes(&mut out[header_at..], payload_len, chunk.len());
        }
        Algorithm::Zstd => {
            out.extend_from_slice(&[b'Z', b'S', 1, 0]);
            out.extend_from_slice(&[0; 6]);
            let data = zstd::encode_all(chunk, settings.level)
                .map_err(|e| Error::compression(format!("zstd encode: {e}")))?;
            if data.len() >= chunk.len() {
                out.truncate(header_at);
                return Ok(false);
            }
            out.extend_from_slice(&data);
            patch_sizes(&mut out[header_at..], data.len(), chunk.len());
        }
        Algorithm::None => unreachable!("filtered by compress"),
    }
    Ok(true)
}

fn patch_sizes(block: &mut [u8], compressed: usize, uncompressed: usize) {
    // 3-byte little-endian, the one little-endian corner of the format.
    block[4] = compressed as u8;
    block[5] = (compressed >> 8) as u8;
    block[6] = (compressed >> 16) as u8;
    block[7] = uncompressed as u8;
    block[8] = (uncompressed >> 8) as u8;
    block[9] = (uncompressed >> 16) as u8;
}

fn read_size3(b: &[u8]) -> usize {
    b[0] as usize | (b[1] as usize) << 8 | (b[2] as usize) << 16
}

/// Decompress framed blocks until `expected_len` bytes are produced.
pub fn decompress(src: &[u8], expected_len: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(expected_len);
    let mut cur = 0usize;

    while out.len() < expected_len {
        if src.len() - cur < BLOCK_HEADER_LEN {
            return Err(Error::compression(format!(
                "truncated block header at offset {cur}"
            )));
        }
        let hdr = &src[cur..cur + BLOCK_HEADER_LEN];
        let csize = read_size3(&hdr[4..7]);
        let usize_decl = read_size3(&hdr[7..10]);
        let body_at = cur + BLOCK_HEADER_LEN;
        if src.len() - body_at < csize {
            return Err(Error::compression(format!(
                "truncated block payload at offset {body_at}: need {csize} bytes"
            )));
        }
        let payload = &src[body_at..body_at + csize];

        let chunk = match (hdr[0], hdr[1]) {
            (b'L', b'4') => {
                if csize < LZ4_CHECKSUM_LEN {
                    return Err(Error::compression("lz4 block shorter than its checksum"));
                }
                let (sum_bytes, data) = payload.split_at(LZ4_CHECKSUM_LEN);
                let declared = u64::from_be_bytes(sum_bytes.try_into().expect("sized slice"));
                let actual = twox_hash::XxHash64::oneshot(0, data);
                if declared != actual {
                    return Err(Error::compression(format!(
                        "lz4 checksum mismatch: stored {declared:#018x}, computed {actual:#018x}"
                    )));
                }
                lz4_flex::block::decompress(data, usize_decl)
                    .map_err(|e| Error::compression(format!("lz4 decode: {e}")))?
            }
            (b'Z', b'S') => zstd::decode_all(payload)
                .map_err(|e| Error::compression(format!("zstd decode: {e}")))?,
            (a, b) => {
                return Err(Error::compression(format!(
                    "unknown block tag {:?}{:?} at offset {cur}",
                    a as char, b as char
                )))
            }
        };
        if chunk.len() != usize_decl {
            return Err(Error::compression(format!(
                "block inflated to {} bytes, header declared {usize_decl}",
                chunk.len()
            )));
        }
        out.extend_from_slice(&chunk);
        cur = body_at + csize;
    }

    if out.len() != expected_len {
        return Err(Error::compression(format!(
            "decompressed {} bytes, expected {expected_len}",
            out.len()
        )));
    }
    Ok(out)
}

// =============================================================================
// Tests
// =============================================================================
