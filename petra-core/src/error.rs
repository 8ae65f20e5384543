//! Error types shared across the petra crates.

use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type.
///
/// Decode failures are fatal to the current object only: a `File` or tree
/// handle stays usable after a failed `get`/`read_entry`. Nothing here is
/// reachable through a panic from untrusted input.
#[derive(Error, Debug)]
pub enum Error {
    /// Cursor read past the end of its buffer.
    #[error("out of bounds: need {want} byte(s) at position {pos}, buffer holds {len}")]
    OutOfBounds { pos: usize, want: usize, len: usize },

    /// Envelope byte count does not carry the marker bit.
    #[error("bad envelope: byte count 0x{count:08x} lacks the marker bit")]
    BadEnvelope { count: u32 },

    /// Bytes consumed while decoding differ from the envelope's declared count.
    #[error("{class}: envelope byte count mismatch (got {got}, want {want})")]
    ByteCountMismatch { class: String, got: u32, want: u32 },

    /// On-disk version is newer than anything the registry knows for the class.
    #[error("{class}: version {got} is newer than newest known version {known}")]
    UnsupportedVersion { class: String, got: u16, known: u16 },

    /// Class was never registered and the file carries no streamer info for it.
    #[error("unknown schema for class {class:?} version {version}")]
    UnknownSchema { class: String, version: u16 },

    /// Corrupt or truncated compressed block.
    #[error("compression error: {0}")]
    Compression(String),

    /// Ordering violation in the columnar fill/read path: a variable-length
    /// leaf was touched before its count leaf for the same entry.
    #[error("count leaf {count:?} for leaf {leaf:?} not yet filled/read for this entry")]
    CountLeafNotYetRead { leaf: String, count: String },

    /// Write-time I/O failure during close.
    #[error("flush failed: {0}")]
    Flush(String),

    /// Key lookup failed.
    #[error("not found: {0}")]
    NotFound(String),

    /// Bad magic bytes or a malformed container header.
    #[error("invalid file: {0}")]
    InvalidFile(String),

    /// Programmer misuse that is not data-dependent (wrong value arity,
    /// filling a closed tree, ...).
    #[error("misuse: {0}")]
    Misuse(String),

    /// I/O error from the underlying byte store.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a compression error
    pub fn compression(msg: impl Into<String>) -> Self {
        Error::Compression(msg.into())
    }

    /// Create a flush error
    pub fn flush(msg: impl Into<String>) -> Self {
        Error::Flush(msg.into())
    }

    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    /// Create an invalid file error
    pub fn invalid_file(msg: impl Into<String>) -> Self {
        Error::InvalidFile(msg.into())
    }

    /// Create a misuse error
    pub fn misuse(msg: impl Into<String>) -> Self {
        Error::Misuse(msg.into())
    }
}
