//! # petra-core
//!
//! Low-level building blocks of the PETRA container format: big-endian
//! binary cursors, the versioned object envelope, compression block framing,
//! and the byte source/sink traits files are opened over.
//!
//! Everything here is synchronous and allocation-explicit; higher layers
//! (`petra-schema`, `petra-file`, `petra-tree`) compose these primitives
//! into the self-describing object store.

pub mod block;
pub mod cursor;
pub mod envelope;
pub mod error;
pub mod store;

pub use block::{compress, decompress, Algorithm, Settings, MAX_BLOCK_PAYLOAD};
pub use cursor::{ReadCursor, WriteCursor};
pub use envelope::{
    check_envelope, close_envelope, read_envelope, write_envelope, Envelope, EnvelopeHandle,
};
pub use error::{Error, Result};
pub use store::{DiskStore, MemStore, ReadAt, WriteAt};
