//! # petra-file
//!
//! The container layer of the PETRA format: fixed header, directories, key
//! index, free-segment list, and decompress-then-decode access to any stored
//! object. Built on `petra-core` cursors/framing and the `petra-schema`
//! generic codec.

pub mod dir;
pub mod file;
pub mod freelist;
pub mod header;
pub mod key;

pub use dir::{DirId, Directory, DIRECTORY_CLASS};
pub use file::{File, FileConfig};
pub use freelist::{FreeList, FreeSegment};
pub use header::{Header, BEGIN, FORMAT_VERSION, LARGE_FILE_BOUNDARY, MAGIC};
pub use key::Key;
