//! # petra-schema
//!
//! Runtime schemas for the PETRA container: streamer descriptors, the
//! session registry, the dynamic value model, and the generic codec that
//! decodes/encodes objects from their on-disk descriptions rather than from
//! compiled types.
//!
//! The wire schema, not the program's type system, drives decoding — that is
//! what lets a reader open files holding class versions that did not exist
//! when it was built.

pub mod codec;
pub mod desc;
pub mod obj;
pub mod registry;
pub mod value;
pub mod wrap;

pub use codec::{decode_any, encode_any};
pub use desc::{
    BasicType, ElementShape, StlKind, StreamerElement, StreamerInfo, STREAMER_INFO_CLASS,
};
pub use obj::{Factory, Object, Streamed};
pub use registry::Registry;
pub use value::{Record, Value};
pub use wrap::PString;
