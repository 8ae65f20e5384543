//! Object capability traits.
//!
//! All polymorphism over "any stored class" flows through these two traits
//! plus the registry's factory table — a closed capability set, no runtime
//! reflection. Concrete wrapper types (strings, streamer infos, tree
//! metadata consumers) implement [`Streamed`] by hand; everything else
//! decodes through the schema-driven [`Record`](crate::value::Record) path.

use crate::registry::Registry;
use petra_core::cursor::{ReadCursor, WriteCursor};
use petra_core::error::Result;
use std::any::Any;
use std::fmt::Debug;

/// A decoded stored object.
pub trait Object: Debug + Send {
    /// The stored class name.
    fn class(&self) -> &str;

    /// Downcast support for typed consumers.
    fn as_any(&self) -> &dyn Any;
}

/// An object that can stream itself through the wire format.
pub trait Streamed: Object {
    /// Decode from the cursor, replacing `self`'s contents.
    fn unmarshal(&mut self, r: &mut ReadCursor<'_>, reg: &Registry) -> Result<()>;

    /// Encode to the cursor.
    fn marshal(&self, w: &mut WriteCursor, reg: &Registry) -> Result<()>;
}

/// Constructor producing an empty instance for the decode path.
pub type Factory = fn() -> Box<dyn Streamed>;
