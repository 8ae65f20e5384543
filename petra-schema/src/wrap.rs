//! Built-in primitive wrapper classes.
//!
//! Plain values (a string under a key, say) still need a class name and an
//! envelope to live in the container; these wrappers provide that. They are
//! factory-seeded by [`Registry::new`](crate::registry::Registry::new), so a
//! fresh registry can decode them without any file-supplied schema.

use crate::obj::{Object, Streamed};
use crate::registry::Registry;
use petra_core::cursor::{ReadCursor, WriteCursor};
use petra_core::envelope::{check_envelope, close_envelope, read_envelope, write_envelope};
use petra_core::error::{Error, Result};
use std::any::Any;

/// A named string value.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PString {
    pub name: String,
    pub value: String,
}

impl PString {
    pub const CLASS: &'static str = "PString";
    const VERSION: u16 = 1;

    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl Object for PString {
    fn class(&self) -> &str {
        Self::CLASS
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Streamed for PString {
    fn unmarshal(&mut self, r: &mut ReadCursor<'_>, _reg: &Registry) -> Result<()> {
        let env = read_envelope(r)?;
        if env.vers > Self::VERSION {
            return Err(Error::UnsupportedVersion {
                class: Self::CLASS.to_string(),
                got: env.vers,
                known: Self::VERSION,
            });
        }
        self.name = r.read_string()?;
        self.value = r.read_string()?;
        check_envelope(r, &env, Self::CLASS)
    }

    fn marshal(&self, w: &mut WriteCursor, _reg: &Registry) -> Result<()> {
        let h = write_envelope(w, Self::VERSION);
        w.write_string(&self.name);
        w.write_string(&self.value);
        close_envelope(w, h);
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
