use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque, immutable block identity.
///
/// Assigned once when a block is created and carried unchanged through
/// moves, detach/re-attach and undo/redo. Diagnostics, selection and
/// navigation all key on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Uid(Uuid);

impl Uid {
    /// A new, never-before-issued identifier.
    pub fn fresh() -> Self {
        Uid(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// First eight hex digits, for human-facing messages.
    pub fn short(&self) -> String {
        let mut s = self.0.simple().to_string();
        s.truncate(8);
        s
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
