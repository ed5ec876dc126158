//! Sync decisions derived from a change and the extension allow-set.

use crate::ids::RelPath;
use std::fmt;

/// How a source file is materialized in the destination.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Policy {
    /// Byte copy (extension is in the allow-set).
    Copy,
    /// Absolute symlink back to the source.
    Symlink,
}

/// What the executor does to a destination path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ActionPolicy {
    /// Copy bytes from the source.
    Copy,
    /// Point a symlink at the source.
    Symlink,
    /// Remove the destination entry.
    Delete,
}

impl From<Policy> for ActionPolicy {
    fn from(policy: Policy) -> Self {
        match policy {
            Policy::Copy => ActionPolicy::Copy,
            Policy::Symlink => ActionPolicy::Symlink,
        }
    }
}

impl fmt::Display for ActionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionPolicy::Copy => f.write_str("copy"),
            ActionPolicy::Symlink => f.write_str("symlink"),
            ActionPolicy::Delete => f.write_str("delete"),
        }
    }
}

/// A planned operation on one relative path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncAction {
    /// Key relative to both roots.
    pub relative_path: RelPath,
    /// What to do.
    pub policy: ActionPolicy,
}
