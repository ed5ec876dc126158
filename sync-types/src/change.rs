//! Change notifications flowing from watchers to the executor.

use std::path::PathBuf;
use std::time::SystemTime;

/// Kind of filesystem change observed for a path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChangeKind {
    /// Path appeared.
    Created,
    /// Contents or metadata changed.
    Modified,
    /// Path disappeared.
    Deleted,
    /// Path was the source of a rename.
    RenamedFrom,
    /// Path was the target of a rename.
    RenamedTo,
}

impl ChangeKind {
    /// Collapse rename halves into the plain delete/create they imply.
    pub fn normalized(self) -> Self {
        match self {
            ChangeKind::RenamedFrom => ChangeKind::Deleted,
            ChangeKind::RenamedTo => ChangeKind::Created,
            other => other,
        }
    }
}

/// A change as reported by a change source, before coalescing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RawChange {
    /// A single path changed.
    Path {
        /// Absolute path under the input root.
        path: PathBuf,
        /// What happened.
        kind: ChangeKind,
    },
    /// A rename where both ends are known.
    Rename {
        /// Old absolute path.
        from: PathBuf,
        /// New absolute path.
        to: PathBuf,
    },
    /// Events were lost; the tree must be reconciled.
    Rescan,
}

impl RawChange {
    /// Shorthand for a single-path change.
    pub fn path(path: impl Into<PathBuf>, kind: ChangeKind) -> Self {
        RawChange::Path {
            path: path.into(),
            kind,
        }
    }
}

/// A normalized change delivered to the executor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeEvent {
    /// Absolute path under the input root.
    pub absolute_path: PathBuf,
    /// Normalized kind: never a rename half.
    pub kind: ChangeKind,
    /// When the change was first observed.
    pub observed_at: SystemTime,
}

impl ChangeEvent {
    /// Event observed now.
    pub fn new(absolute_path: impl Into<PathBuf>, kind: ChangeKind) -> Self {
        Self {
            absolute_path: absolute_path.into(),
            kind: kind.normalized(),
            observed_at: SystemTime::now(),
        }
    }
}
