//! Materialization decisions.
//!
//! The executor observes the source stamp, the cached entry and the current
//! destination, then asks this module what to do. Keeping the decision pure
//! makes the short-circuit rules testable without a filesystem.

use std::path::{Path, PathBuf};
use sync_types::{CacheEntry, ContentHash, FileStamp};

/// What currently sits at a destination path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestKind {
    /// Nothing there.
    Missing,
    /// A regular file of the given size.
    File {
        /// Size in bytes.
        size: u64,
    },
    /// A symbolic link with the given target.
    Symlink {
        /// Raw link target.
        target: PathBuf,
    },
    /// A directory.
    Dir,
    /// Anything else (fifo, socket, device).
    Other,
}

/// Plan for a file under the copy policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyPlan {
    /// Cache and destination agree with the source: do nothing.
    Unchanged,
    /// Metadata moved but content may not have: hash the source and compare
    /// against the given digest before copying.
    VerifyHash(ContentHash),
    /// Copy the bytes.
    Copy,
}

/// Decide whether a copy is needed.
///
/// The short-circuits only apply while the destination is still a regular
/// file of the expected size; anything else is drift and forces a copy.
pub fn plan_copy(source: FileStamp, cached: Option<&CacheEntry>, dest: &DestKind) -> CopyPlan {
    let Some(entry) = cached else {
        return CopyPlan::Copy;
    };
    let Some(hash) = &entry.hash else {
        // Previously linked; the allow-set changed.
        return CopyPlan::Copy;
    };
    let dest_size = match dest {
        DestKind::File { size } => *size,
        _ => return CopyPlan::Copy,
    };
    if entry.matches(&source) && dest_size == entry.size {
        CopyPlan::Unchanged
    } else if source.size == entry.size && dest_size == entry.size {
        CopyPlan::VerifyHash(hash.clone())
    } else {
        CopyPlan::Copy
    }
}

/// Plan for a file under the symlink policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkPlan {
    /// A link to the right target is already in place.
    Keep,
    /// Nothing there; create the link.
    Create,
    /// Something else is there (wrong link, copy, directory); replace it.
    Replace,
}

/// Decide what to do for a link that must point at `source`.
pub fn plan_link(source: &Path, dest: &DestKind) -> LinkPlan {
    match dest {
        DestKind::Missing => LinkPlan::Create,
        DestKind::Symlink { target } if target == source => LinkPlan::Keep,
        _ => LinkPlan::Replace,
    }
}
