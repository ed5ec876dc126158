//! Content identity: metadata stamps, content hashes and cache entries.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::Metadata;
use std::time::UNIX_EPOCH;

/// Cheap metadata fingerprint of a file: modification time plus size.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileStamp {
    /// Modification time in nanoseconds since the Unix epoch (negative before it).
    pub mtime_ns: i64,
    /// Size in bytes.
    pub size: u64,
}

impl FileStamp {
    /// Create a stamp from raw values.
    pub fn new(mtime_ns: i64, size: u64) -> Self {
        Self { mtime_ns, size }
    }

    /// Read the stamp from file metadata. Platforms without mtime report 0.
    pub fn from_metadata(meta: &Metadata) -> Self {
        let mtime_ns = match meta.modified() {
            Ok(mtime) => match mtime.duration_since(UNIX_EPOCH) {
                Ok(after) => i64::try_from(after.as_nanos()).unwrap_or(i64::MAX),
                Err(before) => -i64::try_from(before.duration().as_nanos()).unwrap_or(i64::MAX),
            },
            Err(_) => 0,
        };
        Self {
            mtime_ns,
            size: meta.len(),
        }
    }
}

/// Digest of a file's bytes, rendered as `blake3:<hex>`.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    /// Wrap an already formatted digest string.
    pub fn new(digest: impl Into<String>) -> Self {
        Self(digest.into())
    }

    /// Borrow the digest string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = self.0.get(..15).unwrap_or(&self.0);
        write!(f, "ContentHash({short})")
    }
}

/// What the cache remembers about a materialized source file.
///
/// `hash` is present for copied files and absent for symlinked ones,
/// whose content is never read.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Modification time of the source when it was materialized.
    pub mtime_ns: i64,
    /// Size of the source when it was materialized.
    pub size: u64,
    /// Content digest of a copied file.
    #[serde(default)]
    pub hash: Option<ContentHash>,
}

impl CacheEntry {
    /// Entry for a copied file.
    pub fn copied(stamp: FileStamp, hash: ContentHash) -> Self {
        Self {
            mtime_ns: stamp.mtime_ns,
            size: stamp.size,
            hash: Some(hash),
        }
    }

    /// Entry for a symlinked file.
    pub fn linked(stamp: FileStamp) -> Self {
        Self {
            mtime_ns: stamp.mtime_ns,
            size: stamp.size,
            hash: None,
        }
    }

    /// The stamp recorded in this entry.
    pub fn stamp(&self) -> FileStamp {
        FileStamp::new(self.mtime_ns, self.size)
    }

    /// True if `stamp` matches the recorded metadata exactly.
    pub fn matches(&self, stamp: &FileStamp) -> bool {
        self.mtime_ns == stamp.mtime_ns && self.size == stamp.size
    }
}
