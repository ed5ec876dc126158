//! Cache store for linkmirror.
//!
//! Remembers, per task, the (mtime, size, hash) of every source file that
//! has been materialized in the destination. The whole map lives in memory;
//! a [`CacheBackend`] persists it as a single file per task.

mod json;

pub use json::JsonFileBackend;

use crate::error::CacheError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use sync_types::{CacheEntry, RelPath};

/// Trait for cache persistence backends.
///
/// Backends are synchronous: the engine calls them from blocking threads.
pub trait CacheBackend: Send + Sync {
    /// Load every persisted entry. A missing store yields an empty list.
    fn load(&self) -> Result<Vec<(RelPath, CacheEntry)>, CacheError>;

    /// Replace the persisted entries with `entries`.
    fn save(&self, entries: &[(RelPath, CacheEntry)]) -> Result<(), CacheError>;

    /// Where the data lives, for log messages.
    fn location(&self) -> String;
}

/// In-memory backend for testing.
///
/// Clones share state, so a test can keep a handle and inspect what the
/// store saved.
#[derive(Default, Clone)]
pub struct MemoryBackend {
    saved: Arc<Mutex<Vec<(RelPath, CacheEntry)>>>,
    saves: Arc<AtomicUsize>,
}

impl MemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of completed saves.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Entries from the last save.
    pub fn saved(&self) -> Vec<(RelPath, CacheEntry)> {
        self.saved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl CacheBackend for MemoryBackend {
    fn load(&self) -> Result<Vec<(RelPath, CacheEntry)>, CacheError> {
        Ok(self.saved())
    }

    fn save(&self, entries: &[(RelPath, CacheEntry)]) -> Result<(), CacheError> {
        *self.saved.lock().unwrap_or_else(PoisonError::into_inner) = entries.to_vec();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}

/// Summary of cache contents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Total entries.
    pub entries: usize,
    /// Entries for copied files (with a content hash).
    pub copied: usize,
    /// Entries for symlinked files.
    pub linked: usize,
    /// Sum of recorded source sizes for copied files.
    pub copied_bytes: u64,
    /// Writes not yet persisted.
    pub dirty: usize,
}

/// Concurrent, persisted map from relative path to [`CacheEntry`].
///
/// Reads run in parallel; writes take a short exclusive lock. Persistence
/// is explicit via [`CacheStore::flush`].
pub struct CacheStore {
    entries: RwLock<HashMap<RelPath, CacheEntry>>,
    backend: Box<dyn CacheBackend>,
    dirty: AtomicUsize,
    flush_lock: Mutex<()>,
}

impl CacheStore {
    /// Load the store from `backend`.
    ///
    /// A corrupt or unreadable store is not fatal: it is logged and the
    /// cache starts empty, so the next reconciliation re-hashes everything.
    pub fn open(backend: Box<dyn CacheBackend>) -> Self {
        let entries = match backend.load() {
            Ok(list) => {
                tracing::debug!("Loaded {} cache entries from {}", list.len(), backend.location());
                list.into_iter().collect()
            }
            Err(e) => {
                tracing::warn!("Cache at {} unusable, starting empty: {}", backend.location(), e);
                HashMap::new()
            }
        };
        Self {
            entries: RwLock::new(entries),
            backend,
            dirty: AtomicUsize::new(0),
            flush_lock: Mutex::new(()),
        }
    }

    /// Empty store backed by memory (for tests and one-shot runs).
    pub fn in_memory() -> Self {
        Self::open(Box::new(MemoryBackend::new()))
    }

    /// Entry for `path`, if any.
    pub fn lookup(&self, path: &RelPath) -> Option<CacheEntry> {
        self.read().get(path).cloned()
    }

    /// Insert or replace the entry for `path`.
    pub fn put(&self, path: RelPath, entry: CacheEntry) {
        self.write().insert(path, entry);
        self.dirty.fetch_add(1, Ordering::Relaxed);
    }

    /// Remove the entry for `path`, returning it.
    pub fn remove(&self, path: &RelPath) -> Option<CacheEntry> {
        let removed = self.write().remove(path);
        if removed.is_some() {
            self.dirty.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    /// Remove `dir` and every entry below it. Returns the number removed.
    pub fn remove_within(&self, dir: &RelPath) -> usize {
        let mut map = self.write();
        let before = map.len();
        map.retain(|path, _| !path.is_within(dir));
        let removed = before - map.len();
        if removed > 0 {
            self.dirty.fetch_add(removed, Ordering::Relaxed);
        }
        removed
    }

    /// Copy of every entry, sorted by path.
    pub fn snapshot(&self) -> Vec<(RelPath, CacheEntry)> {
        let mut list: Vec<_> = self
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        list.sort_by(|a, b| a.0.cmp(&b.0));
        list
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// True if the cache has no entries.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Writes since the last successful flush.
    pub fn dirty_count(&self) -> usize {
        self.dirty.load(Ordering::Relaxed)
    }

    /// Persist the current contents.
    pub fn flush(&self) -> Result<(), CacheError> {
        let _guard = self.flush_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let pending = self.dirty.swap(0, Ordering::AcqRel);
        let snapshot = self.snapshot();
        if let Err(e) = self.backend.save(&snapshot) {
            self.dirty.fetch_add(pending, Ordering::AcqRel);
            return Err(e);
        }
        tracing::debug!("Flushed {} cache entries to {}", snapshot.len(), self.backend.location());
        Ok(())
    }

    /// Persist only if something changed. Returns true if a flush happened.
    pub fn flush_if_dirty(&self) -> Result<bool, CacheError> {
        if self.dirty_count() == 0 {
            return Ok(false);
        }
        self.flush()?;
        Ok(true)
    }

    /// Summary counts.
    pub fn stats(&self) -> CacheStats {
        let map = self.read();
        let mut stats = CacheStats {
            entries: map.len(),
            dirty: self.dirty_count(),
            ..CacheStats::default()
        };
        for entry in map.values() {
            if entry.hash.is_some() {
                stats.copied += 1;
                stats.copied_bytes += entry.size;
            } else {
                stats.linked += 1;
            }
        }
        stats
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<RelPath, CacheEntry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<RelPath, CacheEntry>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("location", &self.backend.location())
            .field("entries", &self.len())
            .field("dirty", &self.dirty_count())
            .finish()
    }
}
