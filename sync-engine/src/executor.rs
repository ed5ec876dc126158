//! Sync executor.
//!
//! Turns one normalized change into the filesystem action the extension
//! policy implies: copy, symlink or delete. Every mutation for a relative
//! path happens under that path's lock, so a delete and a create for the
//! same file never interleave. Unrelated paths proceed in parallel.
//!
//! All methods here block on filesystem I/O; the engine runs them on the
//! blocking thread pool.

use crate::cache::CacheStore;
use crate::error::{SyncError, SyncResult};
use crate::hash::{hash_file, HashingWriter};
use dashmap::DashMap;
use filetime::FileTime;
use std::fmt;
use std::fs::{self, File, Metadata};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use sync_core::{action_for, plan_copy, plan_link, policy_for, CopyPlan, DestKind, LinkPlan, RetryPolicy};
use sync_types::{CacheEntry, ChangeEvent, ChangeKind, ExtensionSet, FileStamp, Policy, RelPath, Task};

/// Result of applying one change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Bytes were copied to the destination.
    Copied {
        /// Bytes written.
        bytes: u64,
    },
    /// Metadata changed but content did not; destination mtime and cache refreshed.
    HashMatched,
    /// A symlink was created or replaced.
    Linked,
    /// Destination and cache already matched the source.
    Unchanged,
    /// Source is a directory; its files are mirrored individually.
    Directory,
    /// The destination entry was removed.
    Deleted,
    /// Nothing to delete.
    AlreadyAbsent,
    /// The source vanished before it could be materialized.
    SourceMissing,
    /// The source is not a regular file or directory (fifo, socket, device).
    Skipped,
}

impl Outcome {
    /// True if the destination was modified.
    pub fn wrote(&self) -> bool {
        matches!(
            self,
            Outcome::Copied { .. } | Outcome::HashMatched | Outcome::Linked | Outcome::Deleted
        )
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Copied { bytes } => write!(f, "copied ({} bytes)", bytes),
            Outcome::HashMatched => f.write_str("hash matched"),
            Outcome::Linked => f.write_str("linked"),
            Outcome::Unchanged => f.write_str("unchanged"),
            Outcome::Directory => f.write_str("directory"),
            Outcome::Deleted => f.write_str("deleted"),
            Outcome::AlreadyAbsent => f.write_str("already absent"),
            Outcome::SourceMissing => f.write_str("source missing"),
            Outcome::Skipped => f.write_str("skipped"),
        }
    }
}

/// Applies changes for one task.
pub struct Executor {
    input_dir: PathBuf,
    output_dir: PathBuf,
    extensions: ExtensionSet,
    cache: Arc<CacheStore>,
    retry: RetryPolicy,
    locks: DashMap<RelPath, Arc<Mutex<()>>>,
}

impl Executor {
    /// Create an executor for `task`.
    ///
    /// `task.input_dir` should be absolute: symlinks point at paths under it.
    pub fn new(task: &Task, cache: Arc<CacheStore>, retry: RetryPolicy) -> Self {
        Self {
            input_dir: task.input_dir.clone(),
            output_dir: task.output_dir.clone(),
            extensions: task.extensions.clone(),
            cache,
            retry,
            locks: DashMap::new(),
        }
    }

    /// Source root.
    pub fn input_dir(&self) -> &Path {
        &self.input_dir
    }

    /// Destination root.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// The cache this executor maintains.
    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    /// Apply `event`, retrying transient failures with backoff.
    ///
    /// After the last attempt the error is logged and returned; the next
    /// reconciliation repairs whatever was left behind.
    pub fn apply_with_retry(&self, event: &ChangeEvent) -> SyncResult<Outcome> {
        let rel = match RelPath::between(&self.input_dir, &event.absolute_path) {
            Ok(rel) => rel,
            Err(e) => {
                tracing::warn!("Ignoring {}: {}", event.absolute_path.display(), e);
                return Err(e.into());
            }
        };
        self.apply_rel_with_retry(&rel, event.kind)
    }

    /// Retrying variant of [`Executor::apply_rel`].
    pub fn apply_rel_with_retry(&self, rel: &RelPath, kind: ChangeKind) -> SyncResult<Outcome> {
        self.retry_transient(rel, || self.apply_rel(rel, kind))
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    fn retry_transient<T>(&self, rel: &RelPath, mut op: impl FnMut() -> SyncResult<T>) -> SyncResult<T> {
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && self.retry.should_retry(attempt) => {
                    let delay = self.retry.delay_for(attempt);
                    tracing::debug!("Retrying {} in {:?} (attempt {}): {}", rel, delay, attempt, e);
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!("Giving up on {} after {} attempt(s): {}", rel, attempt, e);
                    return Err(e);
                }
            }
        }
    }

    /// Apply a change once.
    pub fn apply(&self, event: &ChangeEvent) -> SyncResult<Outcome> {
        let rel = RelPath::between(&self.input_dir, &event.absolute_path)?;
        self.apply_rel(&rel, event.kind)
    }

    /// Apply a change for a relative path once, under the path's lock.
    pub fn apply_rel(&self, rel: &RelPath, kind: ChangeKind) -> SyncResult<Outcome> {
        let lock = self.lock_for(rel);
        let result = {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            self.apply_locked(rel, kind)
        };
        drop(lock);
        self.release_lock(rel);
        result
    }

    fn lock_for(&self, rel: &RelPath) -> Arc<Mutex<()>> {
        Arc::clone(self.locks.entry(rel.clone()).or_default().value())
    }

    fn release_lock(&self, rel: &RelPath) {
        self.locks.remove_if(rel, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Number of per-path locks currently held or awaited.
    pub fn active_paths(&self) -> usize {
        self.locks.len()
    }

    fn apply_locked(&self, rel: &RelPath, kind: ChangeKind) -> SyncResult<Outcome> {
        let action = action_for(rel.clone(), kind, &self.extensions);
        tracing::debug!("{} {} ({:?})", action.policy, action.relative_path, kind);
        let src = rel.under(&self.input_dir);
        let dst = rel.under(&self.output_dir);

        let meta = match fs::metadata(&src) {
            Ok(meta) => Some(meta),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(SyncError::io("stat", &src, e)),
        };

        match (kind.normalized(), meta) {
            // Source is back: the delete lost a race with a re-create.
            (ChangeKind::Deleted, Some(meta)) => self.materialize(rel, &src, &dst, &meta),
            (ChangeKind::Deleted, None) => self.delete(rel, &dst),
            (_, Some(meta)) => self.materialize(rel, &src, &dst, &meta),
            (_, None) => {
                tracing::debug!("Source vanished before sync: {}", rel);
                Ok(Outcome::SourceMissing)
            }
        }
    }

    fn materialize(&self, rel: &RelPath, src: &Path, dst: &Path, meta: &Metadata) -> SyncResult<Outcome> {
        if meta.is_dir() {
            return self.ensure_dir(rel, dst);
        }
        if !meta.is_file() {
            tracing::debug!("Skipping special file {}", rel);
            return Ok(Outcome::Skipped);
        }
        self.prepare_parent(rel, dst)?;
        let stamp = FileStamp::from_metadata(meta);
        match policy_for(rel, &self.extensions) {
            Policy::Symlink => self.link(rel, src, dst, stamp),
            Policy::Copy => self.copy(rel, src, dst, meta, stamp),
        }
    }

    /// Directories are created lazily by the files inside them; here only a
    /// non-directory squatting on the path is cleared.
    fn ensure_dir(&self, rel: &RelPath, dst: &Path) -> SyncResult<Outcome> {
        match dest_kind(dst)? {
            DestKind::Dir | DestKind::Missing => Ok(Outcome::Directory),
            _ => {
                remove_entry(dst, false)?;
                self.cache.remove(rel);
                Ok(Outcome::Directory)
            }
        }
    }

    /// Make sure every ancestor of `dst` below the output root is a directory.
    ///
    /// An ancestor that exists as a file or link (left over from an earlier
    /// tree shape) is removed first.
    fn prepare_parent(&self, rel: &RelPath, dst: &Path) -> SyncResult<()> {
        let mut ancestors = Vec::new();
        let mut cursor = rel.parent();
        while let Some(dir) = cursor {
            cursor = dir.parent();
            ancestors.push(dir);
        }
        for dir in ancestors.iter().rev() {
            let path = dir.under(&self.output_dir);
            match dest_kind(&path)? {
                DestKind::Dir => continue,
                DestKind::Missing => break,
                _ => {
                    remove_entry(&path, false)?;
                    self.cache.remove(dir);
                    break;
                }
            }
        }
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent).map_err(|e| SyncError::io("mkdir", parent, e))?;
        }
        Ok(())
    }

    fn link(&self, rel: &RelPath, src: &Path, dst: &Path, stamp: FileStamp) -> SyncResult<Outcome> {
        let dest = dest_kind(dst)?;
        let outcome = match plan_link(src, &dest) {
            LinkPlan::Keep => Outcome::Unchanged,
            LinkPlan::Create => {
                make_symlink(src, dst)?;
                Outcome::Linked
            }
            LinkPlan::Replace => {
                remove_entry(dst, dest == DestKind::Dir)?;
                make_symlink(src, dst)?;
                Outcome::Linked
            }
        };

        let fresh = CacheEntry::linked(stamp);
        if self.cache.lookup(rel).as_ref() != Some(&fresh) {
            self.cache.put(rel.clone(), fresh);
        }
        if outcome == Outcome::Linked {
            tracing::info!("Linked {} -> {}", rel, src.display());
        }
        Ok(outcome)
    }

    fn copy(&self, rel: &RelPath, src: &Path, dst: &Path, meta: &Metadata, stamp: FileStamp) -> SyncResult<Outcome> {
        let dest = dest_kind(dst)?;
        let cached = self.cache.lookup(rel);
        match plan_copy(stamp, cached.as_ref(), &dest) {
            CopyPlan::Unchanged => {
                tracing::debug!("Unchanged {}", rel);
                Ok(Outcome::Unchanged)
            }
            CopyPlan::VerifyHash(expected) => {
                let actual = hash_file(src).map_err(|e| SyncError::io("hash", src, e))?;
                if actual == expected {
                    let mtime = FileTime::from_last_modification_time(meta);
                    filetime::set_file_mtime(dst, mtime).map_err(|e| SyncError::io("set mtime", dst, e))?;
                    self.cache.put(rel.clone(), CacheEntry::copied(stamp, actual));
                    tracing::info!("Content unchanged for {}, refreshed mtime", rel);
                    return Ok(Outcome::HashMatched);
                }
                self.write_copy(rel, src, dst, meta, stamp, &dest)
            }
            CopyPlan::Copy => self.write_copy(rel, src, dst, meta, stamp, &dest),
        }
    }

    /// Copy through a temp file next to the destination, then rename over it.
    fn write_copy(
        &self,
        rel: &RelPath,
        src: &Path,
        dst: &Path,
        meta: &Metadata,
        stamp: FileStamp,
        dest: &DestKind,
    ) -> SyncResult<Outcome> {
        if *dest == DestKind::Dir {
            remove_entry(dst, true)?;
        }
        let dir = dst.parent().unwrap_or(self.output_dir.as_path());
        let tmp = tempfile::Builder::new()
            .prefix(".linkmirror-")
            .suffix(".tmp")
            .tempfile_in(dir)
            .map_err(|e| SyncError::io("create temp", dir, e))?;

        let mut reader = match File::open(src) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Outcome::SourceMissing),
            Err(e) => return Err(SyncError::io("open", src, e)),
        };
        let mut writer = HashingWriter::new(io::BufWriter::new(tmp.as_file()));
        io::copy(&mut reader, &mut writer).map_err(|e| SyncError::io("copy", src, e))?;
        let bytes = writer.written();
        let (_, hash) = writer.finish().map_err(|e| SyncError::io("copy", dst, e))?;

        tmp.as_file()
            .set_permissions(meta.permissions())
            .map_err(|e| SyncError::io("set permissions", tmp.path(), e))?;
        let mtime = FileTime::from_last_modification_time(meta);
        filetime::set_file_handle_times(tmp.as_file(), None, Some(mtime))
            .map_err(|e| SyncError::io("set mtime", tmp.path(), e))?;

        // Settle check: a source still being written must not be cached as synced.
        let after = fs::metadata(src)
            .map(|m| FileStamp::from_metadata(&m))
            .map_err(|e| SyncError::io("stat", src, e))?;
        if after != stamp || bytes != stamp.size {
            return Err(SyncError::SourceChanged(src.to_path_buf()));
        }

        tmp.persist(dst).map_err(|e| SyncError::io("rename", dst, e.error))?;
        self.cache.put(rel.clone(), CacheEntry::copied(stamp, hash));
        tracing::info!("Copied {} ({} bytes)", rel, bytes);
        Ok(Outcome::Copied { bytes })
    }

    fn delete(&self, rel: &RelPath, dst: &Path) -> SyncResult<Outcome> {
        let outcome = match dest_kind(dst)? {
            DestKind::Missing => Outcome::AlreadyAbsent,
            DestKind::Dir => {
                remove_entry(dst, true)?;
                Outcome::Deleted
            }
            _ => {
                remove_entry(dst, false)?;
                Outcome::Deleted
            }
        };
        self.cache.remove_within(rel);
        if outcome == Outcome::Deleted {
            tracing::info!("Deleted {}", rel);
            self.prune_empty_parents(dst);
        }
        Ok(outcome)
    }

    /// Remove now-empty ancestors of `path`, stopping at the output root.
    fn prune_empty_parents(&self, path: &Path) {
        let mut dir = path.parent();
        while let Some(d) = dir {
            if d == self.output_dir || !d.starts_with(&self.output_dir) {
                break;
            }
            if fs::remove_dir(d).is_err() {
                break;
            }
            tracing::debug!("Pruned empty directory {}", d.display());
            dir = d.parent();
        }
    }
}

/// Classify what sits at `path` without following symlinks.
pub(crate) fn dest_kind(path: &Path) -> SyncResult<DestKind> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(DestKind::Missing),
        Err(e) => return Err(SyncError::io("stat", path, e)),
    };
    let ft = meta.file_type();
    Ok(if ft.is_symlink() {
        let target = fs::read_link(path).map_err(|e| SyncError::io("readlink", path, e))?;
        DestKind::Symlink { target }
    } else if ft.is_dir() {
        DestKind::Dir
    } else if ft.is_file() {
        DestKind::File { size: meta.len() }
    } else {
        DestKind::Other
    })
}

fn remove_entry(path: &Path, is_dir: bool) -> SyncResult<()> {
    let result = if is_dir {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(SyncError::io("remove", path, e)),
    }
}

#[cfg(unix)]
fn make_symlink(src: &Path, dst: &Path) -> SyncResult<()> {
    std::os::unix::fs::symlink(src, dst).map_err(|e| SyncError::io("symlink", dst, e))
}

#[cfg(windows)]
fn make_symlink(src: &Path, dst: &Path) -> SyncResult<()> {
    std::os::windows::fs::symlink_file(src, dst).map_err(|e| SyncError::io("symlink", dst, e))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::reconcile::ReconcileStats;
    use std::time::{Duration, SystemTime};
    use sync_types::TaskId;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        input: PathBuf,
        output: PathBuf,
        exec: Executor,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let input = root.join("in");
        let output = root.join("out");
        fs::create_dir_all(&input).unwrap();
        fs::create_dir_all(&output).unwrap();
        let task = Task::new(
            TaskId::new("t").unwrap(),
            "t",
            &input,
            &output,
            ExtensionSet::parse_list("jpg,png").unwrap(),
        );
        let retry = RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
        };
        let exec = Executor::new(&task, Arc::new(CacheStore::in_memory()), retry);
        Fixture {
            _dir: dir,
            input,
            output,
            exec,
        }
    }

    fn ev(path: &Path, kind: ChangeKind) -> ChangeEvent {
        ChangeEvent::new(path, kind)
    }

    fn rel(s: &str) -> RelPath {
        RelPath::from_path(Path::new(s)).unwrap()
    }

    fn set_mtime(path: &Path, secs_ago: u64) {
        let t = SystemTime::now() - Duration::from_secs(secs_ago);
        filetime::set_file_mtime(path, FileTime::from_system_time(t)).unwrap();
    }

    #[test]
    fn copies_allowed_extension() {
        let f = fixture();
        let src = f.input.join("a.jpg");
        fs::write(&src, vec![7u8; 50 * 1024]).unwrap();
        set_mtime(&src, 100);

        let out = f.exec.apply(&ev(&src, ChangeKind::Created)).unwrap();
        assert_eq!(out, Outcome::Copied { bytes: 50 * 1024 });

        let dst = f.output.join("a.jpg");
        let meta = fs::symlink_metadata(&dst).unwrap();
        assert!(meta.file_type().is_file());
        assert_eq!(fs::read(&dst).unwrap(), fs::read(&src).unwrap());
        assert_eq!(
            FileTime::from_last_modification_time(&meta),
            FileTime::from_last_modification_time(&fs::metadata(&src).unwrap())
        );
        let entry = f.exec.cache().lookup(&rel("a.jpg")).unwrap();
        assert_eq!(entry.size, 50 * 1024);
        assert!(entry.hash.is_some());
    }

    #[test]
    fn links_other_extensions() {
        let f = fixture();
        let src = f.input.join("a.nfo");
        fs::write(&src, b"info").unwrap();

        assert_eq!(f.exec.apply(&ev(&src, ChangeKind::Created)).unwrap(), Outcome::Linked);
        let dst = f.output.join("a.nfo");
        assert_eq!(fs::read_link(&dst).unwrap(), src);
        assert!(f.exec.cache().lookup(&rel("a.nfo")).unwrap().hash.is_none());

        assert_eq!(f.exec.apply(&ev(&src, ChangeKind::Modified)).unwrap(), Outcome::Unchanged);
    }

    #[test]
    fn second_apply_is_a_no_op() {
        let f = fixture();
        let src = f.input.join("a.jpg");
        fs::write(&src, b"pixels").unwrap();
        f.exec.apply(&ev(&src, ChangeKind::Created)).unwrap();
        let dst_mtime = fs::metadata(f.output.join("a.jpg")).unwrap().modified().unwrap();

        assert_eq!(f.exec.apply(&ev(&src, ChangeKind::Modified)).unwrap(), Outcome::Unchanged);
        assert_eq!(
            fs::metadata(f.output.join("a.jpg")).unwrap().modified().unwrap(),
            dst_mtime
        );
    }

    #[test]
    fn touch_without_content_change_skips_copy() {
        let f = fixture();
        let src = f.input.join("a.jpg");
        fs::write(&src, b"pixels").unwrap();
        set_mtime(&src, 100);
        f.exec.apply(&ev(&src, ChangeKind::Created)).unwrap();
        let before = f.exec.cache().lookup(&rel("a.jpg")).unwrap();

        set_mtime(&src, 10);
        let out = f.exec.apply(&ev(&src, ChangeKind::Modified)).unwrap();
        assert_eq!(out, Outcome::HashMatched);

        let after = f.exec.cache().lookup(&rel("a.jpg")).unwrap();
        assert_ne!(after.mtime_ns, before.mtime_ns);
        assert_eq!(after.hash, before.hash);
        let dst_meta = fs::metadata(f.output.join("a.jpg")).unwrap();
        assert_eq!(FileStamp::from_metadata(&dst_meta).mtime_ns, after.mtime_ns);
    }

    #[test]
    fn content_change_recopies() {
        let f = fixture();
        let src = f.input.join("a.jpg");
        fs::write(&src, b"aaaa").unwrap();
        set_mtime(&src, 100);
        f.exec.apply(&ev(&src, ChangeKind::Created)).unwrap();

        fs::write(&src, b"bbbb").unwrap();
        let out = f.exec.apply(&ev(&src, ChangeKind::Modified)).unwrap();
        assert_eq!(out, Outcome::Copied { bytes: 4 });
        assert_eq!(fs::read(f.output.join("a.jpg")).unwrap(), b"bbbb");
    }

    #[test]
    fn damaged_copy_is_repaired() {
        let f = fixture();
        let src = f.input.join("a.jpg");
        fs::write(&src, b"pixels").unwrap();
        f.exec.apply(&ev(&src, ChangeKind::Created)).unwrap();

        fs::write(f.output.join("a.jpg"), b"px").unwrap();
        let out = f.exec.apply(&ev(&src, ChangeKind::Modified)).unwrap();
        assert_eq!(out, Outcome::Copied { bytes: 6 });
    }

    #[test]
    fn delete_is_idempotent_and_prunes() {
        let f = fixture();
        fs::create_dir_all(f.input.join("d/e")).unwrap();
        let src = f.input.join("d/e/a.nfo");
        fs::write(&src, b"x").unwrap();
        f.exec.apply(&ev(&src, ChangeKind::Created)).unwrap();
        assert!(f.output.join("d/e/a.nfo").symlink_metadata().is_ok());

        fs::remove_file(&src).unwrap();
        assert_eq!(f.exec.apply(&ev(&src, ChangeKind::Deleted)).unwrap(), Outcome::Deleted);
        assert!(!f.output.join("d").exists());
        assert!(f.output.exists());
        assert!(f.exec.cache().is_empty());

        assert_eq!(
            f.exec.apply(&ev(&src, ChangeKind::Deleted)).unwrap(),
            Outcome::AlreadyAbsent
        );
    }

    #[test]
    fn delete_with_live_source_rematerializes() {
        let f = fixture();
        let src = f.input.join("a.nfo");
        fs::write(&src, b"x").unwrap();
        assert_eq!(f.exec.apply(&ev(&src, ChangeKind::Deleted)).unwrap(), Outcome::Linked);
    }

    #[test]
    fn created_for_missing_source_is_skipped() {
        let f = fixture();
        let src = f.input.join("ghost.jpg");
        assert_eq!(
            f.exec.apply(&ev(&src, ChangeKind::Created)).unwrap(),
            Outcome::SourceMissing
        );
        assert!(f.exec.cache().is_empty());
    }

    #[test]
    fn directory_delete_clears_subtree_and_cache() {
        let f = fixture();
        fs::create_dir_all(f.input.join("show/s1")).unwrap();
        for name in ["a.jpg", "b.nfo"] {
            let src = f.input.join("show/s1").join(name);
            fs::write(&src, b"x").unwrap();
            f.exec.apply(&ev(&src, ChangeKind::Created)).unwrap();
        }
        assert_eq!(f.exec.cache().len(), 2);

        fs::remove_dir_all(f.input.join("show")).unwrap();
        let out = f.exec.apply(&ev(&f.input.join("show"), ChangeKind::Deleted)).unwrap();
        assert_eq!(out, Outcome::Deleted);
        assert!(!f.output.join("show").exists());
        assert!(f.exec.cache().is_empty());
    }

    #[test]
    fn wrong_link_is_replaced() {
        let f = fixture();
        let src = f.input.join("a.nfo");
        fs::write(&src, b"x").unwrap();
        std::os::unix::fs::symlink("/nowhere", f.output.join("a.nfo")).unwrap();

        assert_eq!(f.exec.apply(&ev(&src, ChangeKind::Created)).unwrap(), Outcome::Linked);
        assert_eq!(fs::read_link(f.output.join("a.nfo")).unwrap(), src);
    }

    #[test]
    fn policy_change_replaces_representation() {
        let f = fixture();
        let src = f.input.join("a.jpg");
        fs::write(&src, b"pixels").unwrap();
        // Earlier run linked it.
        std::os::unix::fs::symlink(&src, f.output.join("a.jpg")).unwrap();
        f.exec.cache().put(
            rel("a.jpg"),
            CacheEntry::linked(FileStamp::from_metadata(&fs::metadata(&src).unwrap())),
        );

        let out = f.exec.apply(&ev(&src, ChangeKind::Modified)).unwrap();
        assert_eq!(out, Outcome::Copied { bytes: 6 });
        assert!(fs::symlink_metadata(f.output.join("a.jpg")).unwrap().file_type().is_file());
    }

    #[test]
    fn file_in_place_of_parent_dir_is_replaced() {
        let f = fixture();
        fs::write(f.output.join("d"), b"stale").unwrap();
        fs::create_dir_all(f.input.join("d")).unwrap();
        let src = f.input.join("d/a.nfo");
        fs::write(&src, b"x").unwrap();

        assert_eq!(f.exec.apply(&ev(&src, ChangeKind::Created)).unwrap(), Outcome::Linked);
        assert!(f.output.join("d").is_dir());
    }

    #[test]
    fn io_failure_is_retried_then_dropped() {
        let f = fixture();
        fs::write(f.input.join("a.nfo"), b"x").unwrap();
        // The output root is a file, so no entry can be created under it.
        fs::remove_dir(&f.output).unwrap();
        fs::write(&f.output, b"in the way").unwrap();

        let mut attempts = 0;
        let result = f.exec.retry_transient(&rel("a.nfo"), || {
            attempts += 1;
            f.exec.apply_rel(&rel("a.nfo"), ChangeKind::Created)
        });
        assert_eq!(attempts, 2);
        assert!(matches!(result, Err(SyncError::Io { .. })));
        assert!(f.exec.cache().lookup(&rel("a.nfo")).is_none());

        let mut stats = ReconcileStats::default();
        stats.record(&f.exec.apply_rel_with_retry(&rel("a.nfo"), ChangeKind::Created));
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.writes(), 0);
    }

    #[test]
    fn source_changing_during_copy_is_not_cached() {
        let f = fixture();
        let src = f.input.join("a.jpg");
        let dst = f.output.join("a.jpg");
        fs::write(&src, b"v1").unwrap();
        let before = fs::metadata(&src).unwrap();
        fs::write(&src, b"still being written").unwrap();

        let mut attempts = 0;
        let err = f
            .exec
            .retry_transient(&rel("a.jpg"), || {
                attempts += 1;
                f.exec.materialize(&rel("a.jpg"), &src, &dst, &before)
            })
            .unwrap_err();
        assert_eq!(attempts, 2);
        assert!(matches!(err, SyncError::SourceChanged(_)));
        assert!(err.is_transient());
        assert!(f.exec.cache().lookup(&rel("a.jpg")).is_none());
        // Neither the destination nor a temp file is left behind.
        assert_eq!(fs::read_dir(&f.output).unwrap().count(), 0);

        // Once the writer is done, the next apply copies the settled file.
        let out = f.exec.apply(&ev(&src, ChangeKind::Modified)).unwrap();
        assert_eq!(out, Outcome::Copied { bytes: 19 });
        assert!(f.exec.cache().lookup(&rel("a.jpg")).is_some());
    }

    #[test]
    fn event_outside_input_is_rejected() {
        let f = fixture();
        let err = f.exec.apply(&ev(Path::new("/elsewhere/a.jpg"), ChangeKind::Created)).unwrap_err();
        assert!(!err.is_transient());
        assert!(f.exec.apply_with_retry(&ev(Path::new("/elsewhere/a.jpg"), ChangeKind::Created)).is_err());
    }

    #[test]
    fn locks_are_released() {
        let f = fixture();
        let src = f.input.join("a.nfo");
        fs::write(&src, b"x").unwrap();
        f.exec.apply(&ev(&src, ChangeKind::Created)).unwrap();
        assert_eq!(f.exec.active_paths(), 0);
    }

    #[test]
    fn concurrent_applies_for_one_path_converge() {
        let f = Arc::new(fixture());
        let src = f.input.join("a.jpg");
        fs::write(&src, vec![1u8; 4096]).unwrap();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let f = Arc::clone(&f);
                let src = src.clone();
                std::thread::spawn(move || {
                    let kind = if i % 2 == 0 { ChangeKind::Created } else { ChangeKind::Deleted };
                    f.exec.apply(&ev(&src, kind)).unwrap()
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(fs::read(f.output.join("a.jpg")).unwrap().len(), 4096);
        assert_eq!(f.exec.active_paths(), 0);
    }
}
