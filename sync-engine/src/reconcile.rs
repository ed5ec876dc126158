//! Full-tree reconciliation.
//!
//! One algorithm serves bootstrap, drift repair and on-demand syncs:
//!
//! 1. Walk the input tree and apply a `Created` change for every file
//!    through the worker pool, exactly as a live event would.
//! 2. Drop cache entries whose source is gone.
//! 3. Walk the output tree and delete entries with no source counterpart.
//! 4. Remove directories left empty.
//!
//! The cache is flushed at the end of every pass.

use crate::error::{EngineError, SyncResult};
use crate::executor::{Executor, Outcome};
use crate::pool::{Jobs, WorkerPool};
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use sync_core::ProgressTracker;
use sync_types::{ChangeKind, RelPath};
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

/// Why a pass runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileReason {
    /// First pass when a task starts.
    Bootstrap,
    /// Second pass once the watcher is live.
    PostBootstrap,
    /// Requested through the control surface.
    Triggered,
    /// Configured periodic pass.
    Periodic,
    /// The change source lost events.
    Rescan,
}

impl fmt::Display for ReconcileReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReconcileReason::Bootstrap => "bootstrap",
            ReconcileReason::PostBootstrap => "post-bootstrap",
            ReconcileReason::Triggered => "triggered",
            ReconcileReason::Periodic => "periodic",
            ReconcileReason::Rescan => "rescan",
        })
    }
}

/// Counters for one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    /// Source files visited.
    pub scanned: usize,
    /// Files copied.
    pub copied: usize,
    /// Bytes written by copies.
    pub bytes_copied: u64,
    /// Files whose content matched after a metadata change.
    pub hash_matched: usize,
    /// Symlinks created or replaced.
    pub linked: usize,
    /// Files already in sync.
    pub unchanged: usize,
    /// Destination entries removed.
    pub deleted: usize,
    /// Sources skipped (vanished or not regular files).
    pub skipped: usize,
    /// Empty destination directories removed.
    pub pruned_dirs: usize,
    /// Cache entries dropped because their source is gone.
    pub stale_cache: usize,
    /// Changes that failed after retries.
    pub failed: usize,
    /// The pass was cut short by a stop request.
    pub interrupted: bool,
    written: usize,
    /// Wall time.
    pub duration: Duration,
}

impl ReconcileStats {
    /// Fold one executor result into the counters.
    pub fn record(&mut self, result: &SyncResult<Outcome>) {
        if matches!(result, Ok(outcome) if outcome.wrote()) {
            self.written += 1;
        }
        match result {
            Ok(Outcome::Copied { bytes }) => {
                self.copied += 1;
                self.bytes_copied += bytes;
            }
            Ok(Outcome::HashMatched) => self.hash_matched += 1,
            Ok(Outcome::Linked) => self.linked += 1,
            Ok(Outcome::Unchanged) | Ok(Outcome::Directory) => self.unchanged += 1,
            Ok(Outcome::Deleted) => self.deleted += 1,
            Ok(Outcome::AlreadyAbsent) => {}
            Ok(Outcome::SourceMissing) | Ok(Outcome::Skipped) => self.skipped += 1,
            Err(_) => self.failed += 1,
        }
    }

    /// Number of destination writes the pass performed.
    pub fn writes(&self) -> usize {
        self.written
    }
}

impl fmt::Display for ReconcileStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "scanned={} copied={} bytes={} hash_matched={} linked={} unchanged={} deleted={} \
             skipped={} pruned_dirs={} stale_cache={} failed={}",
            self.scanned,
            self.copied,
            self.bytes_copied,
            self.hash_matched,
            self.linked,
            self.unchanged,
            self.deleted,
            self.skipped,
            self.pruned_dirs,
            self.stale_cache,
            self.failed,
        )
    }
}

/// Runs reconciliation passes for one task.
#[derive(Clone)]
pub struct Reconciler {
    pool: WorkerPool,
}

impl Reconciler {
    /// Reconciler dispatching through `pool`.
    pub fn new(pool: WorkerPool) -> Self {
        Self { pool }
    }

    /// Run one pass.
    ///
    /// # Errors
    ///
    /// Fails only if the input root cannot be walked or a blocking stage
    /// panics. Per-file failures are counted in [`ReconcileStats::failed`].
    pub async fn run(&self, reason: ReconcileReason, cancel: &CancellationToken) -> Result<ReconcileStats, EngineError> {
        let started = Instant::now();
        let executor = Arc::clone(self.pool.executor());
        let mut stats = ReconcileStats::default();
        tracing::info!("Reconcile ({}) started", reason);

        let input = executor.input_dir().to_path_buf();
        let files = blocking(move || list_sources(&input)).await??;
        stats.scanned = files.len();

        let mut progress = ProgressTracker::new(files.len(), 5);
        let mut jobs = Jobs::new();
        for rel in files {
            if cancel.is_cancelled() {
                stats.interrupted = true;
                break;
            }
            self.pool.submit_rel(&mut jobs, rel, ChangeKind::Created).await;
            while jobs.len() > self.pool.size() {
                self.join_one(&mut jobs, &mut stats, &mut progress).await;
            }
        }
        while !jobs.is_empty() {
            self.join_one(&mut jobs, &mut stats, &mut progress).await;
        }

        if !stats.interrupted {
            let exec = Arc::clone(&executor);
            let cleanup = blocking(move || remove_orphans(&exec)).await?;
            stats.stale_cache = cleanup.stale_cache;
            stats.pruned_dirs = cleanup.pruned_dirs;
            for result in &cleanup.results {
                stats.record(result);
            }
        }

        let cache = Arc::clone(executor.cache());
        if let Err(e) = blocking(move || cache.flush()).await? {
            tracing::error!("Cache flush failed: {}", e);
        }

        stats.duration = started.elapsed();
        if stats.interrupted {
            tracing::warn!("Reconcile ({}) interrupted after {:?}: {}", reason, stats.duration, stats);
        } else {
            tracing::info!("Reconcile ({}) finished in {:?}: {}", reason, stats.duration, stats);
        }
        Ok(stats)
    }

    async fn join_one(&self, jobs: &mut Jobs, stats: &mut ReconcileStats, progress: &mut ProgressTracker) {
        let Some(joined) = jobs.join_next().await else {
            return;
        };
        match joined {
            Ok(result) => stats.record(&result),
            Err(e) => {
                tracing::error!("Sync job panicked: {}", e);
                stats.failed += 1;
            }
        }
        if let Some(percent) = progress.advance() {
            tracing::info!("Reconcile progress: {}% ({}/{})", percent, progress.done(), progress.total());
        }
    }
}

/// `spawn_blocking` that keeps the caller's span, so file-level logs stay
/// attributed to the task.
pub(crate) fn blocking<F, R>(f: F) -> tokio::task::JoinHandle<R>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    let span = tracing::Span::current();
    tokio::task::spawn_blocking(move || span.in_scope(f))
}

/// Every non-directory entry under `root`, as sorted relative paths.
fn list_sources(root: &Path) -> Result<Vec<RelPath>, EngineError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).min_depth(1) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => {
                let source = e
                    .into_io_error()
                    .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "walk failed"));
                return Err(EngineError::InputUnavailable {
                    path: root.to_path_buf(),
                    source,
                });
            }
            Err(e) => {
                tracing::warn!("Skipping unreadable source entry: {}", e);
                continue;
            }
        };
        if entry.file_type().is_dir() {
            continue;
        }
        match RelPath::between(root, entry.path()) {
            Ok(rel) => files.push(rel),
            Err(e) => tracing::warn!("Skipping {}: {}", entry.path().display(), e),
        }
    }
    files.sort();
    Ok(files)
}

#[derive(Default)]
struct Cleanup {
    results: Vec<SyncResult<Outcome>>,
    stale_cache: usize,
    pruned_dirs: usize,
}

/// Steps 2 to 4: stale cache entries, orphaned destinations, empty directories.
fn remove_orphans(executor: &Executor) -> Cleanup {
    let mut cleanup = Cleanup::default();
    let input = executor.input_dir();
    let output = executor.output_dir();
    let cache = executor.cache();

    for (rel, _) in cache.snapshot() {
        let is_file = fs::metadata(rel.under(input)).map(|m| m.is_file()).unwrap_or(false);
        if !is_file && cache.remove(&rel).is_some() {
            cleanup.stale_cache += 1;
        }
    }

    let mut walk = WalkDir::new(output).min_depth(1).into_iter();
    while let Some(entry) = walk.next() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::debug!("Skipping unreadable destination entry: {}", e);
                continue;
            }
        };
        let rel = match RelPath::between(output, entry.path()) {
            Ok(rel) => rel,
            Err(e) => {
                tracing::warn!("Cannot map {} back to a source: {}", entry.path().display(), e);
                continue;
            }
        };
        let dest_is_dir = entry.file_type().is_dir();
        let source = fs::metadata(rel.under(input));
        let orphaned = match &source {
            Err(_) => true,
            Ok(meta) => meta.is_dir() && !dest_is_dir,
        };
        if orphaned {
            cleanup.results.push(executor.apply_rel_with_retry(&rel, ChangeKind::Deleted));
            if dest_is_dir {
                walk.skip_current_dir();
            }
        }
    }

    for entry in WalkDir::new(output).min_depth(1).contents_first(true) {
        let Ok(entry) = entry else { continue };
        if entry.file_type().is_dir() && fs::remove_dir(entry.path()).is_ok() {
            tracing::debug!("Pruned empty directory {}", entry.path().display());
            cleanup.pruned_dirs += 1;
        }
    }
    cleanup
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::cache::CacheStore;
    use std::path::PathBuf;
    use sync_core::RetryPolicy;
    use sync_types::{ExtensionSet, Task, TaskId};

    struct Fixture {
        _dir: tempfile::TempDir,
        input: PathBuf,
        output: PathBuf,
        reconciler: Reconciler,
        cache: Arc<CacheStore>,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in");
        let output = dir.path().join("out");
        fs::create_dir_all(&input).unwrap();
        fs::create_dir_all(&output).unwrap();
        let task = Task::new(
            TaskId::new("r").unwrap(),
            "r",
            &input,
            &output,
            ExtensionSet::parse_list("jpg,png").unwrap(),
        );
        let cache = Arc::new(CacheStore::in_memory());
        let executor = Executor::new(&task, Arc::clone(&cache), RetryPolicy::default());
        let reconciler = Reconciler::new(WorkerPool::new(Arc::new(executor), 4));
        Fixture {
            _dir: dir,
            input,
            output,
            reconciler,
            cache,
        }
    }

    async fn run(f: &Fixture) -> ReconcileStats {
        f.reconciler
            .run(ReconcileReason::Triggered, &CancellationToken::new())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn bootstrap_mirrors_tree() {
        let f = fixture();
        fs::create_dir_all(f.input.join("show/s1")).unwrap();
        fs::write(f.input.join("a.jpg"), vec![7u8; 4096]).unwrap();
        fs::write(f.input.join("a.nfo"), b"nfo").unwrap();
        fs::write(f.input.join("show/s1/e1.png"), b"png").unwrap();
        fs::create_dir_all(f.input.join("empty")).unwrap();

        let stats = run(&f).await;
        assert_eq!(stats.scanned, 3);
        assert_eq!(stats.copied, 2);
        assert_eq!(stats.linked, 1);
        assert_eq!(stats.bytes_copied, 4096 + 3);
        assert_eq!(stats.failed, 0);

        assert_eq!(fs::read(f.output.join("a.jpg")).unwrap(), vec![7u8; 4096]);
        assert_eq!(fs::read_link(f.output.join("a.nfo")).unwrap(), f.input.join("a.nfo"));
        assert!(f.output.join("show/s1/e1.png").is_file());
        assert!(!f.output.join("empty").exists());
        assert_eq!(f.cache.len(), 3);
    }

    #[tokio::test]
    async fn second_pass_writes_nothing() {
        let f = fixture();
        fs::write(f.input.join("a.jpg"), b"jpg").unwrap();
        fs::write(f.input.join("a.nfo"), b"nfo").unwrap();
        run(&f).await;

        let stats = run(&f).await;
        assert_eq!(stats.writes(), 0);
        assert_eq!(stats.unchanged, 2);
    }

    #[tokio::test]
    async fn orphans_are_removed_and_dirs_pruned() {
        let f = fixture();
        fs::create_dir_all(f.input.join("d/e")).unwrap();
        fs::write(f.input.join("d/e/x.jpg"), b"x").unwrap();
        fs::write(f.input.join("keep.nfo"), b"k").unwrap();
        run(&f).await;

        fs::remove_dir_all(f.input.join("d")).unwrap();
        fs::create_dir_all(f.output.join("stray/deeper")).unwrap();
        fs::write(f.output.join("stray.txt"), b"junk").unwrap();

        let stats = run(&f).await;
        assert!(!f.output.join("d").exists());
        assert!(!f.output.join("stray").exists());
        assert!(!f.output.join("stray.txt").exists());
        assert!(f.output.join("keep.nfo").exists());
        assert_eq!(stats.stale_cache, 1);
        assert!(stats.deleted >= 2);
        assert!(f.cache.lookup(&RelPath::from_path(Path::new("d/e/x.jpg")).unwrap()).is_none());
    }

    #[tokio::test]
    async fn file_replaced_by_directory_converges() {
        let f = fixture();
        fs::write(f.input.join("item"), b"file").unwrap();
        run(&f).await;
        assert!(fs::symlink_metadata(f.output.join("item")).unwrap().file_type().is_symlink());

        fs::remove_file(f.input.join("item")).unwrap();
        fs::create_dir_all(f.input.join("item")).unwrap();
        fs::write(f.input.join("item/inner.jpg"), b"i").unwrap();
        run(&f).await;

        assert!(f.output.join("item").is_dir());
        assert!(f.output.join("item/inner.jpg").is_file());
        assert!(f.cache.lookup(&RelPath::from_path(Path::new("item")).unwrap()).is_none());
    }

    #[tokio::test]
    async fn cancelled_pass_is_interrupted() {
        let f = fixture();
        fs::write(f.input.join("a.jpg"), b"a").unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let stats = f.reconciler.run(ReconcileReason::Bootstrap, &cancel).await.unwrap();
        assert!(stats.interrupted);
        assert_eq!(stats.copied, 0);
    }

    #[tokio::test]
    async fn missing_input_is_an_error() {
        let f = fixture();
        fs::remove_dir_all(&f.input).unwrap();
        let err = f
            .reconciler
            .run(ReconcileReason::Bootstrap, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InputUnavailable { .. }));
    }

    #[test]
    fn stats_display_is_key_value() {
        let mut stats = ReconcileStats::default();
        stats.record(&Ok(Outcome::Copied { bytes: 10 }));
        stats.record(&Ok(Outcome::Linked));
        let text = stats.to_string();
        assert!(text.contains("copied=1"));
        assert!(text.contains("bytes=10"));
        assert!(text.contains("linked=1"));
    }

    #[test]
    fn writes_count_every_destination_change() {
        let mut stats = ReconcileStats::default();
        for outcome in [
            Outcome::Copied { bytes: 1 },
            Outcome::HashMatched,
            Outcome::Linked,
            Outcome::Deleted,
            Outcome::Unchanged,
            Outcome::AlreadyAbsent,
            Outcome::SourceMissing,
        ] {
            stats.record(&Ok(outcome));
        }
        assert_eq!(stats.writes(), 4);
        assert_eq!(stats.unchanged, 1);
        assert_eq!(stats.skipped, 1);
    }
}
