//! Bounded worker pool.
//!
//! Jobs run on the blocking thread pool, at most `size` at a time per
//! task. Submitting waits for a free permit, which is what backpressures
//! the event loop when the filesystem falls behind.

use crate::error::SyncResult;
use crate::executor::{Executor, Outcome};
use std::sync::Arc;
use sync_types::{ChangeEvent, ChangeKind, RelPath};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Completed job results are collected here.
pub type Jobs = JoinSet<SyncResult<Outcome>>;

/// Bounded pool in front of an [`Executor`].
#[derive(Clone)]
pub struct WorkerPool {
    executor: Arc<Executor>,
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    /// Pool of `size` workers (at least one).
    pub fn new(executor: Arc<Executor>, size: usize) -> Self {
        let size = size.max(1);
        Self {
            executor,
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    /// Maximum concurrent jobs.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Jobs currently holding a permit.
    pub fn in_flight(&self) -> usize {
        self.size - self.permits.available_permits()
    }

    /// The executor jobs run against.
    pub fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }

    /// Queue a watcher event.
    pub async fn submit(&self, jobs: &mut Jobs, event: ChangeEvent) {
        let executor = Arc::clone(&self.executor);
        self.spawn(jobs, move || executor.apply_with_retry(&event)).await;
    }

    /// Queue a change for a path relative to the input root.
    pub async fn submit_rel(&self, jobs: &mut Jobs, rel: RelPath, kind: ChangeKind) {
        let executor = Arc::clone(&self.executor);
        self.spawn(jobs, move || executor.apply_rel_with_retry(&rel, kind)).await;
    }

    async fn spawn<F>(&self, jobs: &mut Jobs, job: F)
    where
        F: FnOnce() -> SyncResult<Outcome> + Send + 'static,
    {
        // The semaphore is never closed.
        let Ok(permit) = Arc::clone(&self.permits).acquire_owned().await else {
            return;
        };
        let span = tracing::Span::current();
        jobs.spawn_blocking(move || {
            let _permit = permit;
            let _enter = span.enter();
            job()
        });
    }
}

/// Wait for every queued job, handing each result to `record`.
pub async fn drain_jobs(jobs: &mut Jobs, mut record: impl FnMut(SyncResult<Outcome>)) {
    while let Some(joined) = jobs.join_next().await {
        match joined {
            Ok(result) => record(result),
            Err(e) => tracing::error!("Sync job panicked: {}", e),
        }
    }
}
