//! Per-task mirror engine.
//!
//! An engine owns one task's whole pipeline:
//!
//! ```text
//! change source -> normalizer -> dispatcher -> worker pool -> executor
//!                                    |
//!                                    +-> reconciler (bootstrap, rescan, trigger, periodic)
//! ```
//!
//! Everything runs inside a `task` span carrying the task id, so the task
//! log layer can attribute every line. Stop is cooperative: the change
//! source closes first, queued events and in-flight jobs drain, then the
//! cache is flushed.

use crate::cache::{CacheStore, JsonFileBackend};
use crate::config::{CacheConfig, EngineConfig};
use crate::error::{EngineError, Result};
use crate::executor::Executor;
use crate::log_sink::TASK_SPAN;
use crate::normalize::run_normalizer;
use crate::pool::{drain_jobs, Jobs, WorkerPool};
use crate::reconcile::{blocking, ReconcileReason, ReconcileStats, Reconciler};
use crate::watch::{run_with_fallback, select_source};
use std::fs;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use sync_core::{Coalesced, Coalescer};
use sync_types::{Task, TaskId};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Lifecycle of a running engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Bootstrapping; the watcher is not live yet.
    Starting,
    /// Watching and applying changes.
    Running,
    /// The pipeline has shut down.
    Stopped,
}

type TriggerReply = Option<oneshot::Sender<ReconcileStats>>;

/// Entry points for running a task.
pub struct Engine;

impl Engine {
    /// Validate `task`, open its persistent cache and start the pipeline.
    ///
    /// Returns once the task is known to be startable; bootstrap continues in
    /// the background (see [`EngineHandle::wait_ready`]).
    ///
    /// # Errors
    ///
    /// Structural problems: missing or unreadable input, an output that
    /// cannot be created, or overlapping trees.
    pub async fn start(task: &Task, engine: &EngineConfig, cache: &CacheConfig) -> Result<EngineHandle> {
        let task = resolve(task).await?;
        let store = open_store(&task, cache).await?;
        Ok(spawn(task, engine.clone(), cache.clone(), store))
    }

    /// Like [`Engine::start`] but with a caller-provided cache store.
    pub async fn start_with_store(
        task: &Task,
        engine: &EngineConfig,
        cache: &CacheConfig,
        store: Arc<CacheStore>,
    ) -> Result<EngineHandle> {
        let task = resolve(task).await?;
        Ok(spawn(task, engine.clone(), cache.clone(), store))
    }

    /// Run a single reconciliation pass without watching.
    pub async fn sync_once(task: &Task, engine: &EngineConfig, cache: &CacheConfig) -> Result<ReconcileStats> {
        let task = resolve(task).await?;
        let span = tracing::info_span!(TASK_SPAN, task_id = %task.id);
        async move {
            let store = open_store(&task, cache).await?;
            let reconciler = Reconciler::new(pool_for(&task, engine, store));
            reconciler
                .run(ReconcileReason::Triggered, &CancellationToken::new())
                .await
        }
        .instrument(span)
        .await
    }
}

/// Canonicalize and check the task's directories.
async fn resolve(task: &Task) -> Result<Task> {
    let task = task.clone();
    blocking(move || {
        let input = fs::canonicalize(&task.input_dir).map_err(|e| EngineError::InputUnavailable {
            path: task.input_dir.clone(),
            source: e,
        })?;
        if !input.is_dir() {
            return Err(EngineError::InputNotDirectory(task.input_dir.clone()));
        }
        fs::read_dir(&input).map_err(|e| EngineError::InputUnavailable {
            path: input.clone(),
            source: e,
        })?;
        let output = fs::create_dir_all(&task.output_dir)
            .and_then(|_| fs::canonicalize(&task.output_dir))
            .map_err(|e| EngineError::OutputUnavailable {
                path: task.output_dir.clone(),
                source: e,
            })?;

        let mut resolved = task;
        resolved.input_dir = input;
        resolved.output_dir = output;
        resolved.validate()?;
        Ok(resolved)
    })
    .await?
}

async fn open_store(task: &Task, cache: &CacheConfig) -> Result<Arc<CacheStore>> {
    let backend = JsonFileBackend::for_task(&cache.dir, &task.id);
    let store = blocking(move || CacheStore::open(Box::new(backend))).await?;
    Ok(Arc::new(store))
}

fn pool_for(task: &Task, engine: &EngineConfig, store: Arc<CacheStore>) -> WorkerPool {
    let executor = Executor::new(task, store, engine.retry_policy());
    WorkerPool::new(Arc::new(executor), engine.worker_count())
}

fn spawn(task: Task, engine: EngineConfig, cache: CacheConfig, store: Arc<CacheStore>) -> EngineHandle {
    let cancel = CancellationToken::new();
    let (trigger_tx, trigger_rx) = mpsc::channel(1);
    let (state_tx, state_rx) = watch::channel(EngineState::Starting);
    let span = tracing::info_span!(TASK_SPAN, task_id = %task.id);

    let runner = Runner {
        pool: pool_for(&task, &engine, Arc::clone(&store)),
        task: task.clone(),
        engine,
        cache,
        store: Arc::clone(&store),
        cancel: cancel.clone(),
        state: state_tx,
    };
    let join = tokio::spawn(runner.run(trigger_rx).instrument(span));

    EngineHandle {
        task_id: task.id,
        cancel,
        trigger_tx,
        state_rx,
        store,
        join,
    }
}

struct Runner {
    task: Task,
    engine: EngineConfig,
    cache: CacheConfig,
    store: Arc<CacheStore>,
    pool: WorkerPool,
    cancel: CancellationToken,
    state: watch::Sender<EngineState>,
}

impl Runner {
    async fn run(self, trigger_rx: mpsc::Receiver<TriggerReply>) -> Result<()> {
        tracing::info!(
            "Starting task {} ({} -> {}, copy: [{}])",
            self.task.name,
            self.task.input_dir.display(),
            self.task.output_dir.display(),
            self.task.extensions
        );
        let result = self.pipeline(trigger_rx).await;

        let store = Arc::clone(&self.store);
        match blocking(move || store.flush()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!("Final cache flush failed: {}", e),
            Err(e) => tracing::error!("Final cache flush panicked: {}", e),
        }
        self.state.send_replace(EngineState::Stopped);
        match &result {
            Ok(()) => tracing::info!("Task {} stopped", self.task.id),
            Err(e) => tracing::error!("Task {} stopped with error: {}", self.task.id, e),
        }
        result
    }

    async fn pipeline(&self, mut trigger_rx: mpsc::Receiver<TriggerReply>) -> Result<()> {
        let reconciler = Reconciler::new(self.pool.clone());
        reconciler.run(ReconcileReason::Bootstrap, &self.cancel).await?;
        if self.cancel.is_cancelled() {
            return Ok(());
        }

        let capacity = self.engine.channel_capacity.max(1);
        let (raw_tx, raw_rx) = mpsc::channel(capacity);
        let (norm_tx, mut norm_rx) = mpsc::channel(capacity);

        let source_cancel = self.cancel.child_token();
        let root = self.task.input_dir.clone();
        let (mode, poll_interval) = (self.engine.watcher, self.engine.poll_interval());
        let source = {
            let root = root.clone();
            blocking(move || select_source(mode, &root, poll_interval)).await?
        };
        tracing::info!("Watching {} with the {} source", root.display(), source.name());
        let source_task = tokio::spawn(
            run_with_fallback(source, root, poll_interval, raw_tx, source_cancel.clone()).in_current_span(),
        );
        let coalescer = Coalescer::new(self.engine.debounce(), self.engine.debounce_max_hold(), capacity);
        tokio::spawn(run_normalizer(raw_rx, norm_tx, coalescer).in_current_span());

        reconciler.run(ReconcileReason::PostBootstrap, &self.cancel).await?;
        self.state.send_replace(EngineState::Running);

        let flush_every = self.cache.flush_interval();
        let mut flush_tick = interval_at(Instant::now() + flush_every, flush_every);
        flush_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut periodic = self.engine.reconcile_interval().map(|every| {
            let mut tick = interval_at(Instant::now() + every, every);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tick
        });

        let mut jobs = Jobs::new();
        let mut events_open = true;
        let mut triggers_open = true;
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                item = norm_rx.recv(), if events_open => match item {
                    Some(Coalesced::Event(event)) => self.pool.submit(&mut jobs, event).await,
                    Some(Coalesced::Rescan) => {
                        tracing::warn!("Change source lost events, reconciling");
                        self.reconcile(&reconciler, ReconcileReason::Rescan).await;
                    }
                    None => {
                        tracing::error!("Change stream closed; relying on triggered and periodic reconciles");
                        events_open = false;
                    }
                },
                request = trigger_rx.recv(), if triggers_open => match request {
                    Some(reply) => {
                        let stats = self.reconcile(&reconciler, ReconcileReason::Triggered).await;
                        if let (Some(reply), Some(stats)) = (reply, stats) {
                            let _ = reply.send(stats);
                        }
                    }
                    None => triggers_open = false,
                },
                Some(joined) = jobs.join_next(), if !jobs.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!("Sync job panicked: {}", e);
                    }
                    if self.store.dirty_count() >= self.cache.flush_batch.max(1) {
                        self.flush().await;
                    }
                },
                _ = flush_tick.tick() => self.flush().await,
                _ = tick_opt(&mut periodic) => {
                    self.reconcile(&reconciler, ReconcileReason::Periodic).await;
                },
            }
        }

        tracing::info!("Stopping task {}", self.task.id);
        source_cancel.cancel();
        if let Err(e) = source_task.await {
            tracing::error!("Change source task panicked: {}", e);
        }
        while let Some(item) = norm_rx.recv().await {
            if let Coalesced::Event(event) = item {
                self.pool.submit(&mut jobs, event).await;
            }
        }
        drain_jobs(&mut jobs, |_| {}).await;
        Ok(())
    }

    async fn reconcile(&self, reconciler: &Reconciler, reason: ReconcileReason) -> Option<ReconcileStats> {
        match reconciler.run(reason, &self.cancel).await {
            Ok(stats) => Some(stats),
            Err(e) => {
                tracing::error!("Reconcile ({}) failed: {}", reason, e);
                None
            }
        }
    }

    async fn flush(&self) {
        let store = Arc::clone(&self.store);
        match blocking(move || store.flush_if_dirty()).await {
            Ok(Ok(true)) => tracing::debug!("Cache flushed"),
            Ok(Ok(false)) => {}
            Ok(Err(e)) => tracing::error!("Cache flush failed: {}", e),
            Err(e) => tracing::error!("Cache flush panicked: {}", e),
        }
    }
}

async fn tick_opt(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Control handle for a running engine.
pub struct EngineHandle {
    task_id: TaskId,
    cancel: CancellationToken,
    trigger_tx: mpsc::Sender<TriggerReply>,
    state_rx: watch::Receiver<EngineState>,
    store: Arc<CacheStore>,
    join: JoinHandle<Result<()>>,
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("task_id", &self.task_id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl EngineHandle {
    /// Task this engine runs.
    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> EngineState {
        if self.join.is_finished() {
            return EngineState::Stopped;
        }
        *self.state_rx.borrow()
    }

    /// Whether the pipeline is still alive (starting or running).
    pub fn is_running(&self) -> bool {
        self.state() != EngineState::Stopped
    }

    /// Wait until bootstrap is done and the watcher is live.
    ///
    /// Returns the state reached: `Running`, or `Stopped` if startup failed.
    pub async fn wait_ready(&self) -> EngineState {
        let mut rx = self.state_rx.clone();
        let reached = match rx.wait_for(|state| *state != EngineState::Starting).await {
            Ok(state) => *state,
            Err(_) => EngineState::Stopped,
        };
        reached
    }

    /// Ask for a full reconciliation without waiting for it.
    ///
    /// A request already queued absorbs this one.
    pub fn trigger_full_sync(&self) -> Result<()> {
        match self.trigger_tx.try_send(None) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => Ok(()),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(EngineError::NotRunning),
        }
    }

    /// Run a full reconciliation and wait for its statistics.
    pub async fn reconcile_now(&self) -> Result<ReconcileStats> {
        self.request_reconcile().await
    }

    /// Like [`EngineHandle::reconcile_now`], but the returned future owns
    /// what it needs and does not borrow the handle.
    ///
    /// A stop during the pass interrupts it; the future then resolves to
    /// the partial statistics or `NotRunning`.
    pub fn request_reconcile(&self) -> impl Future<Output = Result<ReconcileStats>> + Send + 'static {
        let trigger = self.trigger_tx.clone();
        async move {
            let (tx, rx) = oneshot::channel();
            trigger.send(Some(tx)).await.map_err(|_| EngineError::NotRunning)?;
            rx.await.map_err(|_| EngineError::NotRunning)
        }
    }

    /// The task's cache store.
    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.store
    }

    /// Stop the engine, waiting up to `grace` for in-flight work.
    ///
    /// Past the grace period the pipeline is aborted and the cache flushed
    /// as-is; the next start's bootstrap repairs any gap.
    pub async fn stop(mut self, grace: Duration) -> Result<()> {
        self.cancel.cancel();
        match tokio::time::timeout(grace, &mut self.join).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => {
                tracing::warn!("Task {} had already failed: {}", self.task_id, e);
                Ok(())
            }
            Ok(Err(e)) => Err(EngineError::Join(e)),
            Err(_) => {
                tracing::warn!("Task {} did not stop within {:?}, aborting", self.task_id, grace);
                self.join.abort();
                let store = Arc::clone(&self.store);
                blocking(move || store.flush()).await??;
                Ok(())
            }
        }
    }
}
