//! Task supervisor.
//!
//! Owns the registry of configured tasks and the engine handle of each
//! running one. Every task has its own slot lock, so starting or stopping
//! one task never waits on another.

use crate::cache::CacheStats;
use crate::config::{CacheConfig, Config, EngineConfig};
use crate::engine::{Engine, EngineHandle};
use crate::error::{EngineError, SupervisorError};
use crate::log_sink::LogRegistry;
use crate::reconcile::ReconcileStats;
use dashmap::DashMap;
use std::sync::Arc;
use sync_types::{Task, TaskId, TaskStatus};
use tokio::sync::Mutex;

type Result<T> = std::result::Result<T, SupervisorError>;

struct TaskSlot {
    task: Task,
    autostart: bool,
    handle: Option<EngineHandle>,
}

impl TaskSlot {
    /// Drop the handle of an engine that exited on its own.
    fn reap(&mut self) {
        if self.handle.as_ref().is_some_and(|h| !h.is_running()) {
            self.handle = None;
            self.task.mark_stopped();
        }
    }

    fn snapshot(&mut self) -> Task {
        self.reap();
        self.task.clone()
    }
}

/// Registry and lifecycle control for mirror tasks.
pub struct TaskSupervisor {
    engine: EngineConfig,
    cache: CacheConfig,
    logs: Option<Arc<LogRegistry>>,
    slots: DashMap<TaskId, Arc<Mutex<TaskSlot>>>,
}

impl std::fmt::Debug for TaskSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskSupervisor")
            .field("engine", &self.engine)
            .field("cache", &self.cache)
            .field("tasks", &self.slots.len())
            .finish_non_exhaustive()
    }
}

impl TaskSupervisor {
    /// Empty supervisor.
    pub fn new(engine: EngineConfig, cache: CacheConfig) -> Self {
        Self {
            engine,
            cache,
            logs: None,
            slots: DashMap::new(),
        }
    }

    /// Route each started task's events into its daily log.
    pub fn with_logs(mut self, logs: Arc<LogRegistry>) -> Self {
        self.logs = Some(logs);
        self
    }

    /// Supervisor with every task from `config` registered.
    pub fn from_config(config: &Config) -> Result<Self> {
        let supervisor = Self::new(config.engine.clone(), config.cache.clone());
        for task in &config.tasks {
            supervisor.register_with(task.to_task(), task.autostart)?;
        }
        Ok(supervisor)
    }

    /// Register a new task (not autostarted).
    pub fn register(&self, task: Task) -> Result<()> {
        self.register_with(task, false)
    }

    /// Register a new task.
    pub fn register_with(&self, mut task: Task, autostart: bool) -> Result<()> {
        task.validate()?;
        task.status = TaskStatus::Stopped;
        match self.slots.entry(task.id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(SupervisorError::AlreadyExists(task.id)),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                tracing::info!("Registered task {} ({})", task.id, task.name);
                slot.insert(Arc::new(Mutex::new(TaskSlot {
                    task,
                    autostart,
                    handle: None,
                })));
                Ok(())
            }
        }
    }

    /// Replace a stopped task's definition, keeping its id and timestamps.
    pub async fn update(&self, task: Task) -> Result<()> {
        task.validate()?;
        let slot = self.slot(&task.id)?;
        let mut slot = slot.lock().await;
        slot.reap();
        if slot.handle.is_some() {
            return Err(SupervisorError::Running(task.id));
        }
        slot.task.name = task.name;
        slot.task.input_dir = task.input_dir;
        slot.task.output_dir = task.output_dir;
        slot.task.extensions = task.extensions;
        tracing::info!("Updated task {}", slot.task.id);
        Ok(())
    }

    /// Remove a task, stopping it first if needed.
    pub async fn remove(&self, id: &TaskId) -> Result<Task> {
        let slot = self.slot(id)?;
        let mut guard = slot.lock().await;
        if let Some(handle) = guard.handle.take() {
            self.stop_handle(id, handle).await?;
            guard.task.mark_stopped();
        }
        self.slots.remove(id);
        if let Some(logs) = &self.logs {
            logs.unregister(id);
        }
        tracing::info!("Removed task {}", id);
        Ok(guard.task.clone())
    }

    /// All tasks, sorted by id, with live status.
    pub async fn list(&self) -> Vec<Task> {
        let slots: Vec<_> = self.slots.iter().map(|e| Arc::clone(e.value())).collect();
        let mut tasks = Vec::with_capacity(slots.len());
        for slot in slots {
            tasks.push(slot.lock().await.snapshot());
        }
        tasks.sort_by(|a, b| a.id.cmp(&b.id));
        tasks
    }

    /// One task with live status.
    pub async fn get(&self, id: &TaskId) -> Result<Task> {
        let slot = self.slot(id)?;
        let task = slot.lock().await.snapshot();
        Ok(task)
    }

    /// Start a stopped task.
    ///
    /// # Errors
    ///
    /// `Running` if it already runs; `Start` for structural problems, in
    /// which case the task stays stopped.
    pub async fn start(&self, id: &TaskId) -> Result<()> {
        let slot = self.slot(id)?;
        let mut slot = slot.lock().await;
        slot.reap();
        if slot.handle.is_some() {
            return Err(SupervisorError::Running(id.clone()));
        }
        if let Some(logs) = &self.logs {
            logs.register(id);
        }
        let handle = Engine::start(&slot.task, &self.engine, &self.cache)
            .await
            .map_err(|source| {
                tracing::error!("Task {} failed to start: {}", id, source);
                SupervisorError::Start {
                    task: id.clone(),
                    source,
                }
            })?;
        slot.handle = Some(handle);
        slot.task.mark_running();
        tracing::info!("Task {} started", id);
        Ok(())
    }

    /// Stop a running task within the configured grace period.
    pub async fn stop(&self, id: &TaskId) -> Result<()> {
        let slot = self.slot(id)?;
        let mut slot = slot.lock().await;
        slot.reap();
        let Some(handle) = slot.handle.take() else {
            return Err(SupervisorError::NotRunning(id.clone()));
        };
        let result = self.stop_handle(id, handle).await;
        slot.task.mark_stopped();
        result
    }

    /// Queue a full reconciliation for a running task.
    pub async fn trigger_full_sync(&self, id: &TaskId) -> Result<()> {
        let slot = self.slot(id)?;
        let slot = slot.lock().await;
        let handle = running(id, &slot)?;
        handle.trigger_full_sync().map_err(|e| engine_error(id, e))?;
        tracing::info!("Full sync requested for task {}", id);
        Ok(())
    }

    /// Run a full reconciliation on a running task and wait for it.
    ///
    /// The slot is not held while the pass runs, so `stop` and `status`
    /// stay responsive; a stop interrupts the pass.
    pub async fn reconcile_now(&self, id: &TaskId) -> Result<ReconcileStats> {
        let pending = {
            let slot = self.slot(id)?;
            let slot = slot.lock().await;
            running(id, &slot)?.request_reconcile()
        };
        pending.await.map_err(|e| engine_error(id, e))
    }

    /// Current status of a task.
    pub async fn status(&self, id: &TaskId) -> Result<TaskStatus> {
        Ok(self.get(id).await?.status)
    }

    /// Cache statistics of a running task.
    pub async fn cache_stats(&self, id: &TaskId) -> Result<Option<CacheStats>> {
        let slot = self.slot(id)?;
        let mut slot = slot.lock().await;
        slot.reap();
        Ok(slot.handle.as_ref().map(|h| h.cache().stats()))
    }

    /// Start every task registered with autostart.
    pub async fn start_autostart(&self) -> Vec<(TaskId, Result<()>)> {
        let mut ids = Vec::new();
        for slot in self.slots.iter().map(|e| Arc::clone(e.value())).collect::<Vec<_>>() {
            let slot = slot.lock().await;
            if slot.autostart {
                ids.push(slot.task.id.clone());
            }
        }
        ids.sort();
        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            let result = self.start(&id).await;
            results.push((id, result));
        }
        results
    }

    /// Stop every running task concurrently.
    pub async fn stop_all(&self) {
        let ids: Vec<TaskId> = self.slots.iter().map(|e| e.key().clone()).collect();
        let mut stops = tokio::task::JoinSet::new();
        for id in ids {
            let Ok(slot) = self.slot(&id) else { continue };
            let grace = self.engine.stop_grace();
            stops.spawn(async move {
                let mut slot = slot.lock().await;
                if let Some(handle) = slot.handle.take() {
                    if let Err(e) = handle.stop(grace).await {
                        tracing::error!("Task {} did not stop cleanly: {}", id, e);
                    }
                    slot.task.mark_stopped();
                }
            });
        }
        while stops.join_next().await.is_some() {}
    }

    fn slot(&self, id: &TaskId) -> Result<Arc<Mutex<TaskSlot>>> {
        self.slots
            .get(id)
            .map(|s| Arc::clone(s.value()))
            .ok_or_else(|| SupervisorError::NotFound(id.clone()))
    }

    async fn stop_handle(&self, id: &TaskId, handle: EngineHandle) -> Result<()> {
        handle
            .stop(self.engine.stop_grace())
            .await
            .map_err(|e| engine_error(id, e))?;
        tracing::info!("Task {} stopped", id);
        Ok(())
    }
}

fn running<'a>(id: &TaskId, slot: &'a TaskSlot) -> Result<&'a EngineHandle> {
    match &slot.handle {
        Some(handle) if handle.is_running() => Ok(handle),
        _ => Err(SupervisorError::NotRunning(id.clone())),
    }
}

fn engine_error(id: &TaskId, e: EngineError) -> SupervisorError {
    match e {
        EngineError::NotRunning => SupervisorError::NotRunning(id.clone()),
        source => SupervisorError::Engine {
            task: id.clone(),
            source,
        },
    }
}
