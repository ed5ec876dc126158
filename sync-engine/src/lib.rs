//! # linkmirror-engine
//!
//! Live directory mirror engine.
//!
//! Each task mirrors an input tree into an output tree:
//! - Files whose extension is in the task's allow-set are copied
//! - Everything else becomes an absolute symlink to the source
//! - Changes are picked up live (native notifications, or polling)
//! - Full reconciliation passes repair any drift
//!
//! ## Architecture
//!
//! ```text
//!  input tree
//!      │  notify / stat polling
//!      ▼
//! ┌──────────────┐   ┌────────────┐   ┌─────────────┐   ┌──────────┐
//! │ ChangeSource │──►│ Normalizer │──►│ WorkerPool  │──►│ Executor │──► output tree
//! └──────────────┘   └────────────┘   └─────────────┘   └────┬─────┘
//!                                            ▲               │
//!                                     ┌──────┴─────┐   ┌─────▼──────┐
//!                                     │ Reconciler │   │ CacheStore │ (JSON per task)
//!                                     └────────────┘   └────────────┘
//! ```
//!
//! [`TaskSupervisor`] owns the registry of tasks and one [`EngineHandle`]
//! per running task. [`TaskLogLayer`] writes each task's events to
//! `file_sync_<task_id>_<YYYYMMDD>.log`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod hash;
pub mod log_sink;
pub mod normalize;
pub mod pool;
pub mod reconcile;
pub mod retention;
pub mod supervisor;
pub mod watch;

pub use cache::{CacheBackend, CacheStats, CacheStore, JsonFileBackend, MemoryBackend};
pub use config::{CacheConfig, Config, ConfigError, EngineConfig, LoggingConfig, TaskConfig, WatcherMode};
pub use engine::{Engine, EngineHandle, EngineState};
pub use error::{CacheError, EngineError, SupervisorError, SyncError, WatchError};
pub use executor::{Executor, Outcome};
pub use log_sink::{DailyLog, LogRegistry, TaskLogLayer};
pub use reconcile::{ReconcileReason, ReconcileStats, Reconciler};
pub use retention::spawn_retention_task;
pub use supervisor::TaskSupervisor;
