//! Error types for sync-engine.

use std::path::PathBuf;
use sync_types::{TaskId, TypesError};

/// Cache persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Reading or writing the cache file failed.
    #[error("cache I/O error at {path}: {source}")]
    Io {
        /// Cache file or directory.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The cache file is not valid JSON or has an unknown layout.
    #[error("cache file {path} is corrupt: {reason}")]
    Corrupt {
        /// Cache file.
        path: PathBuf,
        /// What failed to parse.
        reason: String,
    },

    /// Serializing the in-memory cache failed.
    #[error("cache serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Change source errors.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// The native notification backend could not be created.
    #[error("native watcher unavailable: {0}")]
    Unavailable(#[source] notify::Error),

    /// Subscribing to a path failed.
    #[error("failed to watch {path}: {source}")]
    Subscribe {
        /// Path being watched.
        path: PathBuf,
        /// Underlying notify error.
        source: notify::Error,
    },

    /// The backend reported an unrecoverable error while running.
    #[error("native watcher failed: {0}")]
    Failed(String),

    /// The watched root could not be read.
    #[error("cannot scan {path}: {source}")]
    Scan {
        /// Root being scanned.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// Per-file executor errors.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// A filesystem operation failed.
    #[error("{op} failed for {path}: {source}")]
    Io {
        /// Short operation name (`copy`, `symlink`, `remove`, ...).
        op: &'static str,
        /// Path being operated on.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The source changed while it was being copied.
    #[error("source changed during copy: {0}")]
    SourceChanged(PathBuf),

    /// The event path cannot be mapped to a relative key.
    #[error("unusable path: {0}")]
    Path(#[from] TypesError),
}

impl SyncError {
    /// True if retrying the same action may succeed.
    ///
    /// Filesystem failures (permission races, locked files, full disks) and
    /// writes racing a still-growing source are transient. Path mapping
    /// failures are not.
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::Io { .. } | SyncError::SourceChanged(_) => true,
            SyncError::Path(_) => false,
        }
    }

    pub(crate) fn io(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SyncError::Io {
            op,
            path: path.into(),
            source,
        }
    }
}

/// Structural errors that prevent an engine from starting.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The input directory is missing or unreadable.
    #[error("input directory {path} is not accessible: {source}")]
    InputUnavailable {
        /// Configured input directory.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The input path exists but is not a directory.
    #[error("input path {0} is not a directory")]
    InputNotDirectory(PathBuf),

    /// The output directory could not be created.
    #[error("cannot create output directory {path}: {source}")]
    OutputUnavailable {
        /// Configured output directory.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The task definition is inconsistent.
    #[error("invalid task: {0}")]
    InvalidTask(#[from] TypesError),

    /// Cache setup failed.
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    /// A blocking job panicked or was cancelled.
    #[error("background job failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// The engine has stopped and no longer accepts requests.
    #[error("engine is not running")]
    NotRunning,
}

/// Control surface errors.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    /// No task with this id.
    #[error("task not found: {0}")]
    NotFound(TaskId),

    /// A task with this id is already registered.
    #[error("task already exists: {0}")]
    AlreadyExists(TaskId),

    /// The operation requires a stopped task.
    #[error("task is running: {0}")]
    Running(TaskId),

    /// The operation requires a running task.
    #[error("task is not running: {0}")]
    NotRunning(TaskId),

    /// The engine failed to start.
    #[error("task {task} failed to start: {source}")]
    Start {
        /// Task that failed.
        task: TaskId,
        /// Underlying engine error.
        source: EngineError,
    },

    /// A running engine reported a failure.
    #[error("task {task}: {source}")]
    Engine {
        /// Task that failed.
        task: TaskId,
        /// Underlying engine error.
        source: EngineError,
    },

    /// The task definition is inconsistent.
    #[error("invalid task: {0}")]
    Invalid(#[from] TypesError),
}

/// Result type alias for executor operations.
pub type SyncResult<T> = std::result::Result<T, SyncError>;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
