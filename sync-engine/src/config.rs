//! Configuration loading for linkmirror.
//!
//! Configuration is loaded from a TOML file (default: `linkmirror.toml`).
//! Every field has a default, so an empty file is a valid configuration
//! with no tasks.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use sync_core::RetryPolicy;
use sync_types::{ExtensionSet, Task, TaskId, TypesError};

/// Root configuration for linkmirror.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Engine tuning shared by every task.
    pub engine: EngineConfig,
    /// Cache persistence.
    pub cache: CacheConfig,
    /// Log sink and retention.
    pub logging: LoggingConfig,
    /// Mirror tasks.
    pub tasks: Vec<TaskConfig>,
}

/// Which change source to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WatcherMode {
    /// Native notifications, or polling on network filesystems and on failure.
    #[default]
    Auto,
    /// Native notifications only (still falls back to polling if they fail).
    Native,
    /// Periodic full-tree polling.
    Poll,
}

/// Engine configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Worker pool size per task (default: 0 = 2 × available CPUs).
    #[serde(default)]
    pub workers: usize,
    /// Change source selection (default: auto).
    #[serde(default)]
    pub watcher: WatcherMode,
    /// Polling interval in milliseconds (default: 2000).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Coalescing window in milliseconds (default: 200).
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Longest a continuously changing path is held, in milliseconds (default: 2000).
    #[serde(default = "default_debounce_max_hold_ms")]
    pub debounce_max_hold_ms: u64,
    /// Attempts per event including the first (default: 3).
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// First retry delay in milliseconds (default: 100).
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Retry delay cap in milliseconds (default: 2000).
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    /// Periodic reconcile interval in seconds (default: 0 = disabled).
    #[serde(default)]
    pub reconcile_interval_secs: u64,
    /// Grace period for stop in seconds (default: 10).
    #[serde(default = "default_stop_grace_secs")]
    pub stop_grace_secs: u64,
    /// Capacity of the raw event channel and the coalescer (default: 1024).
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

/// Cache persistence configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Directory holding `<task_id>.json` cache files.
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,
    /// Flush after this many unsaved writes (default: 100).
    #[serde(default = "default_flush_batch")]
    pub flush_batch: usize,
    /// Flush unsaved writes at least this often, in seconds (default: 5).
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Directory holding per-task, per-day log files.
    #[serde(default = "default_log_dir")]
    pub dir: PathBuf,
    /// Console filter directive (default: "info"; `RUST_LOG` overrides).
    #[serde(default = "default_level")]
    pub level: String,
    /// Minimum level written to task log files (default: "info").
    #[serde(default = "default_level")]
    pub file_level: String,
    /// Days of logs to keep (default: 30, 0 = forever).
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    /// Retention check interval in seconds (default: 3600).
    #[serde(default = "default_retention_check_secs")]
    pub retention_check_secs: u64,
}

/// One mirror task.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TaskConfig {
    /// Unique task identifier.
    pub id: TaskId,
    /// Display name (default: the id).
    #[serde(default)]
    pub name: String,
    /// Source tree.
    pub input_dir: PathBuf,
    /// Destination tree.
    pub output_dir: PathBuf,
    /// Extensions to copy; everything else is symlinked.
    #[serde(default)]
    pub extensions: ExtensionSet,
    /// Start when the supervisor boots (default: false).
    #[serde(default)]
    pub autostart: bool,
}

// Default value functions
fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_debounce_ms() -> u64 {
    200
}

fn default_debounce_max_hold_ms() -> u64 {
    2000
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    100
}

fn default_retry_max_delay_ms() -> u64 {
    2000
}

fn default_stop_grace_secs() -> u64 {
    10
}

fn default_channel_capacity() -> usize {
    1024
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(".linkmirror/cache")
}

fn default_flush_batch() -> usize {
    100
}

fn default_flush_interval_secs() -> u64 {
    5
}

fn default_log_dir() -> PathBuf {
    PathBuf::from(".linkmirror/logs")
}

fn default_level() -> String {
    "info".to_string()
}

fn default_retention_days() -> u32 {
    30
}

fn default_retention_check_secs() -> u64 {
    3600 // 1 hour
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            watcher: WatcherMode::default(),
            poll_interval_ms: default_poll_interval_ms(),
            debounce_ms: default_debounce_ms(),
            debounce_max_hold_ms: default_debounce_max_hold_ms(),
            retry_attempts: default_retry_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            reconcile_interval_secs: 0,
            stop_grace_secs: default_stop_grace_secs(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
            flush_batch: default_flush_batch(),
            flush_interval_secs: default_flush_interval_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
            level: default_level(),
            file_level: default_level(),
            retention_days: default_retention_days(),
            retention_check_secs: default_retention_check_secs(),
        }
    }
}

impl EngineConfig {
    /// Effective worker count.
    pub fn worker_count(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        cpus * 2
    }

    /// Retry schedule for transient executor failures.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_attempts.max(1),
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
        }
    }

    /// Polling interval.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Coalescing window.
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Longest hold for a busy path.
    pub fn debounce_max_hold(&self) -> Duration {
        Duration::from_millis(self.debounce_max_hold_ms)
    }

    /// Periodic reconcile interval, if enabled.
    pub fn reconcile_interval(&self) -> Option<Duration> {
        (self.reconcile_interval_secs > 0).then(|| Duration::from_secs(self.reconcile_interval_secs))
    }

    /// Stop grace period.
    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }
}

impl CacheConfig {
    /// Periodic flush interval.
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs.max(1))
    }
}

impl TaskConfig {
    /// Build the runtime task definition (initially stopped).
    pub fn to_task(&self) -> Task {
        let name = if self.name.is_empty() {
            self.id.to_string()
        } else {
            self.name.clone()
        };
        Task::new(
            self.id.clone(),
            name,
            self.input_dir.clone(),
            self.output_dir.clone(),
            self.extensions.clone(),
        )
    }
}

impl Config {
    /// Load configuration from a TOML file and validate it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for task in &self.tasks {
            if !seen.insert(&task.id) {
                return Err(ConfigError::DuplicateTask(task.id.clone()));
            }
            task.to_task()
                .validate()
                .map_err(|source| ConfigError::Invalid {
                    task: task.id.clone(),
                    source,
                })?;
        }
        Ok(())
    }

    /// Find a task by id.
    pub fn task(&self, id: &TaskId) -> Option<&TaskConfig> {
        self.tasks.iter().find(|t| &t.id == id)
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// Two tasks share an id.
    #[error("duplicate task id: {0}")]
    DuplicateTask(TaskId),
    /// A task definition is inconsistent.
    #[error("invalid task {task}: {source}")]
    Invalid {
        /// Offending task.
        task: TaskId,
        /// What is wrong with it.
        source: TypesError,
    },
}
