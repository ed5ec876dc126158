//! Tracing setup for the linkmirror binary.

use anyhow::{Context, Result};
use std::sync::Arc;
use sync_engine::{LogRegistry, LoggingConfig, TaskLogLayer};
use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global subscriber.
///
/// Console output goes to stderr, filtered by `RUST_LOG` or the configured
/// level. When `task_logs` is given, task-scoped events are also written to
/// the per-task daily files at `file_level` or above, independent of the
/// console filter.
pub fn init(config: &LoggingConfig, task_logs: Option<Arc<LogRegistry>>) -> Result<()> {
    let console_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .with_context(|| format!("Invalid log level '{}'", config.level))?;
    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .with_filter(console_filter);

    let file_layer = match task_logs {
        Some(registry) => {
            let level: Level = config
                .file_level
                .parse()
                .with_context(|| format!("Invalid file log level '{}'", config.file_level))?;
            Some(TaskLogLayer::new(registry, level))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;
    Ok(())
}
