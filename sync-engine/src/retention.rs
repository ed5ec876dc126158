//! Background log retention task.
//!
//! Runs periodically to delete task log files older than the retention window.

use crate::config::LoggingConfig;
use crate::log_sink::prune_dir;
use chrono::Local;
use std::time::Duration;
use tokio::time::interval;

/// Spawn the retention task.
///
/// Returns a handle that can be used to abort the task.
pub fn spawn_retention_task(config: LoggingConfig) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if config.retention_days == 0 {
            tracing::info!("Log retention disabled, keeping logs forever");
            return;
        }

        let interval_secs = config.retention_check_secs.max(1);
        tracing::info!(
            "Log retention started (keep: {} days, interval: {}s)",
            config.retention_days,
            interval_secs
        );

        let mut timer = interval(Duration::from_secs(interval_secs));

        loop {
            timer.tick().await;
            let dir = config.dir.clone();
            let days = config.retention_days;
            let today = Local::now().date_naive();

            match tokio::task::spawn_blocking(move || prune_dir(&dir, days, today)).await {
                Ok(Ok(0)) => tracing::debug!("Retention: no expired log files"),
                Ok(Ok(removed)) => tracing::info!("Retention: deleted {} expired log files", removed),
                Ok(Err(e)) => tracing::error!("Retention error: {}", e),
                Err(e) => tracing::error!("Retention task panicked: {}", e),
            }
        }
    })
}
