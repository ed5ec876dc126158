//! Run the supervisor until Ctrl+C.

use anyhow::{Context, Result};
use std::sync::Arc;
use sync_engine::{spawn_retention_task, Config, LogRegistry, TaskSupervisor};
use sync_types::TaskId;

/// Run the run command.
///
/// Starts the named tasks, or every `autostart` task when none are named,
/// then keeps mirroring until interrupted.
pub async fn run(config: Config, logs: Arc<LogRegistry>, tasks: &[String]) -> Result<()> {
    let supervisor = TaskSupervisor::from_config(&config)
        .context("Invalid task configuration")?
        .with_logs(Arc::clone(&logs));

    let results = if tasks.is_empty() {
        supervisor.start_autostart().await
    } else {
        let mut results = Vec::with_capacity(tasks.len());
        for name in tasks {
            let id: TaskId = name.parse().with_context(|| format!("Invalid task id '{}'", name))?;
            let result = supervisor.start(&id).await;
            results.push((id, result));
        }
        results
    };

    let mut started = 0;
    for (id, result) in &results {
        match result {
            Ok(()) => {
                started += 1;
                println!("Started {}", id);
            }
            Err(e) => eprintln!("Failed to start {}: {}", id, e),
        }
    }
    if started == 0 {
        anyhow::bail!("No task is running. Name tasks to start or set autostart = true.");
    }

    let retention = spawn_retention_task(config.logging.clone());

    println!("Mirroring {} task(s). Press Ctrl+C to stop.", started);
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    println!();
    println!("Shutting down...");
    supervisor.stop_all().await;
    retention.abort();
    println!("Stopped.");

    Ok(())
}
