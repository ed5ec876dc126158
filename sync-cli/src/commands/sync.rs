//! One-shot reconciliation of a single task.

use anyhow::{Context, Result};
use std::sync::Arc;
use sync_engine::{Config, Engine, LogRegistry};

use crate::config;

/// Run the sync command.
pub async fn run(config: &Config, logs: Arc<LogRegistry>, task_id: &str) -> Result<()> {
    let task_config = config::task(config, task_id)?;
    let task = task_config.to_task();
    logs.register(&task.id);

    let stats = Engine::sync_once(&task, &config.engine, &config.cache)
        .await
        .with_context(|| format!("Sync of task '{}' failed", task.id))?;

    println!("Task {} ({})", task.id, task.name);
    println!("  {} -> {}", task.input_dir.display(), task.output_dir.display());
    println!("  Scanned:      {}", stats.scanned);
    println!("  Copied:       {} ({} bytes)", stats.copied, stats.bytes_copied);
    println!("  Hash matched: {}", stats.hash_matched);
    println!("  Linked:       {}", stats.linked);
    println!("  Unchanged:    {}", stats.unchanged);
    println!("  Deleted:      {}", stats.deleted);
    println!("  Pruned dirs:  {}", stats.pruned_dirs);
    println!("  Failed:       {}", stats.failed);
    println!("  Took:         {:.2?}", stats.duration);

    if stats.failed > 0 {
        anyhow::bail!("{} change(s) failed; see the task log", stats.failed);
    }
    Ok(())
}
