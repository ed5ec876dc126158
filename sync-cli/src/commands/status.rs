//! Show configured tasks, their caches and logs.

use anyhow::Result;
use std::path::Path;
use sync_engine::{CacheStore, Config, DailyLog, JsonFileBackend};

/// Run the status command.
pub async fn run(config: &Config, config_path: &Path) -> Result<()> {
    println!("=== linkmirror status ===");
    println!();
    println!("Config:  {}", config_path.display());
    println!("Cache:   {}", config.cache.dir.display());
    println!("Logs:    {}", config.logging.dir.display());
    println!();

    if config.tasks.is_empty() {
        println!("Tasks: NONE CONFIGURED");
        println!();
        println!("Add a [[tasks]] entry to {}.", config_path.display());
        return Ok(());
    }

    println!("Tasks:");
    for task in &config.tasks {
        let backend = JsonFileBackend::for_task(&config.cache.dir, &task.id);
        let cache_path = backend.path().to_path_buf();
        let stats = tokio::task::spawn_blocking(move || {
            cache_path
                .exists()
                .then(|| CacheStore::open(Box::new(backend)).stats())
        })
        .await?;
        let days = DailyLog::new(&config.logging.dir, task.id.clone()).days()?;

        println!("  [{}] {}", task.id, if task.name.is_empty() { task.id.as_str() } else { task.name.as_str() });
        println!("    Input:      {}", task.input_dir.display());
        println!("    Output:     {}", task.output_dir.display());
        println!("    Copy:       {}", task.extensions);
        println!("    Autostart:  {}", if task.autostart { "yes" } else { "no" });
        match stats {
            Some(stats) => println!(
                "    Cache:      {} entries ({} copied, {} linked, {} bytes)",
                stats.entries, stats.copied, stats.linked, stats.copied_bytes
            ),
            None => println!("    Cache:      never synced"),
        }
        match (days.first(), days.last()) {
            (Some(first), Some(last)) => {
                println!("    Logs:       {} day(s), {} .. {}", days.len(), first, last)
            }
            _ => println!("    Logs:       none"),
        }
    }

    Ok(())
}
