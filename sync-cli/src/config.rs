//! Configuration helpers for the linkmirror CLI.

use anyhow::{Context, Result};
use std::path::Path;
use sync_engine::{Config, TaskConfig};
use sync_types::TaskId;

/// Default configuration file name.
pub const DEFAULT_CONFIG: &str = "linkmirror.toml";

/// Starter configuration written by `linkmirror init`.
pub const SAMPLE_CONFIG: &str = r#"# linkmirror configuration

[engine]
workers = 0                     # 0 = 2 x available CPUs
watcher = "auto"                # auto | native | poll
poll_interval_ms = 2000
debounce_ms = 200
debounce_max_hold_ms = 2000
retry_attempts = 3
retry_base_delay_ms = 100
retry_max_delay_ms = 2000
reconcile_interval_secs = 0     # 0 = no periodic reconcile
stop_grace_secs = 10
channel_capacity = 1024

[cache]
dir = ".linkmirror/cache"
flush_batch = 100
flush_interval_secs = 5

[logging]
dir = ".linkmirror/logs"
level = "info"
file_level = "info"
retention_days = 30
retention_check_secs = 3600

# [[tasks]]
# id = "media"
# name = "Media library"
# input_dir = "/srv/media"
# output_dir = "/srv/mirror"
# extensions = ["jpg", "png", "nfo"]
# autostart = true
"#;

/// Load and validate the configuration at `path`.
pub fn load(path: &Path) -> Result<Config> {
    Config::from_file(path).with_context(|| {
        format!(
            "Failed to load {}. Run 'linkmirror init' to create one.",
            path.display()
        )
    })
}

/// Look up a task by id.
pub fn task<'a>(config: &'a Config, id: &str) -> Result<&'a TaskConfig> {
    let id: TaskId = id.parse().with_context(|| format!("Invalid task id '{}'", id))?;
    config
        .task(&id)
        .with_context(|| format!("Task '{}' not found in configuration", id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_config_parses() {
        let config: Config = toml_from_sample();
        assert!(config.tasks.is_empty());
        assert_eq!(config.engine.debounce_ms, 200);
        assert_eq!(config.logging.retention_days, 30);
    }

    #[test]
    fn missing_file_mentions_init() {
        let err = load(Path::new("/nonexistent/linkmirror.toml")).unwrap_err();
        assert!(format!("{err:#}").contains("linkmirror init"));
    }

    fn toml_from_sample() -> Config {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG);
        std::fs::write(&path, SAMPLE_CONFIG).unwrap();
        load(&path).unwrap()
    }
}
