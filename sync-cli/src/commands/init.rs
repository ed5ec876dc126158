//! Write a starter configuration file.

use anyhow::{Context, Result};
use std::path::Path;

use crate::config::SAMPLE_CONFIG;

/// Run the init command.
pub async fn run(config_path: &Path, force: bool) -> Result<()> {
    if config_path.exists() && !force {
        anyhow::bail!(
            "{} already exists. Use --force to overwrite it.",
            config_path.display()
        );
    }

    if let Some(parent) = config_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .context("Failed to create configuration directory")?;
    }
    tokio::fs::write(config_path, SAMPLE_CONFIG)
        .await
        .context("Failed to write configuration")?;

    println!("Configuration written to {}", config_path.display());
    println!();
    println!("Next steps:");
    println!("  1. Add a [[tasks]] entry with input_dir, output_dir and extensions");
    println!("  2. Mirror once:      linkmirror sync <task>");
    println!("  3. Or keep watching: linkmirror run");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn init_writes_loadable_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("conf/linkmirror.toml");
        run(&path, false).await.unwrap();

        let config = crate::config::load(&path).unwrap();
        assert!(config.tasks.is_empty());
    }

    #[tokio::test]
    async fn init_refuses_to_overwrite_without_force() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("linkmirror.toml");
        std::fs::write(&path, "# mine").unwrap();

        assert!(run(&path, false).await.is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "# mine");

        run(&path, true).await.unwrap();
        assert!(std::fs::read_to_string(&path).unwrap().contains("[engine]"));
    }
}
