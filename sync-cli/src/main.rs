//! # linkmirror
//!
//! Mirror directory trees: copy the extensions you care about, symlink
//! everything else.
//!
//! ## Commands
//!
//! - `init`: Write a starter configuration
//! - `run`: Watch and mirror tasks until Ctrl+C
//! - `sync`: Reconcile one task once and exit
//! - `status`: Show tasks, caches and logs
//! - `logs`: Print a task's log for a day
//!
//! ## Example
//!
//! ```bash
//! # Create linkmirror.toml, then add a [[tasks]] entry
//! linkmirror init
//!
//! # One-shot mirror
//! linkmirror sync media
//!
//! # Keep mirroring every autostart task
//! linkmirror run
//!
//! # Yesterday's log
//! linkmirror logs media --date 2024-05-01
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use sync_engine::LogRegistry;

mod commands;
mod config;
mod logging;

use commands::{init, logs, run, status, sync};

/// Live directory mirror: copy selected extensions, symlink the rest.
#[derive(Parser, Debug)]
#[command(name = "linkmirror")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, short, global = true, default_value = config::DEFAULT_CONFIG)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a starter configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Watch and mirror tasks until Ctrl+C
    Run {
        /// Tasks to start (default: every task with autostart = true)
        tasks: Vec<String>,
    },

    /// Reconcile one task once and exit
    Sync {
        /// Task id
        task: String,
    },

    /// Show configured tasks, caches and logs
    Status,

    /// Print a task's log
    Logs {
        /// Task id
        task: String,

        /// Day to show, YYYY-MM-DD (default: today)
        #[arg(long, conflicts_with = "list")]
        date: Option<String>,

        /// List the days that have a log
        #[arg(long)]
        list: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Init { force } => {
            init::run(&cli.config, force).await?;
        }
        Commands::Run { tasks } => {
            let config = config::load(&cli.config)?;
            let registry = Arc::new(LogRegistry::new(&config.logging.dir));
            logging::init(&config.logging, Some(Arc::clone(&registry)))?;
            run::run(config, registry, &tasks).await?;
        }
        Commands::Sync { task } => {
            let config = config::load(&cli.config)?;
            let registry = Arc::new(LogRegistry::new(&config.logging.dir));
            logging::init(&config.logging, Some(Arc::clone(&registry)))?;
            sync::run(&config, registry, &task).await?;
        }
        Commands::Status => {
            let config = config::load(&cli.config)?;
            logging::init(&config.logging, None)?;
            status::run(&config, &cli.config).await?;
        }
        Commands::Logs { task, date, list } => {
            let config = config::load(&cli.config)?;
            logging::init(&config.logging, None)?;
            logs::run(&config, &task, date.as_deref(), list).await?;
        }
    }

    Ok(())
}
