//! Print a task's log for one day.

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use sync_engine::{Config, DailyLog};

use crate::config;

/// Run the logs command.
pub async fn run(config: &Config, task_id: &str, date: Option<&str>, list: bool) -> Result<()> {
    let task = config::task(config, task_id)?;
    let log = DailyLog::new(&config.logging.dir, task.id.clone());

    if list {
        let days = log.days()?;
        if days.is_empty() {
            println!("No logs for task {}", task.id);
        }
        for day in days {
            println!("{}  {}", day, log.path_for(day).display());
        }
        return Ok(());
    }

    let day = match date {
        Some(text) => NaiveDate::parse_from_str(text, "%Y-%m-%d")
            .with_context(|| format!("Invalid date '{}', expected YYYY-MM-DD", text))?,
        None => Local::now().date_naive(),
    };
    match log.read_day(day)? {
        Some(text) => print!("{}", text),
        None => println!("No log for task {} on {}", task.id, day),
    }
    Ok(())
}
