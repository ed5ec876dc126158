//! Per-task, per-day log files.
//!
//! Each task appends to `file_sync_<task_id>_<YYYYMMDD>.log` in the log
//! directory, one line per event:
//!
//! ```text
//! 2024-05-01 14:03:22 - INFO - Copied movies/a.jpg (51200 bytes)
//! ```
//!
//! [`TaskLogLayer`] feeds these files from `tracing`: any event emitted
//! inside a `task` span whose `task_id` has a registered [`DailyLog`] is
//! appended to that task's file for the current local day.

use chrono::{Local, NaiveDate, NaiveDateTime};
use dashmap::DashMap;
use std::fmt::Write as _;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use sync_types::TaskId;
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id};
use tracing::{Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

const FILE_PREFIX: &str = "file_sync_";
const FILE_SUFFIX: &str = ".log";
const DAY_FORMAT: &str = "%Y%m%d";

/// Name of the span that marks work belonging to one task.
pub const TASK_SPAN: &str = "task";

/// Append-only log for one task, rolled per calendar day.
pub struct DailyLog {
    dir: PathBuf,
    task_id: TaskId,
    current: Mutex<Option<(NaiveDate, File)>>,
}

impl DailyLog {
    /// Log for `task_id` inside `dir`. Nothing is created until the first append.
    pub fn new(dir: impl Into<PathBuf>, task_id: TaskId) -> Self {
        Self {
            dir: dir.into(),
            task_id,
            current: Mutex::new(None),
        }
    }

    /// File name for `task_id` on `date`.
    pub fn file_name(task_id: &TaskId, date: NaiveDate) -> String {
        format!("{}{}_{}{}", FILE_PREFIX, task_id, date.format(DAY_FORMAT), FILE_SUFFIX)
    }

    /// Path of the file for `date`.
    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(Self::file_name(&self.task_id, date))
    }

    /// Append a line stamped with the current local time.
    pub fn append(&self, level: Level, message: &str) -> io::Result<()> {
        self.append_at(Local::now().naive_local(), level, message)
    }

    /// Append a line stamped with `at`, into the file for `at`'s day.
    pub fn append_at(&self, at: NaiveDateTime, level: Level, message: &str) -> io::Result<()> {
        let day = at.date();
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if current.as_ref().map(|(d, _)| *d) != Some(day) {
            fs::create_dir_all(&self.dir)?;
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.path_for(day))?;
            *current = Some((day, file));
        }
        if let Some((_, file)) = current.as_mut() {
            writeln!(file, "{} - {} - {}", at.format("%Y-%m-%d %H:%M:%S"), level, message)?;
        }
        Ok(())
    }

    /// Full contents of the log for `date`, or `None` if there is none.
    pub fn read_day(&self, date: NaiveDate) -> io::Result<Option<String>> {
        match fs::read_to_string(self.path_for(date)) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Days that have a log file, oldest first.
    pub fn days(&self) -> io::Result<Vec<NaiveDate>> {
        let mut days: Vec<NaiveDate> = list_log_files(&self.dir)?
            .into_iter()
            .filter(|(task, _, _)| task == self.task_id.as_str())
            .map(|(_, day, _)| day)
            .collect();
        days.sort();
        days.dedup();
        Ok(days)
    }

    /// Delete this task's files older than `retention_days` relative to `today`.
    ///
    /// `retention_days = 0` keeps everything. Returns the number of files removed.
    pub fn prune(&self, retention_days: u32, today: NaiveDate) -> io::Result<usize> {
        prune_files(&self.dir, Some(self.task_id.as_str()), retention_days, today)
    }
}

/// Delete every task's log files older than `retention_days` in `dir`.
pub fn prune_dir(dir: &Path, retention_days: u32, today: NaiveDate) -> io::Result<usize> {
    prune_files(dir, None, retention_days, today)
}

fn prune_files(dir: &Path, task: Option<&str>, retention_days: u32, today: NaiveDate) -> io::Result<usize> {
    if retention_days == 0 {
        return Ok(0);
    }
    let mut removed = 0;
    for (owner, day, path) in list_log_files(dir)? {
        if task.is_some_and(|t| t != owner) {
            continue;
        }
        if (today - day).num_days() >= i64::from(retention_days) {
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
    }
    Ok(removed)
}

/// Parse `file_sync_<task>_<YYYYMMDD>.log` names in `dir`.
fn list_log_files(dir: &Path) -> io::Result<Vec<(String, NaiveDate, PathBuf)>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let mut out = Vec::new();
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(stem) = name
            .strip_prefix(FILE_PREFIX)
            .and_then(|s| s.strip_suffix(FILE_SUFFIX))
        else {
            continue;
        };
        let Some((task, day)) = stem.rsplit_once('_') else {
            continue;
        };
        if let Ok(day) = NaiveDate::parse_from_str(day, DAY_FORMAT) {
            out.push((task.to_string(), day, entry.path()));
        }
    }
    Ok(out)
}

/// Task id to log sink mapping shared between the supervisor and the layer.
pub struct LogRegistry {
    dir: PathBuf,
    sinks: DashMap<String, Arc<DailyLog>>,
}

impl LogRegistry {
    /// Registry writing into `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            sinks: DashMap::new(),
        }
    }

    /// Log directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Sink for `task`, creating it on first use.
    pub fn register(&self, task: &TaskId) -> Arc<DailyLog> {
        Arc::clone(
            self.sinks
                .entry(task.to_string())
                .or_insert_with(|| Arc::new(DailyLog::new(&self.dir, task.clone())))
                .value(),
        )
    }

    /// Stop routing events for `task`.
    pub fn unregister(&self, task: &TaskId) {
        self.sinks.remove(task.as_str());
    }

    /// Registered sink for a task id, if any.
    pub fn get(&self, task: &str) -> Option<Arc<DailyLog>> {
        self.sinks.get(task).map(|s| Arc::clone(s.value()))
    }

    /// Sink for reading a task's logs whether or not it is registered.
    pub fn reader(&self, task: &TaskId) -> DailyLog {
        DailyLog::new(&self.dir, task.clone())
    }
}

/// Span extension carrying the task id.
struct TaskTag(String);

/// `tracing` layer routing task-scoped events into [`DailyLog`]s.
pub struct TaskLogLayer {
    registry: Arc<LogRegistry>,
    max_level: Level,
}

impl TaskLogLayer {
    /// Route events at `max_level` or more severe.
    pub fn new(registry: Arc<LogRegistry>, max_level: Level) -> Self {
        Self { registry, max_level }
    }
}

impl<S> Layer<S> for TaskLogLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        if attrs.metadata().name() != TASK_SPAN {
            return;
        }
        let mut visitor = TaskIdVisitor::default();
        attrs.record(&mut visitor);
        if let (Some(task_id), Some(span)) = (visitor.task_id, ctx.span(id)) {
            span.extensions_mut().insert(TaskTag(task_id));
        }
    }

    fn on_event(&self, event: &tracing::Event<'_>, ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        if level > self.max_level {
            return;
        }
        let Some(scope) = ctx.event_scope(event) else {
            return;
        };
        let task_id = scope
            .from_root()
            .find_map(|span| span.extensions().get::<TaskTag>().map(|t| t.0.clone()));
        let Some(sink) = task_id.and_then(|id| self.registry.get(&id)) else {
            return;
        };
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        // Logging must never fail the caller.
        let _ = sink.append(level, &visitor.finish());
    }
}

#[derive(Default)]
struct TaskIdVisitor {
    task_id: Option<String>,
}

impl Visit for TaskIdVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "task_id" {
            self.task_id = Some(value.to_owned());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "task_id" {
            self.task_id = Some(format!("{value:?}"));
        }
    }
}

/// Collects the message plus any extra fields as `key=value`.
#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn finish(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else if self.message.is_empty() {
            self.fields.trim_start().to_owned()
        } else {
            format!("{}{}", self.message, self.fields)
        }
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_owned();
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}
