//! Mirror task definitions.

use crate::error::TypesError;
use crate::ids::TaskId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Set of file extensions (without the leading dot) whose files are copied.
///
/// Matching is case-sensitive: `jpg` does not match `photo.JPG`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct ExtensionSet(BTreeSet<String>);

impl ExtensionSet {
    /// Build a set, rejecting empty entries, leading dots and separators.
    pub fn new<I, S>(extensions: I) -> Result<Self, TypesError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = BTreeSet::new();
        for ext in extensions {
            let ext = ext.into();
            let reason = if ext.is_empty() {
                Some("empty")
            } else if ext.starts_with('.') {
                Some("must not start with a dot")
            } else if ext.contains(['/', '\\']) {
                Some("must not contain a path separator")
            } else if ext.chars().any(char::is_whitespace) {
                Some("must not contain whitespace")
            } else {
                None
            };
            if let Some(reason) = reason {
                return Err(TypesError::InvalidExtension {
                    extension: ext,
                    reason,
                });
            }
            set.insert(ext);
        }
        Ok(Self(set))
    }

    /// Parse a comma separated list such as `"jpg, png,nfo"`.
    pub fn parse_list(list: &str) -> Result<Self, TypesError> {
        Self::new(
            list.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_owned),
        )
    }

    /// True if `extension` is in the set.
    pub fn contains(&self, extension: &str) -> bool {
        self.0.contains(extension)
    }

    /// Number of extensions.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if nothing is copied (everything becomes a symlink).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl TryFrom<Vec<String>> for ExtensionSet {
    type Error = TypesError;

    fn try_from(value: Vec<String>) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ExtensionSet> for Vec<String> {
    fn from(set: ExtensionSet) -> Self {
        set.0.into_iter().collect()
    }
}

impl fmt::Display for ExtensionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined: Vec<&str> = self.iter().collect();
        f.write_str(&joined.join(","))
    }
}

/// Lifecycle state of a task as seen by the supervisor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Not mirroring.
    #[default]
    Stopped,
    /// Engine is live.
    Running,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Stopped => f.write_str("stopped"),
            TaskStatus::Running => f.write_str("running"),
        }
    }
}

/// A configured mirror from `input_dir` to `output_dir`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier.
    pub id: TaskId,
    /// Human readable label.
    pub name: String,
    /// Source tree root.
    pub input_dir: PathBuf,
    /// Destination tree root.
    pub output_dir: PathBuf,
    /// Extensions that are copied; everything else is symlinked.
    pub extensions: ExtensionSet,
    /// Current lifecycle state.
    #[serde(default)]
    pub status: TaskStatus,
    /// Unix seconds of the last start, if ever started.
    #[serde(default)]
    pub start_time: Option<u64>,
    /// Unix seconds of the last stop, if ever stopped.
    #[serde(default)]
    pub stop_time: Option<u64>,
}

impl Task {
    /// Create a stopped task.
    pub fn new(
        id: TaskId,
        name: impl Into<String>,
        input_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        extensions: ExtensionSet,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            input_dir: input_dir.into(),
            output_dir: output_dir.into(),
            extensions,
            status: TaskStatus::Stopped,
            start_time: None,
            stop_time: None,
        }
    }

    /// Reject trees that contain one another.
    ///
    /// The check is lexical; callers that need symlink-aware comparison
    /// should canonicalize the directories first.
    pub fn validate(&self) -> Result<(), TypesError> {
        if overlaps(&self.input_dir, &self.output_dir) {
            return Err(TypesError::OverlappingDirs {
                input: self.input_dir.clone(),
                output: self.output_dir.clone(),
            });
        }
        Ok(())
    }

    /// Mark as running and stamp the start time.
    pub fn mark_running(&mut self) {
        self.status = TaskStatus::Running;
        self.start_time = Some(unix_now());
    }

    /// Mark as stopped and stamp the stop time.
    pub fn mark_stopped(&mut self) {
        self.status = TaskStatus::Stopped;
        self.stop_time = Some(unix_now());
    }
}

fn overlaps(a: &Path, b: &Path) -> bool {
    a.starts_with(b) || b.starts_with(a)
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(input: &str, output: &str) -> Task {
        Task::new(
            TaskId::new("t1").unwrap(),
            "media",
            input,
            output,
            ExtensionSet::parse_list("jpg,png").unwrap(),
        )
    }

    #[test]
    fn extension_set_parses_csv() {
        let set = ExtensionSet::parse_list(" jpg, png ,,nfo").unwrap();
        assert_eq!(set.len(), 3);
        assert!(set.contains("png"));
        assert!(!set.contains("PNG"));
        assert_eq!(set.to_string(), "jpg,nfo,png");
    }

    #[test]
    fn extension_set_rejects_bad_entries() {
        assert!(ExtensionSet::new([".jpg"]).is_err());
        assert!(ExtensionSet::new([""]).is_err());
        assert!(ExtensionSet::new(["a/b"]).is_err());
        assert!(ExtensionSet::new(["a b"]).is_err());
    }

    #[test]
    fn extension_set_serde_as_list() {
        let set: ExtensionSet = serde_json::from_str(r#"["mkv","jpg"]"#).unwrap();
        assert_eq!(serde_json::to_string(&set).unwrap(), r#"["jpg","mkv"]"#);
        assert!(serde_json::from_str::<ExtensionSet>(r#"[".mkv"]"#).is_err());
    }

    #[test]
    fn new_task_is_stopped() {
        let t = task("/in", "/out");
        assert_eq!(t.status, TaskStatus::Stopped);
        assert!(t.start_time.is_none());
        assert!(t.validate().is_ok());
    }

    #[test]
    fn nested_dirs_are_rejected() {
        assert!(task("/in", "/in/mirror").validate().is_err());
        assert!(task("/data/in", "/data").validate().is_err());
        assert!(task("/same", "/same").validate().is_err());
        assert!(task("/data/in", "/data/input").validate().is_ok());
    }

    #[test]
    fn lifecycle_stamps_times() {
        let mut t = task("/in", "/out");
        t.mark_running();
        assert_eq!(t.status, TaskStatus::Running);
        assert!(t.start_time.is_some());
        t.mark_stopped();
        assert_eq!(t.status, TaskStatus::Stopped);
        assert!(t.stop_time.is_some());
    }
}
