//! Identity and path key types for linkmirror.

use crate::error::TypesError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

/// Longest accepted task identifier. Ids end up inside log and cache file names.
const MAX_TASK_ID_LEN: usize = 64;

/// A unique identifier for a mirror task.
///
/// Restricted to ASCII letters, digits, `-` and `_` so it can be embedded
/// in file names (`<task_id>.json`, `file_sync_<task_id>_<day>.log`).
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TaskId(String);

impl TaskId {
    /// Create a TaskId, validating the character set and length.
    pub fn new(id: impl Into<String>) -> Result<Self, TypesError> {
        let id = id.into();
        let valid = !id.is_empty()
            && id.len() <= MAX_TASK_ID_LEN
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if valid {
            Ok(Self(id))
        } else {
            Err(TypesError::InvalidTaskId(id))
        }
    }

    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TaskId {
    type Error = TypesError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TaskId> for String {
    fn from(id: TaskId) -> Self {
        id.0
    }
}

impl FromStr for TaskId {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskId({})", self.0)
    }
}

/// A path relative to a task's input (or output) root.
///
/// Stored as a UTF-8 string with `/` separators so it is stable as a cache
/// key across platforms. Never empty, never absolute, never contains `..`.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RelPath(String);

impl RelPath {
    /// Build a key from a relative path made only of normal components.
    pub fn from_path(path: &Path) -> Result<Self, TypesError> {
        let mut parts = Vec::new();
        for component in path.components() {
            match component {
                Component::Normal(part) => {
                    let part = part
                        .to_str()
                        .ok_or_else(|| TypesError::NonUtf8Path(path.to_path_buf()))?;
                    parts.push(part);
                }
                Component::CurDir => {}
                _ => return Err(TypesError::NotRelative(path.to_path_buf())),
            }
        }
        if parts.is_empty() {
            return Err(TypesError::NotRelative(path.to_path_buf()));
        }
        Ok(Self(parts.join("/")))
    }

    /// Key for `path` relative to `root`.
    pub fn between(root: &Path, path: &Path) -> Result<Self, TypesError> {
        let rel = path.strip_prefix(root).map_err(|_| TypesError::OutsideRoot {
            path: path.to_path_buf(),
            root: root.to_path_buf(),
        })?;
        Self::from_path(rel)
    }

    /// Borrow the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Native relative path for this key.
    pub fn to_path(&self) -> PathBuf {
        self.0.split('/').collect()
    }

    /// Absolute path for this key under `root`.
    pub fn under(&self, root: &Path) -> PathBuf {
        let mut out = root.to_path_buf();
        out.extend(self.0.split('/'));
        out
    }

    /// Last path component.
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Text after the last `.` of the file name.
    ///
    /// A leading dot does not start an extension, so `.hidden` has none,
    /// and neither does `name.` (empty suffix).
    pub fn extension(&self) -> Option<&str> {
        let name = self.file_name();
        let dot = name.rfind('.')?;
        if dot == 0 || dot + 1 == name.len() {
            return None;
        }
        Some(&name[dot + 1..])
    }

    /// Parent key, if the path has more than one component.
    pub fn parent(&self) -> Option<RelPath> {
        self.0.rfind('/').map(|idx| Self(self.0[..idx].to_string()))
    }

    /// True if this key is `dir` itself or lives below it.
    pub fn is_within(&self, dir: &RelPath) -> bool {
        self.0 == dir.0
            || (self.0.len() > dir.0.len()
                && self.0.starts_with(&dir.0)
                && self.0.as_bytes()[dir.0.len()] == b'/')
    }
}

impl TryFrom<String> for RelPath {
    type Error = TypesError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_path(Path::new(&value))
    }
}

impl From<RelPath> for String {
    fn from(path: RelPath) -> Self {
        path.0
    }
}

impl fmt::Display for RelPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for RelPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RelPath({})", self.0)
    }
}
