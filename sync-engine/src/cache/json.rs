//! JSON file cache backend.
//!
//! One file per task at `<dir>/<task_id>.json`:
//!
//! ```json
//! {"version":1,"entries":[{"path":"a.jpg","mtime_ns":1,"size":2,"hash":"blake3:…"}]}
//! ```
//!
//! Saves go to a temporary file in the same directory which is then renamed
//! over the old one, so a crash never leaves a truncated cache.

use super::CacheBackend;
use crate::error::CacheError;
use serde::{Deserialize, Serialize};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use sync_types::{CacheEntry, ContentHash, RelPath, TaskId};

const FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct CacheFile {
    version: u32,
    entries: Vec<CacheRecord>,
}

#[derive(Serialize, Deserialize)]
struct CacheRecord {
    path: RelPath,
    mtime_ns: i64,
    size: u64,
    #[serde(default)]
    hash: Option<ContentHash>,
}

/// Cache persisted as a JSON document.
#[derive(Debug, Clone)]
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    /// Backend at an explicit file path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Backend for `task` inside the cache directory.
    pub fn for_task(dir: &Path, task: &TaskId) -> Self {
        Self::new(dir.join(format!("{}.json", task)))
    }

    /// File this backend reads and writes.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: std::io::Error) -> CacheError {
        CacheError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl CacheBackend for JsonFileBackend {
    fn load(&self) -> Result<Vec<(RelPath, CacheEntry)>, CacheError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.io_err(e)),
        };
        let file: CacheFile = serde_json::from_slice(&bytes).map_err(|e| CacheError::Corrupt {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;
        if file.version != FORMAT_VERSION {
            return Err(CacheError::Corrupt {
                path: self.path.clone(),
                reason: format!("unsupported version {}", file.version),
            });
        }
        Ok(file
            .entries
            .into_iter()
            .map(|r| {
                let entry = CacheEntry {
                    mtime_ns: r.mtime_ns,
                    size: r.size,
                    hash: r.hash,
                };
                (r.path, entry)
            })
            .collect())
    }

    fn save(&self, entries: &[(RelPath, CacheEntry)]) -> Result<(), CacheError> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(|e| self.io_err(e))?;

        let file = CacheFile {
            version: FORMAT_VERSION,
            entries: entries
                .iter()
                .map(|(path, e)| CacheRecord {
                    path: path.clone(),
                    mtime_ns: e.mtime_ns,
                    size: e.size,
                    hash: e.hash.clone(),
                })
                .collect(),
        };

        let tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| self.io_err(e))?;
        {
            let mut writer = BufWriter::new(tmp.as_file());
            serde_json::to_writer(&mut writer, &file)?;
            writer.flush().map_err(|e| self.io_err(e))?;
        }
        tmp.as_file().sync_all().map_err(|e| self.io_err(e))?;
        tmp.persist(&self.path).map_err(|e| self.io_err(e.error))?;
        Ok(())
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}
