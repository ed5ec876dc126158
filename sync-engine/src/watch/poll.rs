//! Polling source: periodic stat snapshots.

use super::ChangeSource;
use crate::error::WatchError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use sync_core::{diff_snapshots, Snapshot};
use sync_types::{FileStamp, RawChange};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

/// Stat every non-directory entry under `root`.
///
/// Entries that vanish mid-walk are skipped. Symlinked sources are stamped
/// through the link, matching what the executor copies or links.
pub fn scan_tree(root: &Path) -> Result<Snapshot, WatchError> {
    let root_meta = std::fs::metadata(root).map_err(|source| WatchError::Scan {
        path: root.to_path_buf(),
        source,
    })?;
    let mut snapshot = Snapshot::new();
    if !root_meta.is_dir() {
        return Ok(snapshot);
    }
    for entry in WalkDir::new(root).min_depth(1).into_iter().filter_map(Result::ok) {
        if entry.file_type().is_dir() {
            continue;
        }
        let Ok(meta) = std::fs::metadata(entry.path()) else {
            continue;
        };
        if meta.is_dir() {
            continue;
        }
        snapshot.insert(entry.into_path(), FileStamp::from_metadata(&meta));
    }
    Ok(snapshot)
}

/// Full-tree polling watcher.
pub struct PollSource {
    root: PathBuf,
    interval: Duration,
}

impl PollSource {
    /// Poll `root` every `interval`.
    pub fn new(root: &Path, interval: Duration) -> Self {
        Self {
            root: root.to_path_buf(),
            interval,
        }
    }

    async fn scan(&self) -> Result<Snapshot, WatchError> {
        let root = self.root.clone();
        match tokio::task::spawn_blocking(move || scan_tree(&root)).await {
            Ok(res) => res,
            Err(e) => Err(WatchError::Failed(format!("scan task failed: {}", e))),
        }
    }
}

#[async_trait]
impl ChangeSource for PollSource {
    fn name(&self) -> &'static str {
        "poll"
    }

    async fn run(
        self: Box<Self>,
        tx: mpsc::Sender<RawChange>,
        cancel: CancellationToken,
    ) -> Result<(), WatchError> {
        tracing::info!("Watching {} (poll every {:?})", self.root.display(), self.interval);
        let mut prev = self.scan().await?;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(self.interval) => {}
            }
            let next = match self.scan().await {
                Ok(next) => next,
                Err(e) => {
                    // Keep the old snapshot: an unreadable root must not look
                    // like every file was deleted.
                    tracing::warn!("Poll scan failed: {}", e);
                    continue;
                }
            };
            for change in diff_snapshots(&prev, &next) {
                if tx.send(change).await.is_err() {
                    return Ok(());
                }
            }
            prev = next;
        }
    }
}
