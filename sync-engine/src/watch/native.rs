//! Native notification source (inotify, FSEvents, ReadDirectoryChangesW, kqueue).

use super::ChangeSource;
use crate::error::WatchError;
use async_trait::async_trait;
use notify::event::{AccessKind, AccessMode, ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use sync_types::{ChangeKind, RawChange};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

/// Notifications buffered between the backend thread and the source loop.
const DEFAULT_EVENT_BUFFER: usize = 4096;

/// Recursive OS-level watcher for one tree.
pub struct NativeSource {
    root: PathBuf,
    watcher: RecommendedWatcher,
    events: mpsc::Receiver<notify::Result<Event>>,
    overflowed: Arc<AtomicBool>,
}

impl NativeSource {
    /// Subscribe to `root` recursively.
    ///
    /// Fails if the backend cannot be created or the root cannot be watched.
    pub fn new(root: &Path) -> Result<Self, WatchError> {
        Self::with_capacity(root, DEFAULT_EVENT_BUFFER)
    }

    /// Like [`NativeSource::new`] with at most `capacity` buffered
    /// notifications. Notifications past that are dropped and replaced by a
    /// single [`RawChange::Rescan`].
    pub fn with_capacity(root: &Path, capacity: usize) -> Result<Self, WatchError> {
        let (event_tx, events) = mpsc::channel(capacity.max(1));
        let overflowed = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&overflowed);
        let mut watcher = notify::recommended_watcher(move |res| {
            if let Err(mpsc::error::TrySendError::Full(_)) = event_tx.try_send(res) {
                flag.store(true, Ordering::Release);
            }
        })
        .map_err(WatchError::Unavailable)?;
        watcher
            .watch(root, RecursiveMode::Recursive)
            .map_err(|source| WatchError::Subscribe {
                path: root.to_path_buf(),
                source,
            })?;
        Ok(Self {
            root: root.to_path_buf(),
            watcher,
            events,
            overflowed,
        })
    }

    /// Re-arm a newly appeared directory and report the files already in it.
    ///
    /// Files created between the directory appearing and the watch being
    /// installed would otherwise be missed.
    fn sweep_dir(&mut self, dir: &Path, out: &mut Vec<RawChange>) {
        if let Err(e) = self.watcher.watch(dir, RecursiveMode::Recursive) {
            tracing::debug!("Re-arming {} failed: {}", dir.display(), e);
        }
        for entry in WalkDir::new(dir).min_depth(1).into_iter().filter_map(Result::ok) {
            if !entry.file_type().is_dir() {
                out.push(RawChange::path(entry.into_path(), ChangeKind::Created));
            }
        }
    }

    fn translate(&mut self, event: Event) -> Vec<RawChange> {
        let mut out = Vec::new();
        if event.need_rescan() {
            out.push(RawChange::Rescan);
            return out;
        }
        let paths: Vec<PathBuf> = event
            .paths
            .into_iter()
            .filter(|p| p.starts_with(&self.root) && *p != self.root)
            .collect();

        match event.kind {
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if paths.len() == 2 => {
                let (from, to) = (paths[0].clone(), paths[1].clone());
                out.push(RawChange::Rename {
                    from,
                    to: to.clone(),
                });
                if to.is_dir() {
                    self.sweep_dir(&to, &mut out);
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
                out.extend(paths.into_iter().map(|p| RawChange::path(p, ChangeKind::RenamedFrom)));
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) | EventKind::Create(_) => {
                let kind = match event.kind {
                    EventKind::Create(_) => ChangeKind::Created,
                    _ => ChangeKind::RenamedTo,
                };
                for path in paths {
                    let is_dir = path.is_dir();
                    out.push(RawChange::path(path.clone(), kind));
                    if is_dir {
                        self.sweep_dir(&path, &mut out);
                    }
                }
            }
            EventKind::Remove(_) => {
                out.extend(paths.into_iter().map(|p| RawChange::path(p, ChangeKind::Deleted)));
            }
            EventKind::Access(AccessKind::Close(AccessMode::Write))
            | EventKind::Modify(_)
            | EventKind::Any
            | EventKind::Other => {
                // Unclassified renames show up here too, so check what is left on disk.
                out.extend(paths.into_iter().map(|p| {
                    let kind = if p.exists() {
                        ChangeKind::Modified
                    } else {
                        ChangeKind::Deleted
                    };
                    RawChange::path(p, kind)
                }));
            }
            EventKind::Access(_) => {}
        }
        out
    }
}

#[async_trait]
impl ChangeSource for NativeSource {
    fn name(&self) -> &'static str {
        "native"
    }

    async fn run(
        mut self: Box<Self>,
        tx: mpsc::Sender<RawChange>,
        cancel: CancellationToken,
    ) -> Result<(), WatchError> {
        tracing::info!("Watching {} (native)", self.root.display());
        loop {
            let res = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                res = self.events.recv() => res,
            };
            let event = match res {
                Some(Ok(event)) => event,
                Some(Err(e)) => {
                    if matches!(e.kind, notify::ErrorKind::MaxFilesWatch | notify::ErrorKind::WatchNotFound) {
                        return Err(WatchError::Failed(e.to_string()));
                    }
                    tracing::warn!("Watch error on {}: {}", self.root.display(), e);
                    if tx.send(RawChange::Rescan).await.is_err() {
                        return Ok(());
                    }
                    continue;
                }
                None => return Err(WatchError::Failed("notification channel closed".into())),
            };
            if self.overflowed.swap(false, Ordering::AcqRel) {
                tracing::warn!("Notification buffer for {} overflowed", self.root.display());
                if tx.send(RawChange::Rescan).await.is_err() {
                    return Ok(());
                }
            }
            for change in self.translate(event) {
                if tx.send(change).await.is_err() {
                    return Ok(());
                }
            }
        }
    }
}
