//! Change sources for linkmirror.
//!
//! Two interchangeable strategies produce [`RawChange`]s for a watched tree:
//! - [`NativeSource`]: OS notifications through `notify`, recursive, with
//!   new directories re-armed and swept.
//! - [`PollSource`]: periodic stat snapshots diffed against the previous one.
//!
//! [`run_with_fallback`] drives a source and switches to polling if the
//! native backend fails, requesting a rescan since events may have been lost.

mod mounts;
mod native;
mod poll;

pub use mounts::network_fs_type;
pub use native::NativeSource;
pub use poll::{scan_tree, PollSource};

use crate::config::WatcherMode;
use crate::error::WatchError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use sync_types::RawChange;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A live stream of changes for one tree.
#[async_trait]
pub trait ChangeSource: Send {
    /// Short name for logs (`native`, `poll`).
    fn name(&self) -> &'static str;

    /// Stream changes into `tx` until `cancel` fires or the receiver closes.
    ///
    /// Returns an error only if the source can no longer observe the tree.
    async fn run(
        self: Box<Self>,
        tx: mpsc::Sender<RawChange>,
        cancel: CancellationToken,
    ) -> Result<(), WatchError>;
}

/// Pick the change source for `root` according to `mode`.
///
/// In `auto` mode, network filesystems get the polling strategy. A native
/// backend that cannot be created falls back to polling in every mode.
pub fn select_source(mode: WatcherMode, root: &Path, poll_interval: Duration) -> Box<dyn ChangeSource> {
    let poll = || Box::new(PollSource::new(root, poll_interval)) as Box<dyn ChangeSource>;
    match mode {
        WatcherMode::Poll => return poll(),
        WatcherMode::Auto => {
            if let Some(fs_type) = network_fs_type(root) {
                tracing::info!("{} is on a {} filesystem, using polling", root.display(), fs_type);
                return poll();
            }
        }
        WatcherMode::Native => {}
    }
    match NativeSource::new(root) {
        Ok(source) => Box::new(source),
        Err(e) => {
            tracing::warn!("Native watcher unavailable for {}, using polling: {}", root.display(), e);
            poll()
        }
    }
}

/// Run `source`, replacing it with a polling source if it fails.
///
/// A switch emits [`RawChange::Rescan`] first so the engine reconciles
/// whatever the failed source missed.
pub async fn run_with_fallback(
    source: Box<dyn ChangeSource>,
    root: PathBuf,
    poll_interval: Duration,
    tx: mpsc::Sender<RawChange>,
    cancel: CancellationToken,
) {
    let name = source.name();
    let Err(e) = source.run(tx.clone(), cancel.clone()).await else {
        return;
    };
    if cancel.is_cancelled() {
        return;
    }
    if name == "poll" {
        tracing::error!("Polling watcher for {} stopped: {}", root.display(), e);
        return;
    }
    tracing::warn!("{} watcher failed, falling back to polling: {}", name, e);
    if tx.send(RawChange::Rescan).await.is_err() {
        return;
    }
    let poll = Box::new(PollSource::new(&root, poll_interval));
    if let Err(e) = poll.run(tx, cancel).await {
        tracing::error!("Polling watcher for {} stopped: {}", root.display(), e);
    }
}
