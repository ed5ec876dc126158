//! Event normalizer stage.
//!
//! Sits between a change source and the dispatcher: raw changes go into a
//! [`Coalescer`], settled events come out in first-seen order.

use sync_core::{Coalesced, Coalescer};
use sync_types::RawChange;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};

/// Idle wake-up used when nothing is pending.
const IDLE: std::time::Duration = std::time::Duration::from_secs(3600);

/// Drive `coalescer` until `raw_rx` closes or `out_tx` is dropped.
///
/// Whatever is still pending when the input closes is flushed out
/// immediately, so a stopping engine does not lose settled work.
pub async fn run_normalizer(
    mut raw_rx: mpsc::Receiver<RawChange>,
    out_tx: mpsc::Sender<Coalesced>,
    mut coalescer: Coalescer,
) {
    loop {
        let deadline = coalescer
            .next_deadline()
            .map(Instant::from_std)
            .unwrap_or_else(|| Instant::now() + IDLE);

        tokio::select! {
            raw = raw_rx.recv() => match raw {
                Some(raw) => coalescer.push(raw, std::time::Instant::now(), std::time::SystemTime::now()),
                None => break,
            },
            _ = sleep_until(deadline) => {}
        }

        for item in coalescer.drain_ready(std::time::Instant::now()) {
            if out_tx.send(item).await.is_err() {
                return;
            }
        }
    }

    let rest = coalescer.drain_all();
    if !rest.is_empty() {
        tracing::debug!("Flushing {} pending change(s)", rest.len());
    }
    for item in rest {
        if out_tx.send(item).await.is_err() {
            return;
        }
    }
}
