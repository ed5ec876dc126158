//! Event coalescing for linkmirror.
//!
//! Raw notifications arrive noisy: an editor save can produce a create,
//! several modifies and a close for one path within a few milliseconds.
//! The [`Coalescer`] holds each path for a short quiet window and emits a
//! single [`ChangeEvent`] carrying the final kind.
//!
//! Rules:
//! - The last observed kind wins.
//! - `Modified` never overwrites a pending `Created` or `Deleted`.
//! - Rename halves become `Deleted` at the old path and `Created` at the new one.
//! - A path that keeps changing is released after `max_hold` anyway.
//! - When more than `capacity` distinct paths are pending, the held events
//!   are dropped and a single rescan is requested instead.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant, SystemTime};
use sync_types::{ChangeEvent, ChangeKind, RawChange};

/// Output of the coalescer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Coalesced {
    /// A settled change for one path.
    Event(ChangeEvent),
    /// Events were lost; reconcile the whole tree.
    Rescan,
}

#[derive(Debug, Clone)]
struct Pending {
    kind: ChangeKind,
    first_seen: Instant,
    last_seen: Instant,
    observed_at: SystemTime,
}

/// Per-path debounce state machine.
#[derive(Debug)]
pub struct Coalescer {
    window: Duration,
    max_hold: Duration,
    capacity: usize,
    pending: HashMap<PathBuf, Pending>,
    rescan_at: Option<Instant>,
}

impl Coalescer {
    /// Create a coalescer.
    ///
    /// `window` is the quiet period a path must observe before it is
    /// released, `max_hold` caps how long a busy path is held, and
    /// `capacity` bounds the number of distinct pending paths.
    pub fn new(window: Duration, max_hold: Duration, capacity: usize) -> Self {
        Self {
            window,
            max_hold: max_hold.max(window),
            capacity: capacity.max(1),
            pending: HashMap::new(),
            rescan_at: None,
        }
    }

    /// Record a raw change observed at `now`.
    ///
    /// `observed_at` is the wall-clock time stamped on the emitted event when
    /// this is the first change held for the path.
    pub fn push(&mut self, raw: RawChange, now: Instant, observed_at: SystemTime) {
        match raw {
            RawChange::Path { path, kind } => self.push_path(path, kind, now, observed_at),
            RawChange::Rename { from, to } => {
                self.push_path(from, ChangeKind::RenamedFrom, now, observed_at);
                self.push_path(to, ChangeKind::RenamedTo, now, observed_at);
            }
            RawChange::Rescan => self.request_rescan(now),
        }
    }

    fn push_path(&mut self, path: PathBuf, kind: ChangeKind, now: Instant, observed_at: SystemTime) {
        let kind = kind.normalized();
        if let Some(existing) = self.pending.get_mut(&path) {
            existing.kind = merge(existing.kind, kind);
            existing.last_seen = now;
            return;
        }
        if self.pending.len() >= self.capacity {
            self.pending.clear();
            self.request_rescan(now);
            return;
        }
        self.pending.insert(
            path,
            Pending {
                kind,
                first_seen: now,
                last_seen: now,
                observed_at,
            },
        );
    }

    fn request_rescan(&mut self, now: Instant) {
        self.rescan_at.get_or_insert(now);
    }

    fn deadline(&self, p: &Pending) -> Instant {
        (p.last_seen + self.window).min(p.first_seen + self.max_hold)
    }

    /// Earliest instant at which something becomes ready, if anything is held.
    pub fn next_deadline(&self) -> Option<Instant> {
        let events = self.pending.values().map(|p| self.deadline(p));
        self.rescan_at.into_iter().chain(events).min()
    }

    /// Release every path whose window has elapsed at `now`.
    ///
    /// A pending rescan is returned first; events follow in first-seen order.
    pub fn drain_ready(&mut self, now: Instant) -> Vec<Coalesced> {
        let ready: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(_, p)| self.deadline(p) <= now)
            .map(|(path, _)| path.clone())
            .collect();
        let released = ready
            .into_iter()
            .filter_map(|path| self.pending.remove_entry(&path))
            .collect();
        let rescan = matches!(self.rescan_at, Some(at) if at <= now);
        if rescan {
            self.rescan_at = None;
        }
        finish(rescan, released)
    }

    /// Release everything regardless of timing (used on shutdown).
    pub fn drain_all(&mut self) -> Vec<Coalesced> {
        let released = self.pending.drain().collect();
        let rescan = self.rescan_at.take().is_some();
        finish(rescan, released)
    }

    /// Number of distinct paths currently held.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// True if nothing is held and no rescan is pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.rescan_at.is_none()
    }
}

fn finish(rescan: bool, mut released: Vec<(PathBuf, Pending)>) -> Vec<Coalesced> {
    released.sort_by(|a, b| a.1.first_seen.cmp(&b.1.first_seen).then_with(|| a.0.cmp(&b.0)));
    let mut out = Vec::with_capacity(released.len() + usize::from(rescan));
    if rescan {
        out.push(Coalesced::Rescan);
    }
    out.extend(released.into_iter().map(|(path, p)| {
        Coalesced::Event(ChangeEvent {
            absolute_path: path,
            kind: p.kind,
            observed_at: p.observed_at,
        })
    }));
    out
}

fn merge(old: ChangeKind, new: ChangeKind) -> ChangeKind {
    match (old, new) {
        (ChangeKind::Created | ChangeKind::Deleted, ChangeKind::Modified) => old,
        _ => new,
    }
}
