//! Progress tracking for long reconciliation passes.

/// Reports a percentage each time another `step` percent of the work is done.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    total: usize,
    done: usize,
    step: u8,
    next_mark: u8,
}

impl ProgressTracker {
    /// Track `total` items, reporting every `step` percent (clamped to 1..=100).
    pub fn new(total: usize, step: u8) -> Self {
        let step = step.clamp(1, 100);
        Self {
            total,
            done: 0,
            step,
            next_mark: step,
        }
    }

    /// Record one finished item. Returns the percentage to report, if a mark
    /// was crossed. Several marks crossed at once are reported as the latest.
    pub fn advance(&mut self) -> Option<u8> {
        if self.total == 0 || self.next_mark > 100 {
            return None;
        }
        self.done = (self.done + 1).min(self.total);
        let percent = (self.done * 100 / self.total) as u8;
        if percent < self.next_mark {
            return None;
        }
        let reached = percent - percent % self.step;
        self.next_mark = reached.saturating_add(self.step);
        Some(reached)
    }

    /// Items finished so far.
    pub fn done(&self) -> usize {
        self.done
    }

    /// Items expected.
    pub fn total(&self) -> usize {
        self.total
    }
}
