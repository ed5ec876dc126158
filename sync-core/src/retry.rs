//! Retry schedule for transient filesystem failures.

use std::time::Duration;

/// Bounded exponential backoff with jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound on the exponential part of the delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// True if another attempt is allowed after `attempt` failures.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Delay to wait after the `attempt`-th failure (1-based).
    ///
    /// Base: `base_delay * 2^(attempt-1)`, capped at `max_delay`.
    /// Jitter: up to half the base, so the result stays within 1.5x the cap.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let base = self
            .base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay);
        let half_ms = u64::try_from(base.as_millis() / 2).unwrap_or(u64::MAX);
        base + Duration::from_millis(random_jitter_ms(half_ms))
    }
}

/// Random jitter in `0..=max_ms`. Falls back to no jitter if the OS RNG fails.
fn random_jitter_ms(max_ms: u64) -> u64 {
    if max_ms == 0 {
        return 0;
    }
    let mut bytes = [0u8; 8];
    if getrandom::getrandom(&mut bytes).is_err() {
        return 0;
    }
    u64::from_le_bytes(bytes) % (max_ms + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempts_are_bounded() {
        let p = RetryPolicy::default();
        assert!(p.should_retry(1));
        assert!(p.should_retry(2));
        assert!(!p.should_retry(3));
    }

    #[test]
    fn delay_grows_exponentially() {
        let p = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
        };
        for (attempt, base) in [(1, 100), (2, 200), (3, 400)] {
            let d = p.delay_for(attempt);
            assert!(d >= Duration::from_millis(base));
            assert!(d <= Duration::from_millis(base + base / 2));
        }
    }

    #[test]
    fn delay_is_capped() {
        let p = RetryPolicy {
            max_attempts: 50,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
        };
        let d = p.delay_for(40);
        assert!(d >= Duration::from_millis(500));
        assert!(d <= Duration::from_millis(750));
    }

    #[test]
    fn zero_base_means_no_wait() {
        let p = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        };
        assert_eq!(p.delay_for(2), Duration::ZERO);
    }
}
