//! Encoder restart policy for stream sessions.

use std::time::Duration;
use tracing::warn;

/// Exponential backoff with a cap and a bounded number of restarts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartPolicy {
    /// Restarts allowed after the first launch, counted per failure streak.
    pub max_restarts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_restarts: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RestartPolicy {
    pub fn new(max_restarts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_restarts,
            initial_backoff,
            max_backoff,
        }
    }

    /// Delay before the next launch after `failures` consecutive failures,
    /// or `None` once the streak has used up every restart.
    pub fn next_delay(&self, failures: u32) -> Option<Duration> {
        let attempt = failures.checked_sub(1)?;
        if attempt >= self.max_restarts {
            return None;
        }
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        Some(self.initial_backoff.saturating_mul(factor).min(self.max_backoff))
    }
}

/// Consecutive failure streak of one session's encoder.
#[derive(Debug)]
pub struct FailureTracker {
    consecutive: u32,
    unstable_after: u32,
    stable_run: Duration,
}

/// What the tracker concluded about one encoder exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureRecord {
    pub consecutive: u32,
    pub unstable: bool,
    /// False once the streak is past the unstable threshold, to keep logs quiet.
    pub log: bool,
}

impl FailureTracker {
    /// A run lasting at least `stable_run` before it failed starts a new streak.
    pub fn new(unstable_after: u32, stable_run: Duration) -> Self {
        Self {
            consecutive: 0,
            unstable_after,
            stable_run,
        }
    }

    pub fn record_exit(&mut self, ran_for: Duration) -> FailureRecord {
        if ran_for >= self.stable_run {
            self.consecutive = 0;
        }
        self.consecutive += 1;

        let unstable = self.consecutive > self.unstable_after;
        if self.consecutive == self.unstable_after + 1 {
            warn!(
                failures = self.consecutive,
                "Encoder keeps failing, suppressing further restart logs"
            );
        }
        FailureRecord {
            consecutive: self.consecutive,
            unstable,
            log: !unstable,
        }
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }
}
