//! Exponential backoff with jitter.

use rand::Rng;
use std::ops::Range;
use std::time::Duration;

/// Jitter range applied to the computed backoff.
pub const JITTER_RANGE: Range<f64> = 0.8..1.0;

/// Backoff policy: `jitter * base * 2^attempt`.
///
/// Each call samples its own jitter from the thread-local RNG, so many
/// clients retrying against the same server drift apart instead of
/// retrying in lockstep.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first retry, before jitter.
    pub base: Duration,
    /// Optional ceiling on computed delays. Server hints are never capped.
    pub max_delay: Option<Duration>,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max_delay: None,
        }
    }
}

impl BackoffPolicy {
    /// Create a policy with the default one second base and no ceiling.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a ceiling on computed delays.
    pub fn with_max_delay(mut self, max: Duration) -> Self {
        self.max_delay = Some(max);
        self
    }

    /// Compute the wait before retrying after attempt `attempt` (0-based) failed.
    ///
    /// A server-provided wait is returned as-is.
    pub fn compute_wait(&self, attempt: u32, server_wait: Option<Duration>) -> Duration {
        if let Some(wait) = server_wait {
            return wait;
        }
        let jitter = rand::rng().random_range(JITTER_RANGE);
        self.wait_with_jitter(attempt, jitter)
    }

    /// Compute the wait for a given jitter factor.
    pub fn wait_with_jitter(&self, attempt: u32, jitter: f64) -> Duration {
        let factor = 2f64.powi(attempt.min(i32::MAX as u32) as i32);
        let seconds = self.base.as_secs_f64() * factor * jitter;
        let delay = Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX);

        match self.max_delay {
            Some(max) => delay.min(max),
            None => delay,
        }
    }
}
