//! Exponential backoff for failed timestamping runs.
//!
//! After `k` consecutive failures the next attempt waits
//! `min(base * 2^(k-1), max)`. A success resets the counter.

use std::time::{Duration, Instant};

use tracing::{debug, warn};

/// Backoff configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Delay after the first failure.
    pub base_delay: Duration,
    /// Upper bound on any delay.
    pub max_delay: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(3600),
        }
    }
}

/// Delay after `failures` consecutive failures (zero when there were none).
pub fn compute_delay(failures: u32, config: &BackoffConfig) -> Duration {
    if failures == 0 {
        return Duration::ZERO;
    }
    let base_ms = config.base_delay.as_millis() as u64;
    let exp_ms = base_ms.saturating_mul(1u64 << (failures - 1).min(32));
    Duration::from_millis(exp_ms.min(config.max_delay.as_millis() as u64))
}

/// Failure counter and the earliest time the next attempt may run.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    failures: u32,
    not_before: Option<Instant>,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            failures: 0,
            not_before: None,
        }
    }

    /// Consecutive failures so far.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Whether an attempt may run at `now`.
    pub fn ready(&self, now: Instant) -> bool {
        self.not_before.map_or(true, |t| now >= t)
    }

    /// Time left until the next attempt may run.
    pub fn remaining(&self, now: Instant) -> Duration {
        self.not_before
            .map(|t| t.saturating_duration_since(now))
            .unwrap_or_default()
    }

    /// Count a failure; returns the delay before the next attempt.
    pub fn record_failure(&mut self, now: Instant) -> Duration {
        self.failures = self.failures.saturating_add(1);
        let delay = compute_delay(self.failures, &self.config);
        self.not_before = Some(now + delay);
        warn!(
            failures = self.failures,
            delay_ms = delay.as_millis() as u64,
            "timestamping deferred"
        );
        delay
    }

    /// Reset after a success.
    pub fn record_success(&mut self) {
        if self.failures > 0 {
            debug!(failures = self.failures, "timestamping recovered");
        }
        self.failures = 0;
        self.not_before = None;
    }
}
