//! Retry policies deciding whether a scheduled tick may start a cycle.
//!
//! Policies only gate timer ticks. Manual refreshes never consult them, and
//! the controller's single-flight contract does not depend on them.

use crate::config::BackoffConfig;
use crate::refresh::RefreshStatus;
use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Arc;

/// Gate for scheduled ticks.
pub trait RetryPolicy: Send + Sync + std::fmt::Debug {
    /// Returns true when a tick at `now` should attempt a refresh.
    fn admit(&self, status: &RefreshStatus, now: DateTime<Utc>) -> bool;
}

/// Every tick is admitted; failures retry on the next tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedCadence;

impl RetryPolicy for FixedCadence {
    fn admit(&self, _status: &RefreshStatus, _now: DateTime<Utc>) -> bool {
        true
    }
}

/// After `after_failures` consecutive failures, wait `base * 2^(n - after_failures)`
/// (capped at `max`) since the last cycle finished before admitting another tick.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    after_failures: u32,
    base: chrono::Duration,
    max: chrono::Duration,
}

impl ExponentialBackoff {
    #[must_use]
    pub fn new(after_failures: u32, base_secs: u64, max_secs: u64) -> Self {
        let secs = |s: u64| {
            i64::try_from(s)
                .ok()
                .and_then(TimeDelta::try_seconds)
                .unwrap_or(TimeDelta::MAX)
        };
        Self {
            after_failures: after_failures.max(1),
            base: secs(base_secs),
            max: secs(max_secs.max(base_secs)),
        }
    }

    /// Required quiet period after `failures` consecutive failures, if any.
    #[must_use]
    pub fn delay(&self, failures: u32) -> Option<chrono::Duration> {
        if failures < self.after_failures {
            return None;
        }
        let exponent = (failures - self.after_failures).min(30);
        let delay = self
            .base
            .checked_mul(1_i32 << exponent)
            .unwrap_or(self.max);
        Some(delay.min(self.max))
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn admit(&self, status: &RefreshStatus, now: DateTime<Utc>) -> bool {
        let Some(delay) = self.delay(status.consecutive_failures) else {
            return true;
        };
        let Some(last) = &status.last_cycle else {
            return true;
        };
        // A quiet period reaching past the representable range never ends.
        last.finished_at
            .checked_add_signed(delay)
            .is_some_and(|ready_at| now >= ready_at)
    }
}

/// Policy selected by `[scheduler.backoff]`.
#[must_use]
pub fn from_config(config: &BackoffConfig) -> Arc<dyn RetryPolicy> {
    if config.enabled {
        Arc::new(ExponentialBackoff::new(
            config.after_failures,
            config.base_secs,
            config.max_secs,
        ))
    } else {
        Arc::new(FixedCadence)
    }
}
