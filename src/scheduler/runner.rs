//! Scheduler background loop.
//!
//! Spawns a tokio task that fires a refresh tick every
//! `scheduler.interval_secs` and funnels it into the refresh controller.
//! Ticks are held back while the last failure needs the user (auth, quota)
//! or while the retry policy asks for a quiet period.

use crate::config::SchedulerConfig;
use crate::refresh::{CycleResult, RefreshController, RefreshCycle, RefreshStatus, Trigger};
use crate::scheduler::policy::{self, RetryPolicy};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Default interval between scheduler ticks (seconds).
pub const TICK_INTERVAL_SECS: u64 = 60;

/// Longest accepted tick interval (one year).
pub const MAX_INTERVAL_SECS: u64 = 365 * 24 * 60 * 60;

fn clamp_interval(interval: Duration) -> Duration {
    interval.clamp(Duration::from_secs(1), Duration::from_secs(MAX_INTERVAL_SECS))
}

/// Periodic driver for a [`RefreshController`].
pub struct Scheduler {
    controller: Arc<RefreshController>,
    policy: Arc<dyn RetryPolicy>,
    interval: Duration,
    run_on_start: bool,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("policy", &self.policy)
            .field("interval", &self.interval)
            .field("run_on_start", &self.run_on_start)
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Create a scheduler with the cadence and policy from `config`.
    pub fn new(controller: Arc<RefreshController>, config: &SchedulerConfig) -> Self {
        Self {
            controller,
            policy: policy::from_config(&config.backoff),
            interval: clamp_interval(Duration::from_secs(config.interval_secs)),
            run_on_start: config.run_on_start,
        }
    }

    /// Replace the retry policy.
    pub fn with_policy(mut self, policy: Arc<dyn RetryPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Override the tick interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = clamp_interval(interval);
        self
    }

    /// Control surface sharing this scheduler's controller.
    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            controller: Arc::clone(&self.controller),
        }
    }

    /// Run one scheduled tick.
    ///
    /// Returns `None` when an unpaused tick was held back without calling the
    /// controller; otherwise the controller's result, which may itself be a
    /// skip (paused or busy).
    pub async fn tick(&self) -> Option<CycleResult> {
        let status = self.controller.get_status();
        // Paused wins: the controller reports `skipped:paused` for it.
        if !status.paused {
            if status.awaiting_user {
                debug!("tick held: last failure needs user action");
                return None;
            }
            if !self.policy.admit(&status, Utc::now()) {
                debug!(
                    failures = status.consecutive_failures,
                    "tick held by retry policy"
                );
                return None;
            }
        }
        Some(self.controller.attempt_refresh(Trigger::Tick).await)
    }

    /// Spawn the tick loop. It stops when `cancel` fires; a cycle already in
    /// flight is allowed to finish first.
    pub fn run(self, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                interval_secs = self.interval.as_secs(),
                run_on_start = self.run_on_start,
                "scheduler started"
            );
            let now = Instant::now();
            let first = if self.run_on_start {
                now
            } else {
                now.checked_add(self.interval).unwrap_or(now)
            };
            let mut interval = tokio::time::interval_at(first, self.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        self.tick().await;
                    }
                }
            }
            info!("scheduler stopped");
        })
    }
}

/// Cloneable control surface: pause, resume, refresh-now and status.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    controller: Arc<RefreshController>,
}

impl SchedulerHandle {
    #[must_use]
    pub fn new(controller: Arc<RefreshController>) -> Self {
        Self { controller }
    }

    /// Stop scheduled ticks from refreshing. Manual refreshes still run.
    pub fn pause(&self) {
        self.controller.pause();
    }

    /// Let the next scheduled tick refresh again. Does not refresh by itself.
    pub fn resume(&self) {
        self.controller.resume();
    }

    /// Refresh now, ignoring pause, timer, retry policy and a pending
    /// auth/quota hold. Still `skipped:busy` if a cycle is running.
    pub async fn refresh_now(&self) -> CycleResult {
        self.controller.attempt_refresh(Trigger::Manual).await
    }

    #[must_use]
    pub fn status(&self) -> RefreshStatus {
        self.controller.get_status()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RefreshCycle> {
        self.controller.subscribe()
    }
}
