// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Background maintenance jobs.
//!
//! Two timers run until shutdown:
//! - the expired item sweep, fired by a cron expression (daily by default),
//!   each run in its own task behind the lifecycle single-flight guard
//! - housekeeping on a fixed interval: upload history cleanup and removal of
//!   uploaded blobs no card ever claimed
//!
//! Shutdown waits for an in-flight sweep to finish.

use crate::config::LifecycleConfig;
use crate::error::LifecycleError;
use crate::lifecycle::{LifecycleManager, SweepReport};
use crate::limiter::RateLimiter;
use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Scheduler construction errors.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Invalid sweep schedule {expr:?}: {reason}")]
    InvalidSchedule { expr: String, reason: String },
}

/// Drives the sweep and cleanup timers.
pub struct Scheduler {
    lifecycle: Arc<LifecycleManager>,
    limiter: Arc<RateLimiter>,
    schedule: Schedule,
    cleanup_interval: Duration,
}

/// Join handles of the running timers.
pub struct SchedulerHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Wait for both timers to stop.
    pub async fn join(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Scheduler task panicked");
            }
        }
    }
}

impl Scheduler {
    pub fn new(
        config: &LifecycleConfig,
        lifecycle: Arc<LifecycleManager>,
        limiter: Arc<RateLimiter>,
    ) -> Result<Self, SchedulerError> {
        let schedule = Schedule::from_str(&config.sweep_schedule).map_err(|e| {
            SchedulerError::InvalidSchedule {
                expr: config.sweep_schedule.clone(),
                reason: e.to_string(),
            }
        })?;

        Ok(Self {
            lifecycle,
            limiter,
            schedule,
            cleanup_interval: config.limiter_cleanup_interval(),
        })
    }

    /// First sweep time strictly after `after`.
    pub fn next_sweep_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }

    /// Start both timers; they stop once `shutdown` turns true.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> SchedulerHandle {
        info!(
            next_sweep = ?self.next_sweep_after(Utc::now()),
            cleanup_interval = ?self.cleanup_interval,
            "Starting maintenance scheduler"
        );

        let sweeps = tokio::spawn(run_sweeps(
            self.schedule,
            Arc::clone(&self.lifecycle),
            shutdown.clone(),
        ));
        let cleanup = tokio::spawn(run_cleanup(
            self.cleanup_interval,
            self.lifecycle,
            self.limiter,
            shutdown,
        ));

        SchedulerHandle {
            tasks: vec![sweeps, cleanup],
        }
    }
}

/// Run one sweep, logging instead of propagating failures.
pub async fn run_sweep(lifecycle: &LifecycleManager, now: DateTime<Utc>) -> Option<SweepReport> {
    match lifecycle.sweep(now).await {
        Ok(report) => Some(report),
        Err(LifecycleError::SweepInProgress) => {
            warn!("Skipping scheduled sweep - previous sweep still in progress");
            None
        }
        Err(e) => {
            error!(error = %e, "Sweep failed, retrying at next scheduled run");
            None
        }
    }
}

async fn run_sweeps(
    schedule: Schedule,
    lifecycle: Arc<LifecycleManager>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut last_fire = Utc::now();
    let mut running = JoinSet::new();
    loop {
        if *shutdown.borrow() {
            break;
        }

        let from = Utc::now().max(last_fire);
        let Some(next) = schedule.after(&from).next() else {
            warn!("Sweep schedule has no upcoming run, stopping sweep timer");
            break;
        };
        let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        debug!(%next, ?wait, "Next sweep scheduled");

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            Some(finished) = running.join_next(), if !running.is_empty() => {
                log_sweep_exit(finished);
                continue;
            }
        }
        last_fire = next;

        // Own task so a long sweep never delays the timer
        let lifecycle = Arc::clone(&lifecycle);
        running.spawn(async move {
            run_sweep(&lifecycle, Utc::now()).await;
        });
    }

    if !running.is_empty() {
        info!(running = running.len(), "Waiting for in-flight sweep");
    }
    while let Some(finished) = running.join_next().await {
        log_sweep_exit(finished);
    }
    info!("Sweep timer stopped");
}

fn log_sweep_exit(finished: Result<(), tokio::task::JoinError>) {
    if let Err(e) = finished {
        error!(error = %e, "Sweep task panicked");
    }
}

async fn run_cleanup(
    period: Duration,
    lifecycle: Arc<LifecycleManager>,
    limiter: Arc<RateLimiter>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = interval.tick() => {
                let removed = limiter.cleanup(Instant::now()).await;
                debug!(removed, "Upload history cleanup pass");
                if let Err(e) = lifecycle.reclaim_unclaimed(Utc::now()).await {
                    warn!(error = %e, "Unclaimed upload cleanup failed");
                }
            }
            _ = shutdown.changed() => {}
        }
    }
    info!("Cleanup timer stopped");
}
