// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Sliding-window upload admission control.
//!
//! Each client identity keeps the timestamps of its admitted uploads for the
//! trailing 24 hours. A request is admitted only while all three tiers stay
//! under their limits:
//! 1. uploads in the trailing minute (20 default)
//! 2. uploads in the trailing hour (200 default)
//! 3. uploads in the trailing day (1000 default)
//!
//! Windows slide continuously with the timestamps; nothing resets on a clock
//! boundary.

use crate::config::RateLimitConfig;
use crate::metrics::Metrics;
use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(60 * 60);
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Result of an admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitResult {
    /// Upload admitted and recorded
    Allowed {
        /// Uploads left before the tightest tier trips
        remaining: u32,
    },
    /// Upload denied; history left untouched
    Limited {
        /// Tier that was exceeded
        reason: RateLimitReason,
    },
}

impl RateLimitResult {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

/// Tier that denied an upload, with its configured limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitReason {
    PerMinute { limit: u32 },
    PerHour { limit: u32 },
    PerDay { limit: u32 },
}

impl RateLimitReason {
    /// Short tier label used in metrics.
    pub fn tier(&self) -> &'static str {
        match self {
            Self::PerMinute { .. } => "minute",
            Self::PerHour { .. } => "hour",
            Self::PerDay { .. } => "day",
        }
    }
}

impl std::fmt::Display for RateLimitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PerMinute { limit } => write!(f, "Rate limit reached ({limit}/minute)"),
            Self::PerHour { limit } => write!(f, "Rate limit reached ({limit}/hour)"),
            Self::PerDay { limit } => write!(f, "Rate limit reached ({limit}/day)"),
        }
    }
}

/// Admitted upload timestamps for one identity, oldest first.
///
/// Never holds more than `max_per_day` entries because the day tier refuses
/// further admissions at that size.
#[derive(Debug, Default)]
struct History {
    times: VecDeque<Instant>,
}

impl History {
    /// Drop entries that left the 24 hour window.
    fn trim(&mut self, now: Instant) {
        while let Some(oldest) = self.times.front() {
            if now.saturating_duration_since(*oldest) >= DAY {
                self.times.pop_front();
            } else {
                break;
            }
        }
    }

    /// Entries younger than `window`.
    fn count_within(&self, now: Instant, window: Duration) -> u32 {
        let outside = self
            .times
            .partition_point(|t| now.saturating_duration_since(*t) >= window);
        (self.times.len() - outside) as u32
    }

    /// Insert keeping the deque ordered even for slightly stale `now` values.
    fn record(&mut self, now: Instant) {
        let at = self.times.partition_point(|t| *t <= now);
        self.times.insert(at, now);
    }

    fn is_empty(&self) -> bool {
        self.times.is_empty()
    }
}

/// Thread-safe sliding-window rate limiter.
///
/// The whole check-then-record sequence runs under one lock, so concurrent
/// requests from one identity can never jointly exceed a tier.
pub struct RateLimiter {
    /// Configuration
    config: RateLimitConfig,
    /// Per-identity histories
    histories: Mutex<HashMap<IpAddr, History>>,
    metrics: Option<Arc<Metrics>>,
}

impl RateLimiter {
    /// Create a new rate limiter with the given configuration.
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            histories: Mutex::new(HashMap::new()),
            metrics: None,
        }
    }

    /// Record admissions and denials in `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Check and record an upload for `identity` at the current instant.
    pub async fn check_and_admit(&self, identity: IpAddr) -> RateLimitResult {
        let mut histories = self.histories.lock().await;
        let now = Instant::now();
        self.admit_locked(&mut histories, identity, now)
    }

    /// Check and record an upload for `identity` at `now`.
    pub async fn check_and_admit_at(&self, identity: IpAddr, now: Instant) -> RateLimitResult {
        let mut histories = self.histories.lock().await;
        self.admit_locked(&mut histories, identity, now)
    }

    fn admit_locked(
        &self,
        histories: &mut HashMap<IpAddr, History>,
        identity: IpAddr,
        now: Instant,
    ) -> RateLimitResult {
        let history = histories.entry(identity).or_default();
        history.trim(now);

        let minute = history.count_within(now, MINUTE);
        let hour = history.count_within(now, HOUR);
        let day = history.times.len() as u32;

        let denied = if minute >= self.config.max_per_minute {
            Some(RateLimitReason::PerMinute {
                limit: self.config.max_per_minute,
            })
        } else if hour >= self.config.max_per_hour {
            Some(RateLimitReason::PerHour {
                limit: self.config.max_per_hour,
            })
        } else if day >= self.config.max_per_day {
            Some(RateLimitReason::PerDay {
                limit: self.config.max_per_day,
            })
        } else {
            None
        };

        if let Some(reason) = denied {
            debug!(%identity, minute, hour, day, %reason, "Upload denied");
            if history.is_empty() {
                histories.remove(&identity);
            }
            if let Some(metrics) = &self.metrics {
                metrics.uploads_denied.with_label_values(&[reason.tier()]).inc();
            }
            return RateLimitResult::Limited { reason };
        }

        history.record(now);
        if let Some(metrics) = &self.metrics {
            metrics.uploads_admitted.inc();
        }

        let remaining = (self.config.max_per_minute - minute - 1)
            .min(self.config.max_per_hour.saturating_sub(hour + 1))
            .min(self.config.max_per_day.saturating_sub(day + 1));
        RateLimitResult::Allowed { remaining }
    }

    /// Trim every history to the trailing 24 hours and forget identities
    /// left with nothing. Returns how many identities were removed.
    pub async fn cleanup(&self, now: Instant) -> usize {
        let mut histories = self.histories.lock().await;
        let before = histories.len();
        histories.retain(|_, history| {
            history.trim(now);
            !history.is_empty()
        });
        let removed = before - histories.len();
        if removed > 0 {
            info!(removed, tracked = histories.len(), "Pruned idle upload histories");
        }
        removed
    }

    /// Number of identities currently tracked.
    pub async fn tracked_identities(&self) -> usize {
        self.histories.lock().await.len()
    }

    /// Admitted uploads recorded for `identity` inside the trailing day.
    pub async fn history_len(&self, identity: IpAddr) -> usize {
        self.histories
            .lock()
            .await
            .get(&identity)
            .map_or(0, |h| h.times.len())
    }
}
