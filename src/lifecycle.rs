// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Item lifetime policy and storage reclamation.
//!
//! Visibility is decided at read time by [`LifecycleManager::is_active`]; the
//! sweep only reclaims records and blobs that readers already ignore.

use crate::blob::BlobStore;
use crate::config::LifecycleConfig;
use crate::error::{LifecycleError, StorageError};
use crate::metrics::Metrics;
use crate::models::{ContentItem, ItemId};
use crate::store::ContentStore;
use crate::validator::ValidationError;
use chrono::{DateTime, Duration, Utc};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Counts from one sweep cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub records_deleted: u64,
    pub blobs_deleted: u64,
    /// Blobs that could not be deleted and may now be orphaned
    pub blob_failures: u64,
}

/// Clears the running flag when a sweep ends, however it ends.
struct SweepGuard<'a>(&'a AtomicBool);

impl<'a> SweepGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::Relaxed)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for SweepGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Owns the TTL setting, the active predicate and the expired item sweep.
pub struct LifecycleManager {
    store: Arc<dyn ContentStore>,
    blobs: Arc<dyn BlobStore>,
    ttl_minutes: AtomicU32,
    unclaimed_blob_ttl: std::time::Duration,
    sweeping: AtomicBool,
    metrics: Option<Arc<Metrics>>,
}

impl LifecycleManager {
    pub fn new(
        config: &LifecycleConfig,
        store: Arc<dyn ContentStore>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        Self {
            store,
            blobs,
            ttl_minutes: AtomicU32::new(config.default_ttl_minutes.max(1)),
            unclaimed_blob_ttl: config.unclaimed_blob_ttl(),
            sweeping: AtomicBool::new(false),
            metrics: None,
        }
    }

    /// Record sweep results in `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// TTL applied to items created from now on.
    pub fn ttl_minutes(&self) -> u32 {
        self.ttl_minutes.load(Ordering::Relaxed)
    }

    /// Change the TTL for future items. Existing items keep their expiry.
    pub fn set_ttl_minutes(&self, minutes: u32) -> Result<(), ValidationError> {
        if minutes < 1 {
            return Err(ValidationError::InvalidTtl);
        }
        let previous = self.ttl_minutes.swap(minutes, Ordering::Relaxed);
        info!(previous, minutes, "Card TTL updated");
        Ok(())
    }

    /// `now + ttl_minutes`.
    pub fn compute_expiry(now: DateTime<Utc>, ttl_minutes: u32) -> DateTime<Utc> {
        now + Duration::minutes(i64::from(ttl_minutes))
    }

    /// Expiry for an item created at `now` under the current TTL.
    pub fn expiry_for(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        Self::compute_expiry(now, self.ttl_minutes())
    }

    /// Whether `item` is still visible at `now`.
    pub fn is_active(item: &ContentItem, now: DateTime<Utc>) -> bool {
        item.is_active(now)
    }

    /// Whether a sweep is currently executing.
    pub fn is_sweeping(&self) -> bool {
        self.sweeping.load(Ordering::SeqCst)
    }

    /// Delete every record with `expires_at < now` and the blobs they own.
    ///
    /// A failed blob delete is logged and counted but never keeps its record
    /// alive. Returns [`LifecycleError::SweepInProgress`] without touching
    /// storage when another sweep holds the guard.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, LifecycleError> {
        let _guard = SweepGuard::acquire(&self.sweeping).ok_or(LifecycleError::SweepInProgress)?;

        let result = self.sweep_expired(now).await;
        if let Some(metrics) = &self.metrics {
            match &result {
                Ok(report) => {
                    metrics.swept_records.inc_by(report.records_deleted);
                    metrics.swept_blobs.inc_by(report.blobs_deleted);
                }
                Err(_) => metrics.sweep_failures.inc(),
            }
        }
        result
    }

    /// Delete uploaded blobs that no item claimed within the retention
    /// window ending at `now`. Returns how many were removed.
    pub async fn reclaim_unclaimed(&self, now: DateTime<Utc>) -> Result<usize, StorageError> {
        let retention = Duration::from_std(self.unclaimed_blob_ttl)
            .map_err(|e| StorageError::Unavailable(format!("retention out of range: {e}")))?;
        let reclaimed = self.blobs.reclaim_unclaimed(now - retention).await?;
        if !reclaimed.is_empty() {
            info!(count = reclaimed.len(), keys = ?reclaimed, "Reclaimed unclaimed uploads");
            if let Some(metrics) = &self.metrics {
                metrics.unclaimed_blobs_reclaimed.inc_by(reclaimed.len() as u64);
            }
        }
        Ok(reclaimed.len())
    }

    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<SweepReport, LifecycleError> {
        let expired = self.store.list_expired(now).await?;
        if expired.is_empty() {
            debug!("Sweep found nothing to reclaim");
            return Ok(SweepReport::default());
        }

        let mut report = SweepReport::default();
        for blob in expired.iter().filter_map(|item| item.blob.as_ref()) {
            match self.blobs.delete(&blob.object_name).await {
                Ok(()) => report.blobs_deleted += 1,
                Err(e) => {
                    warn!(key = %blob.object_name, error = %e, "Blob delete failed during sweep");
                    report.blob_failures += 1;
                }
            }
        }

        let ids: Vec<ItemId> = expired.iter().map(|item| item.id).collect();
        report.records_deleted = self.store.delete_many(&ids).await?;

        info!(
            records = report.records_deleted,
            blobs = report.blobs_deleted,
            blob_failures = report.blob_failures,
            "Sweep completed"
        );
        Ok(report)
    }
}
