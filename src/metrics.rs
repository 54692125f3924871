// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Prometheus metrics for fan-out, admission control and sweeps.

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

/// Service metrics, registered on a private registry.
pub struct Metrics {
    registry: Registry,
    pub events_queued: IntCounter,
    pub events_dropped: IntCounter,
    pub frames_delivered: IntCounter,
    pub observers_dropped: IntCounter,
    pub observers_connected: IntGauge,
    pub uploads_admitted: IntCounter,
    pub uploads_denied: IntCounterVec,
    pub swept_records: IntCounter,
    pub swept_blobs: IntCounter,
    pub sweep_failures: IntCounter,
    pub unclaimed_blobs_reclaimed: IntCounter,
}

impl Metrics {
    /// Create and register all collectors.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("ephemeral_board".to_string()), None)?;

        let events_queued = IntCounter::new("events_queued_total", "Change events accepted for fan-out")?;
        let events_dropped = IntCounter::new(
            "events_dropped_total",
            "Change events dropped because the fan-out queue was full",
        )?;
        let frames_delivered =
            IntCounter::new("frames_delivered_total", "Frames written to observers")?;
        let observers_dropped = IntCounter::new(
            "observers_dropped_total",
            "Observers removed after a failed write",
        )?;
        let observers_connected =
            IntGauge::new("observers_connected", "Currently registered observers")?;
        let uploads_admitted =
            IntCounter::new("uploads_admitted_total", "Upload requests admitted")?;
        let uploads_denied = IntCounterVec::new(
            Opts::new("uploads_denied_total", "Upload requests denied by tier"),
            &["tier"],
        )?;
        let swept_records =
            IntCounter::new("swept_records_total", "Expired records removed by sweeps")?;
        let swept_blobs = IntCounter::new("swept_blobs_total", "Blobs removed by sweeps")?;
        let sweep_failures = IntCounter::new("sweep_failures_total", "Sweep cycles that failed")?;
        let unclaimed_blobs_reclaimed = IntCounter::new(
            "unclaimed_blobs_reclaimed_total",
            "Uploaded blobs deleted because no card claimed them",
        )?;

        registry.register(Box::new(events_queued.clone()))?;
        registry.register(Box::new(events_dropped.clone()))?;
        registry.register(Box::new(frames_delivered.clone()))?;
        registry.register(Box::new(observers_dropped.clone()))?;
        registry.register(Box::new(observers_connected.clone()))?;
        registry.register(Box::new(uploads_admitted.clone()))?;
        registry.register(Box::new(uploads_denied.clone()))?;
        registry.register(Box::new(swept_records.clone()))?;
        registry.register(Box::new(swept_blobs.clone()))?;
        registry.register(Box::new(sweep_failures.clone()))?;
        registry.register(Box::new(unclaimed_blobs_reclaimed.clone()))?;

        Ok(Self {
            registry,
            events_queued,
            events_dropped,
            frames_delivered,
            observers_dropped,
            observers_connected,
            uploads_admitted,
            uploads_denied,
            swept_records,
            swept_blobs,
            sweep_failures,
            unclaimed_blobs_reclaimed,
        })
    }

    /// Render the registry in the Prometheus text format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
