// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Configuration for the ephemeral board service.
//!
//! Every field has a serde default so partial configs deserialize, and
//! [`Config::from_env`] overlays environment variables on those defaults.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the ephemeral board service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server bind address (default: 0.0.0.0:8080)
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Use the first `X-Forwarded-For` address as the client identity
    #[serde(default)]
    pub trust_forwarded_for: bool,

    /// CORS origins; empty allows any origin
    #[serde(default)]
    pub allowed_origins: Vec<String>,

    /// Upload admission configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Expiry and sweep configuration
    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    /// Live update fan-out configuration
    #[serde(default)]
    pub broadcast: BroadcastConfig,

    /// Upload validation configuration
    #[serde(default)]
    pub validation: ValidationConfig,

    /// Blob store configuration
    #[serde(default)]
    pub blob: BlobConfig,

    /// Metrics configuration
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Sliding-window upload limits per client identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Accepted uploads in any trailing minute (default: 20)
    #[serde(default = "default_max_per_minute")]
    pub max_per_minute: u32,

    /// Accepted uploads in any trailing hour (default: 200)
    #[serde(default = "default_max_per_hour")]
    pub max_per_hour: u32,

    /// Accepted uploads in any trailing 24 hours (default: 1000)
    #[serde(default = "default_max_per_day")]
    pub max_per_day: u32,
}

/// Item expiry and background sweep configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// TTL applied to new items until changed through the settings API (default: 60)
    #[serde(default = "default_ttl_minutes")]
    pub default_ttl_minutes: u32,

    /// Cron expression (seconds first) for the expired item sweep (default: daily 02:00 UTC)
    #[serde(default = "default_sweep_schedule")]
    pub sweep_schedule: String,

    /// Interval between rate limiter housekeeping passes in seconds (default: 600)
    #[serde(default = "default_limiter_cleanup_secs")]
    pub limiter_cleanup_secs: u64,

    /// Age after which an uploaded blob no card has claimed is deleted, in
    /// seconds since upload (default: 3600)
    #[serde(default = "default_unclaimed_blob_secs")]
    pub unclaimed_blob_secs: u64,
}

/// Broadcast hub configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastConfig {
    /// Pending change events before `broadcast` starts dropping (default: 1024)
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Frames buffered per observer stream (default: 64)
    #[serde(default = "default_observer_buffer")]
    pub observer_buffer: usize,

    /// Longest a single observer write may block before the observer is dropped (default: 5000)
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,

    /// Reconnect interval sent in the handshake frame (default: 1000)
    #[serde(default = "default_retry_ms")]
    pub retry_ms: u64,
}

/// Upload validation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Largest accepted blob in bytes (default: 1 GiB)
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
}

/// Blob store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobConfig {
    /// Externally reachable base URL used in upload and file links
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,

    /// Lifetime of an upload grant in seconds (default: 300)
    #[serde(default = "default_upload_grant_secs")]
    pub upload_grant_secs: u64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable Prometheus metrics endpoint (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics endpoint path (default: /metrics)
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

// Default value functions
fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_max_per_minute() -> u32 {
    20
}

fn default_max_per_hour() -> u32 {
    200
}

fn default_max_per_day() -> u32 {
    1000
}

fn default_ttl_minutes() -> u32 {
    60
}

fn default_sweep_schedule() -> String {
    "0 0 2 * * *".to_string()
}

fn default_limiter_cleanup_secs() -> u64 {
    600
}

fn default_unclaimed_blob_secs() -> u64 {
    3600
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_observer_buffer() -> usize {
    64
}

fn default_write_timeout_ms() -> u64 {
    5000
}

fn default_retry_ms() -> u64 {
    1000
}

fn default_max_file_size() -> u64 {
    1024 * 1024 * 1024
}

fn default_public_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_upload_grant_secs() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            trust_forwarded_for: false,
            allowed_origins: Vec::new(),
            rate_limit: RateLimitConfig::default(),
            lifecycle: LifecycleConfig::default(),
            broadcast: BroadcastConfig::default(),
            validation: ValidationConfig::default(),
            blob: BlobConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_per_minute: default_max_per_minute(),
            max_per_hour: default_max_per_hour(),
            max_per_day: default_max_per_day(),
        }
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            default_ttl_minutes: default_ttl_minutes(),
            sweep_schedule: default_sweep_schedule(),
            limiter_cleanup_secs: default_limiter_cleanup_secs(),
            unclaimed_blob_secs: default_unclaimed_blob_secs(),
        }
    }
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            observer_buffer: default_observer_buffer(),
            write_timeout_ms: default_write_timeout_ms(),
            retry_ms: default_retry_ms(),
        }
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_file_size: default_max_file_size(),
        }
    }
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            public_base_url: default_public_base_url(),
            upload_grant_secs: default_upload_grant_secs(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            path: default_metrics_path(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables, keeping defaults for
    /// anything unset or unparsable.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Ok(url) = std::env::var("PUBLIC_BASE_URL") {
            config.blob.public_base_url = url;
        }
        if let Ok(origins) = std::env::var("ALLOWED_ORIGINS") {
            config.allowed_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Ok(schedule) = std::env::var("SWEEP_SCHEDULE") {
            config.lifecycle.sweep_schedule = schedule;
        }

        config.trust_forwarded_for = env_or("TRUST_FORWARDED_FOR", config.trust_forwarded_for);
        config.lifecycle.default_ttl_minutes =
            env_or("CARD_TTL_MINUTES", config.lifecycle.default_ttl_minutes);
        config.lifecycle.limiter_cleanup_secs =
            env_or("LIMITER_CLEANUP_SECS", config.lifecycle.limiter_cleanup_secs);
        config.lifecycle.unclaimed_blob_secs =
            env_or("UNCLAIMED_BLOB_SECS", config.lifecycle.unclaimed_blob_secs);
        config.rate_limit.max_per_minute =
            env_or("MAX_UPLOADS_PER_MINUTE", config.rate_limit.max_per_minute);
        config.rate_limit.max_per_hour =
            env_or("MAX_UPLOADS_PER_HOUR", config.rate_limit.max_per_hour);
        config.rate_limit.max_per_day =
            env_or("MAX_UPLOADS_PER_DAY", config.rate_limit.max_per_day);
        config.validation.max_file_size =
            env_or("MAX_FILE_SIZE_BYTES", config.validation.max_file_size);
        config.broadcast.queue_capacity =
            env_or("BROADCAST_QUEUE", config.broadcast.queue_capacity);
        config.broadcast.observer_buffer =
            env_or("OBSERVER_BUFFER", config.broadcast.observer_buffer);
        config.broadcast.write_timeout_ms =
            env_or("OBSERVER_WRITE_TIMEOUT_MS", config.broadcast.write_timeout_ms);
        config.broadcast.retry_ms = env_or("SSE_RETRY_MS", config.broadcast.retry_ms);

        config
    }
}

fn env_or<T: std::str::FromStr>(key: &str, fallback: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(fallback)
}

impl LifecycleConfig {
    /// Get the limiter housekeeping interval
    pub fn limiter_cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.limiter_cleanup_secs.max(1))
    }

    /// Get how long an unclaimed upload is kept
    pub fn unclaimed_blob_ttl(&self) -> Duration {
        Duration::from_secs(self.unclaimed_blob_secs)
    }
}

impl BroadcastConfig {
    /// Get the per-observer write timeout
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    /// Get the reconnect interval advertised to observers
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_ms)
    }
}

impl BlobConfig {
    /// Get the upload grant lifetime
    pub fn upload_grant_ttl(&self) -> Duration {
        Duration::from_secs(self.upload_grant_secs)
    }
}
