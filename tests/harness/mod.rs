// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: Apache-2.0

//! Shared fixtures for board integration tests.
//!
//! Wires the real core components around an in-memory content store and a
//! blob store that records every delete.

#![allow(dead_code)]

pub mod blobs;
pub mod generators;

use blobs::RecordingBlobStore;
use ephemeral_board::{
    blob::LocalBlobStore,
    config::{BlobConfig, Config},
    handlers::AppState,
    hub::{BroadcastHub, ChannelSink, Frame, ObserverId},
    lifecycle::LifecycleManager,
    limiter::RateLimiter,
    metrics::Metrics,
    service::BoardService,
    store::MemoryContentStore,
    validator::UploadValidator,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

/// A fully wired board with handles on its collaborators.
pub struct TestBoard {
    pub state: Arc<AppState>,
    pub store: Arc<MemoryContentStore>,
    pub blobs: Arc<RecordingBlobStore>,
    pub local_blobs: Arc<LocalBlobStore>,
    pub lifecycle: Arc<LifecycleManager>,
    pub limiter: Arc<RateLimiter>,
    pub hub: BroadcastHub,
    pub metrics: Arc<Metrics>,
}

impl TestBoard {
    /// Build a board and start its fan-out worker.
    pub fn start(config: Config) -> Self {
        let metrics = Arc::new(Metrics::new().unwrap());
        let store = Arc::new(MemoryContentStore::new());
        let local_blobs = Arc::new(LocalBlobStore::new(&config.blob).unwrap());
        let blobs = Arc::new(RecordingBlobStore::new(local_blobs.clone()));

        let lifecycle = Arc::new(
            LifecycleManager::new(&config.lifecycle, store.clone(), blobs.clone())
                .with_metrics(metrics.clone()),
        );
        let limiter = Arc::new(
            RateLimiter::new(config.rate_limit.clone()).with_metrics(metrics.clone()),
        );
        let (hub, worker) = BroadcastHub::new(config.broadcast.clone(), Some(metrics.clone()));
        tokio::spawn(worker.run());

        let service = BoardService::new(
            store.clone(),
            blobs.clone(),
            lifecycle.clone(),
            limiter.clone(),
            hub.clone(),
            UploadValidator::new(config.validation.clone()),
        );
        let state = Arc::new(AppState {
            service,
            blobs: local_blobs.clone(),
            metrics: metrics.clone(),
            config,
        });

        Self {
            state,
            store,
            blobs,
            local_blobs,
            lifecycle,
            limiter,
            hub,
            metrics,
        }
    }

    /// Board with default settings and a fixed public base URL.
    pub fn default_board() -> Self {
        Self::start(test_config())
    }

    /// Register a channel observer and consume its handshake.
    pub async fn observe(&self) -> (ObserverId, mpsc::Receiver<Frame>) {
        let id = Uuid::new_v4();
        let (sink, mut rx) = ChannelSink::new(self.hub.observer_buffer());
        self.hub.register(id, Arc::new(sink)).await.unwrap();
        match next_frame(&mut rx).await {
            Some(Frame::Retry(_)) => {}
            other => panic!("expected handshake, got {other:?}"),
        }
        (id, rx)
    }
}

/// Default config pointing blob links at a test host.
pub fn test_config() -> Config {
    Config {
        blob: BlobConfig {
            public_base_url: "http://board.test".to_string(),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Next frame, or `None` if nothing arrives within a second.
pub async fn next_frame(rx: &mut mpsc::Receiver<Frame>) -> Option<Frame> {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .ok()
        .flatten()
}

/// Decode the JSON body of an event frame.
pub fn frame_json(frame: &Frame) -> serde_json::Value {
    match frame {
        Frame::Event { data, .. } => serde_json::from_str(data).unwrap(),
        Frame::Retry(_) => panic!("handshake frame has no body"),
    }
}

/// Extract the `token` query parameter of an upload URL.
pub fn grant_token(upload_url: &str) -> String {
    url::Url::parse(upload_url)
        .unwrap()
        .query_pairs()
        .find(|(k, _)| k == "token")
        .map(|(_, v)| v.into_owned())
        .unwrap()
}
