// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Live change fan-out to every connected observer.
//!
//! Mutation handlers call [`BroadcastHub::broadcast`], which only enqueues the
//! event. A single [`FanoutWorker`] drains the queue in order, encodes each
//! event once and writes the frame to a snapshot of the registered sinks
//! concurrently. A sink that fails or stalls past the write timeout is evicted
//! and closed; it never holds up the others.

use crate::config::BroadcastConfig;
use crate::metrics::Metrics;
use crate::models::ChangeEvent;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Identity of one observer connection.
pub type ObserverId = Uuid;

/// One unit written to an observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Reconnect interval, sent once when the observer registers
    Retry(Duration),
    /// JSON encoding of a change event
    Event {
        event_type: &'static str,
        data: Arc<str>,
    },
}

impl Frame {
    /// Encode a change event.
    pub fn encode(event: &ChangeEvent) -> Result<Self, serde_json::Error> {
        Ok(Self::Event {
            event_type: event.type_tag(),
            data: serde_json::to_string(event)?.into(),
        })
    }

    /// Text of this frame in the event-stream format.
    pub fn to_event_stream(&self) -> String {
        match self {
            Self::Retry(interval) => format!("retry: {}\n\n", interval.as_millis()),
            Self::Event { data, .. } => format!("data: {data}\n\n"),
        }
    }
}

/// Reasons a frame could not be written.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SinkError {
    #[error("observer stream closed")]
    Closed,

    #[error("observer is not keeping up")]
    Lagged,

    #[error("observer write timed out after {0:?}")]
    Timeout(Duration),
}

/// Write side of an observer connection.
#[async_trait]
pub trait ObserverSink: Send + Sync {
    /// Write one frame
    async fn send(&self, frame: Frame) -> Result<(), SinkError>;

    /// Close the connection; must tolerate being called more than once
    async fn close(&self);
}

/// Sink backed by a bounded channel whose receiver feeds an HTTP stream.
///
/// Writes never wait: a full buffer means the reader is not keeping up.
pub struct ChannelSink {
    tx: Mutex<Option<mpsc::Sender<Frame>>>,
}

impl ChannelSink {
    /// Create a sink and the receiver that drains it.
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (
            Self {
                tx: Mutex::new(Some(tx)),
            },
            rx,
        )
    }

    fn sender(&self) -> Option<mpsc::Sender<Frame>> {
        self.tx.lock().ok().and_then(|tx| tx.clone())
    }
}

#[async_trait]
impl ObserverSink for ChannelSink {
    async fn send(&self, frame: Frame) -> Result<(), SinkError> {
        let tx = self.sender().ok_or(SinkError::Closed)?;
        tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SinkError::Lagged,
            mpsc::error::TrySendError::Closed(_) => SinkError::Closed,
        })
    }

    async fn close(&self) {
        if let Ok(mut tx) = self.tx.lock() {
            tx.take();
        }
    }
}

/// Outcome of delivering one event.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub dropped: Vec<ObserverId>,
}

struct HubInner {
    config: BroadcastConfig,
    observers: RwLock<HashMap<ObserverId, Arc<dyn ObserverSink>>>,
    events: mpsc::Sender<ChangeEvent>,
    shutdown: watch::Sender<bool>,
    metrics: Option<Arc<Metrics>>,
}

/// Registry of live observers and entry point for change events.
#[derive(Clone)]
pub struct BroadcastHub {
    inner: Arc<HubInner>,
}

/// Consumes queued events and performs the per-observer writes.
pub struct FanoutWorker {
    hub: BroadcastHub,
    events: mpsc::Receiver<ChangeEvent>,
    shutdown: watch::Receiver<bool>,
}

impl BroadcastHub {
    /// Create a hub and the worker that must be spawned to drive it.
    pub fn new(config: BroadcastConfig, metrics: Option<Arc<Metrics>>) -> (Self, FanoutWorker) {
        let (events_tx, events_rx) = mpsc::channel(config.queue_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let hub = Self {
            inner: Arc::new(HubInner {
                config,
                observers: RwLock::new(HashMap::new()),
                events: events_tx,
                shutdown: shutdown_tx,
                metrics,
            }),
        };
        let worker = FanoutWorker {
            hub: hub.clone(),
            events: events_rx,
            shutdown: shutdown_rx,
        };
        (hub, worker)
    }

    /// Frames buffered per channel-backed observer.
    pub fn observer_buffer(&self) -> usize {
        self.inner.config.observer_buffer
    }

    /// Register an observer and send it the reconnect-interval handshake.
    ///
    /// Registering the same sink twice is a no-op. Registering a different
    /// sink under a known id replaces and closes the old one. A sink that
    /// cannot take the handshake is closed and not registered.
    pub async fn register(
        &self,
        id: ObserverId,
        sink: Arc<dyn ObserverSink>,
    ) -> Result<(), SinkError> {
        if *self.inner.shutdown.borrow() {
            sink.close().await;
            return Err(SinkError::Closed);
        }

        if let Some(existing) = self.inner.observers.read().await.get(&id) {
            if Arc::ptr_eq(existing, &sink) {
                return Ok(());
            }
        }

        let handshake = Frame::Retry(self.inner.config.retry_interval());
        if let Err(e) = self.write(&sink, handshake).await {
            warn!(observer = %id, error = %e, "Handshake failed, observer not registered");
            sink.close().await;
            return Err(e);
        }

        let (replaced, count) = {
            let mut observers = self.inner.observers.write().await;
            let replaced = observers.insert(id, sink);
            (replaced, observers.len())
        };
        if let Some(old) = replaced {
            old.close().await;
        }
        self.set_connected(count);
        info!(observer = %id, observers = count, "Observer registered");
        Ok(())
    }

    /// Remove an observer and close its sink. Unknown ids are ignored.
    pub async fn unregister(&self, id: ObserverId) {
        let (removed, count) = {
            let mut observers = self.inner.observers.write().await;
            let removed = observers.remove(&id);
            (removed, observers.len())
        };
        if let Some(sink) = removed {
            sink.close().await;
            self.set_connected(count);
            info!(observer = %id, observers = count, "Observer unregistered");
        }
    }

    /// Queue an event for fan-out without waiting for delivery.
    ///
    /// When the queue is full the event is dropped and logged; observers
    /// recover by re-fetching the full list.
    pub fn broadcast(&self, event: ChangeEvent) {
        let event_type = event.type_tag();
        match self.inner.events.try_send(event) {
            Ok(()) => {
                debug!(event_type, "Change event queued");
                if let Some(metrics) = &self.inner.metrics {
                    metrics.events_queued.inc();
                }
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(event_type, "Fan-out queue full, change event dropped");
                if let Some(metrics) = &self.inner.metrics {
                    metrics.events_dropped.inc();
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(event_type, "Fan-out worker stopped, change event dropped");
            }
        }
    }

    /// Encode `event` once and write it to every registered observer.
    pub async fn deliver(&self, event: &ChangeEvent) -> DeliveryReport {
        let frame = match Frame::encode(event) {
            Ok(frame) => frame,
            Err(e) => {
                error!(error = %e, event_type = event.type_tag(), "Failed to encode change event");
                return DeliveryReport::default();
            }
        };

        let snapshot: Vec<(ObserverId, Arc<dyn ObserverSink>)> = self
            .inner
            .observers
            .read()
            .await
            .iter()
            .map(|(id, sink)| (*id, Arc::clone(sink)))
            .collect();

        let mut report = DeliveryReport::default();
        if snapshot.is_empty() {
            return report;
        }

        let mut writes = JoinSet::new();
        for (id, sink) in snapshot {
            let hub = self.clone();
            let frame = frame.clone();
            writes.spawn(async move {
                let result = hub.write(&sink, frame).await;
                (id, sink, result)
            });
        }

        while let Some(joined) = writes.join_next().await {
            match joined {
                Ok((_, _, Ok(()))) => report.delivered += 1,
                Ok((id, sink, Err(e))) => {
                    warn!(observer = %id, error = %e, "Observer write failed, dropping observer");
                    self.evict(id, &sink).await;
                    report.dropped.push(id);
                }
                Err(e) => error!(error = %e, "Observer write task failed"),
            }
        }

        if let Some(metrics) = &self.inner.metrics {
            metrics.frames_delivered.inc_by(report.delivered as u64);
            metrics.observers_dropped.inc_by(report.dropped.len() as u64);
        }
        debug!(
            event_type = event.type_tag(),
            delivered = report.delivered,
            dropped = report.dropped.len(),
            "Change event delivered"
        );
        report
    }

    /// Number of registered observers.
    pub async fn observer_count(&self) -> usize {
        self.inner.observers.read().await.len()
    }

    /// Whether `id` is registered.
    pub async fn is_registered(&self, id: ObserverId) -> bool {
        self.inner.observers.read().await.contains_key(&id)
    }

    /// Stop the worker, close every observer and refuse new registrations.
    pub async fn shutdown(&self) {
        self.inner.shutdown.send_replace(true);
        let drained: Vec<_> = self.inner.observers.write().await.drain().collect();
        let closed = drained.len();
        for (_, sink) in drained {
            sink.close().await;
        }
        self.set_connected(0);
        info!(closed, "Broadcast hub shut down");
    }

    /// Guard that unregisters `id` when dropped, tying registration to the
    /// lifetime of the response stream.
    pub fn disconnect_guard(&self, id: ObserverId) -> DisconnectGuard {
        DisconnectGuard {
            hub: self.clone(),
            id,
        }
    }

    async fn write(&self, sink: &Arc<dyn ObserverSink>, frame: Frame) -> Result<(), SinkError> {
        let timeout = self.inner.config.write_timeout();
        match tokio::time::timeout(timeout, sink.send(frame)).await {
            Ok(result) => result,
            Err(_) => Err(SinkError::Timeout(timeout)),
        }
    }

    /// Remove `id` only if it still maps to `sink`, then close the sink.
    async fn evict(&self, id: ObserverId, sink: &Arc<dyn ObserverSink>) {
        let count = {
            let mut observers = self.inner.observers.write().await;
            if observers
                .get(&id)
                .is_some_and(|current| Arc::ptr_eq(current, sink))
            {
                observers.remove(&id);
            }
            observers.len()
        };
        sink.close().await;
        self.set_connected(count);
    }

    fn set_connected(&self, count: usize) {
        if let Some(metrics) = &self.inner.metrics {
            metrics.observers_connected.set(count as i64);
        }
    }
}

impl FanoutWorker {
    /// Deliver queued events in order until the hub shuts down.
    pub async fn run(mut self) {
        info!("Fan-out worker started");
        loop {
            if *self.shutdown.borrow() {
                break;
            }
            tokio::select! {
                biased;
                changed = self.shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                event = self.events.recv() => match event {
                    Some(event) => {
                        self.hub.deliver(&event).await;
                    }
                    None => break,
                },
            }
        }
        info!("Fan-out worker stopped");
    }
}

/// Unregisters an observer when its response stream is dropped.
pub struct DisconnectGuard {
    hub: BroadcastHub,
    id: ObserverId,
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        let hub = self.hub.clone();
        let id = self.id;
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                debug!(observer = %id, "Observer stream dropped");
                hub.unregister(id).await;
            });
        }
    }
}
