// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Ephemeral Board
//!
//! A shared board where posted text and files stay visible to everyone until
//! their time-to-live elapses. The core is three always-resident components:
//!
//! - [`hub::BroadcastHub`]: pushes change events to every live observer
//!   through a queue and a single fan-out worker
//! - [`lifecycle::LifecycleManager`]: computes expiry, decides visibility and
//!   sweeps expired records and their blobs
//! - [`limiter::RateLimiter`]: sliding-window upload admission per client
//!   (20/minute, 200/hour, 1000/day by default)
//!
//! Storage sits behind the [`store::ContentStore`] and [`blob::BlobStore`]
//! traits; in-process implementations serve single-instance deployments.

pub mod blob;
pub mod config;
pub mod error;
pub mod handlers;
pub mod hub;
pub mod lifecycle;
pub mod limiter;
pub mod metrics;
pub mod models;
pub mod scheduler;
pub mod service;
pub mod store;
pub mod validator;

pub use config::Config;
pub use error::{AppError, LifecycleError, StorageError};
pub use hub::{BroadcastHub, ChannelSink, FanoutWorker, Frame, ObserverSink};
pub use lifecycle::{LifecycleManager, SweepReport};
pub use limiter::{RateLimitReason, RateLimitResult, RateLimiter};
pub use models::{ChangeEvent, ContentItem, ContentKind};
pub use service::BoardService;
pub use validator::{UploadValidator, ValidationError};
