// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Ephemeral Board Service
//!
//! Serves the board API, the live update stream and the in-process blob
//! routes, and runs the expiry sweep and upload history cleanup.
//!
//! ## Configuration
//!
//! Environment variables (an optional `.env` file is loaded first):
//!
//! - `BIND_ADDR`: Server bind address (default: 0.0.0.0:8080)
//! - `PUBLIC_BASE_URL`: Base of blob links handed to clients
//! - `CARD_TTL_MINUTES`: Initial card lifetime (default: 60)
//! - `SWEEP_SCHEDULE`: Cron expression with seconds (default: 0 0 2 * * *)
//! - `MAX_UPLOADS_PER_MINUTE` / `_HOUR` / `_DAY`: Upload limits (20/200/1000)
//! - `TRUST_FORWARDED_FOR`: Rate limit by `X-Forwarded-For` (default: false)

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ephemeral_board::{
    blob::LocalBlobStore,
    config::Config,
    handlers::{router, AppState},
    hub::BroadcastHub,
    lifecycle::LifecycleManager,
    limiter::RateLimiter,
    metrics::Metrics,
    scheduler::Scheduler,
    service::BoardService,
    store::MemoryContentStore,
    validator::UploadValidator,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let config = Config::from_env();
    info!(
        bind_addr = %config.bind_addr,
        ttl_minutes = config.lifecycle.default_ttl_minutes,
        sweep_schedule = %config.lifecycle.sweep_schedule,
        max_per_minute = config.rate_limit.max_per_minute,
        max_per_hour = config.rate_limit.max_per_hour,
        max_per_day = config.rate_limit.max_per_day,
        "Starting ephemeral board"
    );

    let metrics = Arc::new(Metrics::new()?);
    let store = Arc::new(MemoryContentStore::new());
    let blobs = Arc::new(LocalBlobStore::new(&config.blob)?);

    let lifecycle = Arc::new(
        LifecycleManager::new(&config.lifecycle, store.clone(), blobs.clone())
            .with_metrics(metrics.clone()),
    );
    let limiter =
        Arc::new(RateLimiter::new(config.rate_limit.clone()).with_metrics(metrics.clone()));
    let (hub, worker) = BroadcastHub::new(config.broadcast.clone(), Some(metrics.clone()));

    // Background work
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let fanout = tokio::spawn(worker.run());
    let scheduler =
        Scheduler::new(&config.lifecycle, lifecycle.clone(), limiter.clone())?.spawn(shutdown_rx);

    let service = BoardService::new(
        store,
        blobs.clone(),
        lifecycle,
        limiter,
        hub.clone(),
        UploadValidator::new(config.validation.clone()),
    );
    let state = Arc::new(AppState {
        service,
        blobs,
        metrics,
        config: config.clone(),
    });
    let app = router(state);

    // Start server
    let addr: SocketAddr = config.bind_addr.parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, "Server listening");

    let shutdown_hub = hub.clone();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal().await;
        info!("Shutdown signal received");
        shutdown_tx.send_replace(true);
        // Ends every live stream so graceful shutdown can complete
        shutdown_hub.shutdown().await;
    })
    .await?;

    scheduler.join().await;
    fanout.await?;
    info!("Ephemeral board stopped");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
