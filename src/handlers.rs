// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! HTTP surface of the ephemeral board.
//!
//! Thin axum handlers over [`BoardService`], the blob transfer routes of
//! [`LocalBlobStore`] and the live update stream.

use crate::blob::LocalBlobStore;
use crate::config::Config;
use crate::error::{AppError, Result};
use crate::hub::{ChannelSink, Frame};
use crate::metrics::Metrics;
use crate::models::{ContentItem, ContentKind, ItemId, Origin};
use crate::service::{BoardService, CreateItem, UploadTicket};
use crate::validator::ValidationError;
use axum::{
    body::Bytes,
    extract::{ConnectInfo, DefaultBodyLimit, Path, Query, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{delete, get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio_stream::{wrappers::ReceiverStream, Stream, StreamExt};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};
use uuid::Uuid;

/// Shared application state.
pub struct AppState {
    pub service: BoardService,
    pub blobs: Arc<LocalBlobStore>,
    pub metrics: Arc<Metrics>,
    pub config: Config,
}

/// Health check response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    pub content_store: bool,
    pub blob_store: bool,
    pub observers: usize,
}

/// New card request body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCardRequest {
    #[serde(rename = "type", default)]
    pub kind: ContentKind,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub object_name: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
}

/// Upload grant request body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRequest {
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub file_type: Option<String>,
}

/// TTL setting, in both directions.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub expiration_minutes: i64,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub success: bool,
}

#[derive(Debug, Serialize)]
pub struct ClearResponse {
    pub success: bool,
    pub deleted: usize,
}

#[derive(Debug, Deserialize)]
pub struct BlobQuery {
    pub token: Option<String>,
}

/// Build the router with every route and layer.
pub fn router(state: Arc<AppState>) -> Router {
    let body_limit = usize::try_from(state.config.validation.max_file_size).unwrap_or(usize::MAX);
    let cors = cors_layer(&state.config.allowed_origins);

    let mut app = Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route(
            "/api/cards",
            get(list_cards).post(create_card).delete(clear_cards),
        )
        .route("/api/cards/:id", delete(delete_card))
        .route("/api/upload", post(request_upload))
        .route(
            "/api/blobs/:key",
            get(download_blob)
                .put(upload_blob)
                .layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/api/settings", get(get_settings).put(put_settings))
        .route("/api/sse", get(live_updates));

    if state.config.metrics.enabled {
        app = app.route(&state.config.metrics.path, get(metrics));
    }

    app.layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE]);

    if origins.is_empty() {
        return cors.allow_origin(Any);
    }
    let origins: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
    cors.allow_origin(AllowOrigin::list(origins))
}

/// Client identity for admission control.
///
/// The peer address, unless forwarded headers are trusted and carry a
/// well-formed address.
pub fn client_ip(headers: &HeaderMap, peer: SocketAddr, trust_forwarded_for: bool) -> IpAddr {
    if trust_forwarded_for {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| {
                v.split(',')
                    .map(str::trim)
                    .find_map(|candidate| candidate.parse::<IpAddr>().ok())
            });
        if let Some(ip) = forwarded {
            return ip;
        }
    }
    peer.ip()
}

/// Health check endpoint.
pub async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
    let storage = state.service.storage_health().await;
    let (status, label) = if storage.is_healthy() {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    (
        status,
        Json(HealthResponse {
            status: label,
            service: "ephemeral-board",
            version: env!("CARGO_PKG_VERSION"),
            content_store: storage.content_store,
            blob_store: storage.blob_store,
            observers: state.service.hub().observer_count().await,
        }),
    )
}

/// Active cards, newest first.
pub async fn list_cards(State(state): State<Arc<AppState>>) -> Result<Json<Vec<ContentItem>>> {
    Ok(Json(state.service.list_active(Utc::now()).await?))
}

pub async fn create_card(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(req): Json<CreateCardRequest>,
) -> Result<(StatusCode, Json<ContentItem>)> {
    let origin = Origin {
        ip_address: Some(client_ip(&headers, peer, state.config.trust_forwarded_for).to_string()),
        user_agent: headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    };

    let item = state
        .service
        .create_item(
            CreateItem {
                kind: req.kind,
                content: req.content,
                object_name: req.object_name,
                file_name: req.file_name,
            },
            origin,
            Utc::now(),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(item)))
}

pub async fn delete_card(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ItemId>,
) -> Result<Json<DeleteResponse>> {
    state.service.delete_item(id).await?;
    Ok(Json(DeleteResponse { success: true }))
}

pub async fn clear_cards(State(state): State<Arc<AppState>>) -> Result<Json<ClearResponse>> {
    let deleted = state.service.clear().await?;
    Ok(Json(ClearResponse {
        success: true,
        deleted,
    }))
}

/// Rate-limited upload grant.
pub async fn request_upload(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(req): Json<UploadRequest>,
) -> Result<Json<UploadTicket>> {
    let identity = client_ip(&headers, peer, state.config.trust_forwarded_for);
    let ticket = state
        .service
        .request_upload(identity, req.file_name.as_deref(), req.file_type.as_deref())
        .await?;
    Ok(Json(ticket))
}

pub async fn upload_blob(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    Query(query): Query<BlobQuery>,
    body: Bytes,
) -> Result<StatusCode> {
    let token = query
        .token
        .ok_or(ValidationError::MissingParameter("token"))?;
    state.blobs.accept_upload(&key, &token, body).await?;
    Ok(StatusCode::CREATED)
}

pub async fn download_blob(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<Response> {
    let object = state.blobs.read(&key).await?;
    Ok(([(header::CONTENT_TYPE, object.content_type)], object.bytes).into_response())
}

pub async fn get_settings(State(state): State<Arc<AppState>>) -> Json<Settings> {
    Json(Settings {
        expiration_minutes: i64::from(state.service.ttl_minutes()),
    })
}

pub async fn put_settings(
    State(state): State<Arc<AppState>>,
    Json(req): Json<Settings>,
) -> Result<Json<Settings>> {
    let minutes =
        u32::try_from(req.expiration_minutes).map_err(|_| ValidationError::InvalidTtl)?;
    state.service.set_ttl_minutes(minutes)?;
    Ok(Json(Settings {
        expiration_minutes: i64::from(minutes),
    }))
}

/// Live update stream.
///
/// Each connection registers under a fresh id. Dropping the response stream,
/// which axum does when the client goes away, unregisters it.
pub async fn live_updates(
    State(state): State<Arc<AppState>>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    let hub = state.service.hub().clone();
    let id = Uuid::new_v4();
    let (sink, frames) = ChannelSink::new(hub.observer_buffer());
    hub.register(id, Arc::new(sink)).await?;
    info!(observer = %id, "Live update stream opened");

    let guard = hub.disconnect_guard(id);
    let stream = ReceiverStream::new(frames).map(move |frame| {
        let _guard = &guard;
        Ok::<_, Infallible>(match frame {
            Frame::Retry(interval) => Event::default().retry(interval),
            Frame::Event { data, .. } => Event::default().data(&*data),
        })
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// Prometheus text exposition.
pub async fn metrics(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse> {
    let body = state
        .metrics
        .render()
        .map_err(|e| AppError::Internal(format!("metrics encoding failed: {e}")))?;
    debug!(bytes = body.len(), "Metrics scraped");
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn peer() -> SocketAddr {
        SocketAddr::from((Ipv4Addr::new(192, 0, 2, 10), 40000))
    }

    #[test]
    fn test_client_ip_uses_peer_by_default() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.9"));
        assert_eq!(client_ip(&headers, peer(), false), peer().ip());
    }

    #[test]
    fn test_client_ip_trusts_first_valid_forwarded() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("garbage, 203.0.113.9, 10.0.0.1"),
        );
        assert_eq!(
            client_ip(&headers, peer(), true),
            "203.0.113.9".parse::<IpAddr>().unwrap()
        );
    }

    #[test]
    fn test_client_ip_ignores_malformed_forwarded() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("unknown"));
        assert_eq!(client_ip(&headers, peer(), true), peer().ip());
        assert_eq!(client_ip(&HeaderMap::new(), peer(), true), peer().ip());
    }

    #[test]
    fn test_create_request_defaults_to_text() {
        let req: CreateCardRequest = serde_json::from_str(r#"{"content":"hi"}"#).unwrap();
        assert_eq!(req.kind, ContentKind::Text);

        let req: CreateCardRequest =
            serde_json::from_str(r#"{"type":"image","objectName":"k-a.png"}"#).unwrap();
        assert_eq!(req.kind, ContentKind::Image);
        assert_eq!(req.object_name.as_deref(), Some("k-a.png"));
    }
}
