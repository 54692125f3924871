// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: Apache-2.0

//! Router tests driven through `tower::ServiceExt::oneshot`.

mod harness;

use axum::{
    body::{to_bytes, Body},
    extract::connect_info::MockConnectInfo,
    http::{header, Method, Request, StatusCode},
    Router,
};
use ephemeral_board::handlers::router;
use harness::{grant_token, test_config, TestBoard};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::time::timeout;
use tokio_stream::StreamExt;
use tower::ServiceExt;

fn app(board: &TestBoard) -> Router {
    router(board.state.clone()).layer(MockConnectInfo(SocketAddr::from(([192, 0, 2, 1], 5000))))
}

fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn empty_request(method: Method, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health() {
    let board = TestBoard::default_board();
    let response = app(&board)
        .oneshot(empty_request(Method::GET, "/health"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "ephemeral-board");
    assert_eq!(body["blobStore"], true);
}

#[tokio::test]
async fn test_health_reports_blob_outage() {
    let board = TestBoard::default_board();
    board.blobs.set_failing(true);

    let response = app(&board)
        .oneshot(empty_request(Method::GET, "/healthz"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(response).await["status"], "degraded");
}

#[tokio::test]
async fn test_create_and_list_cards() {
    let board = TestBoard::default_board();

    let response = app(&board)
        .oneshot(json_request(
            Method::POST,
            "/api/cards",
            json!({"type": "text", "content": "hello board"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    assert_eq!(created["content"], "hello board");
    assert_eq!(created["origin"]["ipAddress"], "192.0.2.1");

    let response = app(&board)
        .oneshot(empty_request(Method::GET, "/api/cards"))
        .await
        .unwrap();
    let listed = body_json(response).await;
    assert_eq!(listed.as_array().unwrap().len(), 1);
    assert_eq!(listed[0]["id"], created["id"]);
}

#[tokio::test]
async fn test_empty_text_rejected() {
    let board = TestBoard::default_board();
    let response = app(&board)
        .oneshot(json_request(Method::POST, "/api/cards", json!({"content": "   "})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["code"], "VALIDATION_FAILED");
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_delete_unknown_card() {
    let board = TestBoard::default_board();
    let response = app(&board)
        .oneshot(empty_request(Method::DELETE, "/api/cards/42"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_upload_flow_over_http() {
    let board = TestBoard::default_board();

    let response = app(&board)
        .oneshot(json_request(
            Method::POST,
            "/api/upload",
            json!({"fileName": "movie.mp4", "fileType": "video/mp4"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let ticket = body_json(response).await;
    assert_eq!(ticket["type"], "video");
    let object_name = ticket["objectName"].as_str().unwrap().to_string();
    let upload_url = ticket["uploadUrl"].as_str().unwrap();
    assert!(upload_url.starts_with("http://board.test/api/blobs/"));

    let put_uri = format!(
        "/api/blobs/{object_name}?token={}",
        grant_token(upload_url)
    );
    let response = app(&board)
        .oneshot(
            Request::builder()
                .method(Method::PUT)
                .uri(put_uri.as_str())
                .body(Body::from("frames"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    // Grants are single use
    let response = app(&board)
        .oneshot(
            Request::builder()
                .method(Method::PUT)
                .uri(put_uri.as_str())
                .body(Body::from("again"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app(&board)
        .oneshot(json_request(
            Method::POST,
            "/api/cards",
            json!({"type": "video", "objectName": object_name, "fileName": "movie.mp4"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let card = body_json(response).await;
    assert_eq!(card["blob"]["fileSize"], 6);

    let response = app(&board)
        .oneshot(empty_request(
            Method::GET,
            &format!("/api/blobs/{object_name}"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "video/mp4");
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"frames");
}

#[tokio::test]
async fn test_upload_rate_limited_by_peer_address() {
    let mut config = test_config();
    config.rate_limit.max_per_minute = 1;
    let board = TestBoard::start(config);
    let request = || {
        json_request(
            Method::POST,
            "/api/upload",
            json!({"fileName": "a.png", "fileType": "image/png"}),
        )
    };

    let response = app(&board).oneshot(request()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app(&board).oneshot(request()).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let body = body_json(response).await;
    assert_eq!(body["code"], "RATE_LIMITED");
    assert_eq!(body["error"], "Rate limit reached (1/minute)");
}

#[tokio::test]
async fn test_settings_round_trip() {
    let board = TestBoard::default_board();

    let response = app(&board)
        .oneshot(empty_request(Method::GET, "/api/settings"))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["expirationMinutes"], 60);

    let response = app(&board)
        .oneshot(json_request(
            Method::PUT,
            "/api/settings",
            json!({"expirationMinutes": 15}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(board.lifecycle.ttl_minutes(), 15);

    for invalid in [0, -5] {
        let response = app(&board)
            .oneshot(json_request(
                Method::PUT,
                "/api/settings",
                json!({ "expirationMinutes": invalid }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
    assert_eq!(board.lifecycle.ttl_minutes(), 15);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let board = TestBoard::default_board();
    board
        .state
        .service
        .request_upload("192.0.2.50".parse().unwrap(), Some("a.png"), Some("image/png"))
        .await
        .unwrap();

    let response = app(&board)
        .oneshot(empty_request(Method::GET, "/metrics"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("ephemeral_board_uploads_admitted_total 1"));
}

#[tokio::test]
async fn test_sse_stream_starts_with_retry_directive() {
    let board = TestBoard::default_board();
    let response = app(&board)
        .oneshot(empty_request(Method::GET, "/api/sse"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/event-stream");

    let mut body = response.into_body().into_data_stream();
    let first = timeout(Duration::from_secs(1), body.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(&first[..], b"retry:1000\n\n");
}

#[tokio::test]
async fn test_sse_disconnect_unregisters_observer() {
    let board = TestBoard::default_board();
    let response = app(&board)
        .oneshot(empty_request(Method::GET, "/api/sse"))
        .await
        .unwrap();
    assert_eq!(board.hub.observer_count().await, 1);

    let mut body = response.into_body().into_data_stream();
    let handshake = timeout(Duration::from_secs(1), body.next()).await.unwrap();
    assert!(handshake.is_some());

    // Dropping the body is how the transport reports an aborted client
    drop(body);
    for _ in 0..50 {
        if board.hub.observer_count().await == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(board.hub.observer_count().await, 0);

    // Later events reach nobody and do not resurrect the observer
    board
        .state
        .service
        .create_item(
            ephemeral_board::service::CreateItem {
                content: Some("after disconnect".to_string()),
                ..Default::default()
            },
            Default::default(),
            chrono::Utc::now(),
        )
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(board.hub.observer_count().await, 0);
}
