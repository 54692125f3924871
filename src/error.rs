// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Error types for the ephemeral board service.

use crate::hub::SinkError;
use crate::limiter::RateLimitReason;
use crate::models::ItemId;
use crate::validator::ValidationError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Failures reported by the content or blob store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Upload grant rejected for {0}")]
    InvalidGrant(String),

    #[error("Object already belongs to another card: {0}")]
    AlreadyClaimed(String),
}

/// Failures of a background sweep cycle.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("A sweep is already running")]
    SweepInProgress,

    #[error("Sweep failed: {0}")]
    Storage(#[from] StorageError),
}

/// Request-path error taxonomy.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{0}")]
    RateLimited(RateLimitReason),

    #[error("Card not found: {0}")]
    NotFound(ItemId),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Live updates unavailable: {0}")]
    Stream(#[from] SinkError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub code: &'static str,
}

impl AppError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_FAILED"),
            Self::RateLimited(_) => (StatusCode::TOO_MANY_REQUESTS, "RATE_LIMITED"),
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Self::Storage(StorageError::NotFound(_)) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Self::Storage(StorageError::InvalidGrant(_)) => (StatusCode::FORBIDDEN, "INVALID_GRANT"),
            Self::Storage(StorageError::AlreadyClaimed(_)) => (StatusCode::CONFLICT, "ALREADY_CLAIMED"),
            Self::Storage(StorageError::Unavailable(_)) => {
                (StatusCode::SERVICE_UNAVAILABLE, "STORAGE_UNAVAILABLE")
            }
            Self::Stream(_) => (StatusCode::SERVICE_UNAVAILABLE, "STREAM_UNAVAILABLE"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            tracing::error!(error = %self, code, "Request failed");
        }
        (
            status,
            Json(ErrorResponse {
                success: false,
                error: self.to_string(),
                code,
            }),
        )
            .into_response()
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, AppError>;
