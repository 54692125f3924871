// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: Apache-2.0

//! Board input validation.
//!
//! Implements the checks applied before a mutation reaches the core:
//! - Text items must carry non-empty content
//! - File-backed items must name their uploaded object
//! - Uploaded blobs must not exceed the size limit
//! - Declared MIME type and file extension decide how a file is rendered

use crate::config::ValidationConfig;
use crate::models::ContentKind;
use thiserror::Error;
use tracing::debug;

/// Browser-playable video containers.
const PLAYABLE_VIDEO: &[&str] = &["mp4", "webm", "mov"];

/// Browser-playable audio containers.
const PLAYABLE_AUDIO: &[&str] = &["mp3", "wav", "ogg", "m4a", "webm", "aac"];

/// Validation error types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Content cannot be empty")]
    EmptyContent,

    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),

    #[error("Unexpected parameter for text cards: {0}")]
    UnexpectedParameter(&'static str),

    #[error("File size exceeds limit ({limit} bytes, got {actual})")]
    FileTooLarge { limit: u64, actual: u64 },

    #[error("Invalid file name: {0:?}")]
    InvalidFileName(String),

    #[error("Expiration time cannot be less than 1 minute")]
    InvalidTtl,
}

/// Validator for uploads and new items.
pub struct UploadValidator {
    config: ValidationConfig,
}

impl UploadValidator {
    /// Create a new validator with the given configuration.
    pub fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    /// Reject blobs over the configured size.
    pub fn validate_file_size(&self, size: u64) -> Result<(), ValidationError> {
        if size > self.config.max_file_size {
            debug!(size, limit = self.config.max_file_size, "File too large");
            return Err(ValidationError::FileTooLarge {
                limit: self.config.max_file_size,
                actual: size,
            });
        }
        Ok(())
    }

    /// Validate the inputs of an upload grant request and classify the file.
    pub fn validate_upload(
        &self,
        file_name: Option<&str>,
        file_type: Option<&str>,
    ) -> Result<ContentKind, ValidationError> {
        let file_name = required(file_name, "fileName")?;
        let file_type = required(file_type, "fileType")?;

        if sanitize_file_name(file_name).is_empty() {
            return Err(ValidationError::InvalidFileName(file_name.to_string()));
        }

        Ok(classify_file(file_type, file_name))
    }

    /// Validate the inputs of a new item.
    pub fn validate_item(
        &self,
        kind: ContentKind,
        content: Option<&str>,
        object_name: Option<&str>,
    ) -> Result<(), ValidationError> {
        if kind.is_blob_backed() {
            required(object_name, "objectName")?;
            return Ok(());
        }

        if object_name.is_some() {
            return Err(ValidationError::UnexpectedParameter("objectName"));
        }
        match content {
            Some(text) if !text.trim().is_empty() => Ok(()),
            _ => Err(ValidationError::EmptyContent),
        }
    }
}

fn required<'a>(value: Option<&'a str>, param: &'static str) -> Result<&'a str, ValidationError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => {
            debug!(param, "Missing parameter");
            Err(ValidationError::MissingParameter(param))
        }
    }
}

/// Decide how a file is rendered from its MIME type and extension.
///
/// Video and audio fall back to a plain download when the container is not
/// one browsers play natively.
pub fn classify_file(mime_type: &str, file_name: &str) -> ContentKind {
    let mime = mime_type.trim().to_lowercase();
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase());
    let playable = |allowed: &[&str]| ext.as_deref().is_some_and(|e| allowed.contains(&e));

    if mime.starts_with("image/") {
        ContentKind::Image
    } else if mime.starts_with("video/") {
        if playable(PLAYABLE_VIDEO) {
            ContentKind::Video
        } else {
            ContentKind::File
        }
    } else if mime.starts_with("audio/") {
        if playable(PLAYABLE_AUDIO) {
            ContentKind::Audio
        } else {
            ContentKind::File
        }
    } else {
        ContentKind::File
    }
}

/// Reduce a client-supplied file name to a safe object key component.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(&['/', '\\'][..]).next().unwrap_or(name);
    base.chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect::<String>()
        .trim_matches('.')
        .to_string()
}
