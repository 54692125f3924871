// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Binary object storage for file-backed items.
//!
//! Clients never stream uploads through the board handlers. They ask for a
//! short-lived upload grant, put the bytes against it, then create an item
//! naming the object. [`LocalBlobStore`] implements that flow in process; any
//! S3-style store fits behind the same [`BlobStore`] trait.

use crate::config::BlobConfig;
use crate::error::StorageError;
use crate::validator::sanitize_file_name;
use async_trait::async_trait;
use axum::body::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

/// Permission to upload one object before `expires_at`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadGrant {
    pub object_name: String,
    pub upload_url: String,
    pub file_url: String,
    pub expires_at: DateTime<Utc>,
}

/// Blob store operations used by the board.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Issue a time-limited write grant for a new object
    async fn issue_upload_grant(
        &self,
        file_name: &str,
        content_type: &str,
    ) -> Result<UploadGrant, StorageError>;

    /// Take ownership of an uploaded object for one item and return its
    /// size in bytes. Each object can be claimed once; a second claim fails
    /// with [`StorageError::AlreadyClaimed`].
    async fn claim(&self, key: &str) -> Result<u64, StorageError>;

    /// Delete objects uploaded before `cutoff` that no item has claimed.
    /// Returns the deleted keys.
    async fn reclaim_unclaimed(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>, StorageError>;

    /// Delete an object; deleting a missing object succeeds
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Public download link for an object
    fn public_url(&self, key: &str) -> Result<String, StorageError>;

    /// Check the store is reachable
    async fn ping(&self) -> Result<(), StorageError>;
}

/// Stored object payload.
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub content_type: String,
    pub bytes: Bytes,
}

#[derive(Debug)]
struct Entry {
    object: StoredObject,
    uploaded_at: DateTime<Utc>,
    claimed: bool,
}

#[derive(Debug)]
struct PendingGrant {
    token: String,
    content_type: String,
    expires_at: DateTime<Utc>,
}

/// In-process blob store serving uploads and downloads through the board's
/// own `/api/blobs` routes.
pub struct LocalBlobStore {
    base_url: Url,
    grant_ttl: Duration,
    objects: RwLock<HashMap<String, Entry>>,
    grants: Mutex<HashMap<String, PendingGrant>>,
}

impl LocalBlobStore {
    /// Create a store whose links point at `config.public_base_url`.
    pub fn new(config: &BlobConfig) -> Result<Self, StorageError> {
        let base_url = Url::parse(&config.public_base_url).map_err(|e| {
            StorageError::Unavailable(format!("invalid public base URL: {e}"))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(StorageError::Unavailable(format!(
                "public base URL cannot carry paths: {base_url}"
            )));
        }

        Ok(Self {
            base_url,
            grant_ttl: config.upload_grant_ttl(),
            objects: RwLock::new(HashMap::new()),
            grants: Mutex::new(HashMap::new()),
        })
    }

    fn object_url(&self, key: &str) -> Result<Url, StorageError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| StorageError::Unavailable("base URL cannot carry paths".to_string()))?
            .pop_if_empty()
            .extend(["api", "blobs", key]);
        Ok(url)
    }

    /// Store `bytes` under `key` if `token` matches an unexpired grant.
    /// Grants are single use.
    pub async fn accept_upload(
        &self,
        key: &str,
        token: &str,
        bytes: Bytes,
    ) -> Result<(), StorageError> {
        let grant = {
            let mut grants = self.grants.lock().await;
            let valid = grants
                .get(key)
                .is_some_and(|grant| grant.token == token && grant.expires_at > Utc::now());
            if valid {
                grants.remove(key)
            } else {
                None
            }
        };
        let Some(grant) = grant else {
            debug!(key, "Upload rejected: no matching grant");
            return Err(StorageError::InvalidGrant(key.to_string()));
        };

        let size = bytes.len();
        self.objects.write().await.insert(
            key.to_string(),
            Entry {
                object: StoredObject {
                    content_type: grant.content_type,
                    bytes,
                },
                uploaded_at: Utc::now(),
                claimed: false,
            },
        );
        info!(key, size, "Blob stored");
        Ok(())
    }

    /// Read a stored object.
    pub async fn read(&self, key: &str) -> Result<StoredObject, StorageError> {
        self.objects
            .read()
            .await
            .get(key)
            .map(|entry| entry.object.clone())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    /// Whether an object exists.
    pub async fn contains(&self, key: &str) -> bool {
        self.objects.read().await.contains_key(key)
    }

    /// Number of stored objects no item has claimed yet.
    pub async fn unclaimed_count(&self) -> usize {
        self.objects
            .read()
            .await
            .values()
            .filter(|entry| !entry.claimed)
            .count()
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn issue_upload_grant(
        &self,
        file_name: &str,
        content_type: &str,
    ) -> Result<UploadGrant, StorageError> {
        let key = format!("{}-{}", Uuid::new_v4().simple(), sanitize_file_name(file_name));
        let token = Uuid::new_v4().simple().to_string();
        let ttl = chrono::Duration::from_std(self.grant_ttl)
            .map_err(|e| StorageError::Unavailable(format!("grant lifetime out of range: {e}")))?;
        let now = Utc::now();
        let expires_at = now + ttl;

        let mut upload_url = self.object_url(&key)?;
        upload_url.query_pairs_mut().append_pair("token", &token);
        let file_url = self.object_url(&key)?;

        {
            let mut grants = self.grants.lock().await;
            grants.retain(|_, grant| grant.expires_at > now);
            grants.insert(
                key.clone(),
                PendingGrant {
                    token,
                    content_type: content_type.to_string(),
                    expires_at,
                },
            );
        }

        debug!(key = %key, %expires_at, "Upload grant issued");
        Ok(UploadGrant {
            object_name: key,
            upload_url: upload_url.to_string(),
            file_url: file_url.to_string(),
            expires_at,
        })
    }

    async fn claim(&self, key: &str) -> Result<u64, StorageError> {
        let mut objects = self.objects.write().await;
        let entry = objects
            .get_mut(key)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        if entry.claimed {
            debug!(key, "Claim rejected: object already owned");
            return Err(StorageError::AlreadyClaimed(key.to_string()));
        }
        entry.claimed = true;
        Ok(entry.object.bytes.len() as u64)
    }

    async fn reclaim_unclaimed(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>, StorageError> {
        let mut objects = self.objects.write().await;
        let stale: Vec<String> = objects
            .iter()
            .filter(|(_, entry)| !entry.claimed && entry.uploaded_at < cutoff)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &stale {
            objects.remove(key);
            debug!(key = %key, "Unclaimed blob removed");
        }
        Ok(stale)
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.grants.lock().await.remove(key);
        if self.objects.write().await.remove(key).is_some() {
            debug!(key, "Blob deleted");
        }
        Ok(())
    }

    fn public_url(&self, key: &str) -> Result<String, StorageError> {
        Ok(self.object_url(key)?.to_string())
    }

    async fn ping(&self) -> Result<(), StorageError> {
        Ok(())
    }
}
