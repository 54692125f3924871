// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Board mutations and reads.
//!
//! Every successful mutation is persisted first and only then announced
//! through the broadcast hub. Blob cleanup on delete and clear is best-effort.

use crate::blob::{BlobStore, UploadGrant};
use crate::error::{AppError, Result};
use crate::hub::BroadcastHub;
use crate::lifecycle::LifecycleManager;
use crate::limiter::{RateLimitResult, RateLimiter};
use crate::models::{BlobRef, ChangeEvent, ContentItem, ContentKind, ItemId, NewItem, Origin};
use crate::store::ContentStore;
use crate::validator::{UploadValidator, ValidationError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Inputs for a new board item.
#[derive(Debug, Clone, Default)]
pub struct CreateItem {
    pub kind: ContentKind,
    pub content: Option<String>,
    pub object_name: Option<String>,
    pub file_name: Option<String>,
}

/// Upload grant handed back to the client, with the kind the file will render as.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadTicket {
    #[serde(flatten)]
    pub grant: UploadGrant,
    #[serde(rename = "type")]
    pub kind: ContentKind,
}

/// Health of the storage collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageHealth {
    pub content_store: bool,
    pub blob_store: bool,
}

impl StorageHealth {
    pub fn is_healthy(&self) -> bool {
        self.content_store && self.blob_store
    }
}

/// Ties the content store, blob store and the three core components together.
pub struct BoardService {
    store: Arc<dyn ContentStore>,
    blobs: Arc<dyn BlobStore>,
    lifecycle: Arc<LifecycleManager>,
    limiter: Arc<RateLimiter>,
    hub: BroadcastHub,
    validator: UploadValidator,
}

impl BoardService {
    pub fn new(
        store: Arc<dyn ContentStore>,
        blobs: Arc<dyn BlobStore>,
        lifecycle: Arc<LifecycleManager>,
        limiter: Arc<RateLimiter>,
        hub: BroadcastHub,
        validator: UploadValidator,
    ) -> Self {
        Self {
            store,
            blobs,
            lifecycle,
            limiter,
            hub,
            validator,
        }
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleManager> {
        &self.lifecycle
    }

    pub fn hub(&self) -> &BroadcastHub {
        &self.hub
    }

    /// Admit an upload for `identity` and issue a write grant.
    ///
    /// The limiter is consulted before anything else so rejected callers
    /// never reach the blob store.
    pub async fn request_upload(
        &self,
        identity: IpAddr,
        file_name: Option<&str>,
        file_type: Option<&str>,
    ) -> Result<UploadTicket> {
        if let RateLimitResult::Limited { reason } = self.limiter.check_and_admit(identity).await {
            info!(ip = %identity, tier = reason.tier(), "Upload denied");
            return Err(AppError::RateLimited(reason));
        }

        let kind = self.validator.validate_upload(file_name, file_type)?;
        let file_name = file_name.unwrap_or_default();
        let file_type = file_type.unwrap_or_default();

        let grant = self.blobs.issue_upload_grant(file_name, file_type).await?;
        debug!(ip = %identity, key = %grant.object_name, %kind, "Upload admitted");
        Ok(UploadTicket { grant, kind })
    }

    /// Validate, persist and announce a new item.
    pub async fn create_item(
        &self,
        request: CreateItem,
        origin: Origin,
        now: DateTime<Utc>,
    ) -> Result<ContentItem> {
        self.validator.validate_item(
            request.kind,
            request.content.as_deref(),
            request.object_name.as_deref(),
        )?;

        let blob = if request.kind.is_blob_backed() {
            let key = request
                .object_name
                .ok_or(ValidationError::MissingParameter("objectName"))?;
            Some(self.attach_blob(key, request.file_name).await?)
        } else {
            None
        };
        let content = request.content.filter(|text| !text.trim().is_empty());

        let owned_key = blob.as_ref().map(|blob| blob.object_name.clone());
        let created = self
            .store
            .create(NewItem {
                kind: request.kind,
                content,
                blob,
                created_at: now,
                expires_at: self.lifecycle.expiry_for(now),
                origin,
            })
            .await;
        let item = match created {
            Ok(item) => item,
            Err(e) => {
                // The claimed object would otherwise have no owner
                if let Some(key) = owned_key {
                    self.delete_blob(&key).await;
                }
                return Err(e.into());
            }
        };

        info!(id = item.id, kind = %item.kind, expires_at = %item.expires_at, "Card created");
        self.hub.broadcast(ChangeEvent::NewCard(item.clone()));
        Ok(item)
    }

    async fn attach_blob(&self, key: String, file_name: Option<String>) -> Result<BlobRef> {
        let file_url = self.blobs.public_url(&key)?;
        let size = self.blobs.claim(&key).await?;
        if let Err(e) = self.validator.validate_file_size(size) {
            self.delete_blob(&key).await;
            return Err(e.into());
        }

        let file_name = file_name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| display_name(&key).to_string());

        Ok(BlobRef {
            object_name: key,
            file_name,
            file_size: size,
            file_url,
        })
    }

    /// Delete one item and its blob, then announce the deletion.
    pub async fn delete_item(&self, id: ItemId) -> Result<()> {
        let item = self.store.get(id).await?.ok_or(AppError::NotFound(id))?;
        if let Some(blob) = &item.blob {
            self.delete_blob(&blob.object_name).await;
        }

        // A concurrent delete may have won the race
        if self.store.delete(id).await?.is_none() {
            return Err(AppError::NotFound(id));
        }

        info!(id, "Card deleted");
        self.hub.broadcast(ChangeEvent::DeleteCard(id));
        Ok(())
    }

    /// Delete every item and their blobs, then announce the clear.
    pub async fn clear(&self) -> Result<usize> {
        let removed = self.store.delete_all().await?;
        for blob in removed.iter().filter_map(|item| item.blob.as_ref()) {
            self.delete_blob(&blob.object_name).await;
        }

        info!(count = removed.len(), "Board cleared");
        self.hub.broadcast(ChangeEvent::ClearCards);
        Ok(removed.len())
    }

    /// Items visible at `now`, newest first.
    pub async fn list_active(&self, now: DateTime<Utc>) -> Result<Vec<ContentItem>> {
        let mut items = self.store.list_active(now).await?;
        items.retain(|item| LifecycleManager::is_active(item, now));
        Ok(items)
    }

    pub fn ttl_minutes(&self) -> u32 {
        self.lifecycle.ttl_minutes()
    }

    pub fn set_ttl_minutes(&self, minutes: u32) -> Result<()> {
        Ok(self.lifecycle.set_ttl_minutes(minutes)?)
    }

    /// Ping both stores.
    pub async fn storage_health(&self) -> StorageHealth {
        let (content, blob) = tokio::join!(self.store.ping(), self.blobs.ping());
        if let Err(e) = &content {
            warn!(error = %e, "Content store health check failed");
        }
        if let Err(e) = &blob {
            warn!(error = %e, "Blob store health check failed");
        }
        StorageHealth {
            content_store: content.is_ok(),
            blob_store: blob.is_ok(),
        }
    }

    async fn delete_blob(&self, key: &str) {
        if let Err(e) = self.blobs.delete(key).await {
            warn!(key, error = %e, "Blob delete failed, object may be orphaned");
        }
    }
}

/// File name encoded in an object key, without the unique prefix.
fn display_name(key: &str) -> &str {
    key.split_once('-').map_or(key, |(_, name)| name)
}
