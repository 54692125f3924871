// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Content record storage.
//!
//! [`ContentStore`] is the contract the board needs from a record store;
//! [`MemoryContentStore`] keeps records in process for single-instance
//! deployments and tests.

use crate::error::StorageError;
use crate::models::{ContentItem, ItemId, NewItem};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// Record store operations used by the board.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Persist a new item and return it with its assigned id
    async fn create(&self, item: NewItem) -> Result<ContentItem, StorageError>;

    /// Get item by id
    async fn get(&self, id: ItemId) -> Result<Option<ContentItem>, StorageError>;

    /// Delete item by id, returning it if it existed
    async fn delete(&self, id: ItemId) -> Result<Option<ContentItem>, StorageError>;

    /// Delete every item, returning what was removed
    async fn delete_all(&self) -> Result<Vec<ContentItem>, StorageError>;

    /// Items with `expires_at > now`, newest first
    async fn list_active(&self, now: DateTime<Utc>) -> Result<Vec<ContentItem>, StorageError>;

    /// Items with `expires_at < now`
    async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<ContentItem>, StorageError>;

    /// Delete a batch of items, returning how many existed
    async fn delete_many(&self, ids: &[ItemId]) -> Result<u64, StorageError>;

    /// Check the store is reachable
    async fn ping(&self) -> Result<(), StorageError>;
}

#[derive(Default)]
struct Records {
    next_id: ItemId,
    items: BTreeMap<ItemId, ContentItem>,
}

/// In-process content store.
#[derive(Default)]
pub struct MemoryContentStore {
    records: RwLock<Records>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records, expired or not.
    pub async fn len(&self) -> usize {
        self.records.read().await.items.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn create(&self, item: NewItem) -> Result<ContentItem, StorageError> {
        let mut records = self.records.write().await;
        records.next_id += 1;
        let item = item.into_item(records.next_id);
        records.items.insert(item.id, item.clone());
        Ok(item)
    }

    async fn get(&self, id: ItemId) -> Result<Option<ContentItem>, StorageError> {
        Ok(self.records.read().await.items.get(&id).cloned())
    }

    async fn delete(&self, id: ItemId) -> Result<Option<ContentItem>, StorageError> {
        Ok(self.records.write().await.items.remove(&id))
    }

    async fn delete_all(&self) -> Result<Vec<ContentItem>, StorageError> {
        let mut records = self.records.write().await;
        Ok(std::mem::take(&mut records.items).into_values().collect())
    }

    async fn list_active(&self, now: DateTime<Utc>) -> Result<Vec<ContentItem>, StorageError> {
        let records = self.records.read().await;
        let mut items: Vec<ContentItem> = records
            .items
            .values()
            .filter(|item| item.is_active(now))
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(items)
    }

    async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<ContentItem>, StorageError> {
        let records = self.records.read().await;
        Ok(records
            .items
            .values()
            .filter(|item| item.expires_at < now)
            .cloned()
            .collect())
    }

    async fn delete_many(&self, ids: &[ItemId]) -> Result<u64, StorageError> {
        let mut records = self.records.write().await;
        let removed = ids
            .iter()
            .filter(|id| records.items.remove(*id).is_some())
            .count();
        Ok(removed as u64)
    }

    async fn ping(&self) -> Result<(), StorageError> {
        Ok(())
    }
}
