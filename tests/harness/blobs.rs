// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: Apache-2.0

//! Blob store wrapper that records deletes and can simulate an outage.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ephemeral_board::blob::{BlobStore, LocalBlobStore, UploadGrant};
use ephemeral_board::error::StorageError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

pub struct RecordingBlobStore {
    inner: Arc<LocalBlobStore>,
    deletes: Mutex<Vec<String>>,
    failing: AtomicBool,
}

impl RecordingBlobStore {
    pub fn new(inner: Arc<LocalBlobStore>) -> Self {
        Self {
            inner,
            deletes: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
        }
    }

    /// Keys passed to `delete`, in call order, including failed attempts.
    pub fn deletes(&self) -> Vec<String> {
        self.deletes.lock().unwrap().clone()
    }

    /// Make every delete and ping fail until switched back.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("simulated outage".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl BlobStore for RecordingBlobStore {
    async fn issue_upload_grant(
        &self,
        file_name: &str,
        content_type: &str,
    ) -> Result<UploadGrant, StorageError> {
        self.inner.issue_upload_grant(file_name, content_type).await
    }

    async fn claim(&self, key: &str) -> Result<u64, StorageError> {
        self.inner.claim(key).await
    }

    async fn reclaim_unclaimed(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>, StorageError> {
        self.check()?;
        self.inner.reclaim_unclaimed(cutoff).await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.deletes.lock().unwrap().push(key.to_string());
        self.check()?;
        self.inner.delete(key).await
    }

    fn public_url(&self, key: &str) -> Result<String, StorageError> {
        self.inner.public_url(key)
    }

    async fn ping(&self) -> Result<(), StorageError> {
        self.check()?;
        self.inner.ping().await
    }
}
