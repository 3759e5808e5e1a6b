//! Blob storage for staged inputs and generated results.
//!
//! Both tiers sit on a [`BlobStore`] backend. The adapters own key
//! generation: staged inputs live under `staged/`, results under
//! `generated/<session>/`, so the two never collide on a shared medium.

mod fs;
mod memory;

pub use fs::FsBlobStore;
pub use memory::MemoryBlobStore;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::session::SessionKey;

pub const STAGED_PREFIX: &str = "staged/";
pub const GENERATED_PREFIX: &str = "generated/";

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("blob not found: {0}")]
    NotFound(String),

    #[error("storage io failed for {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt blob metadata for {key}: {source}")]
    Metadata {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

pub type StorageResult<T> = Result<T, StorageError>;

/// A stored blob plus the metadata kept alongside it
#[derive(Clone, Debug)]
pub struct StoredBlob {
    pub key: String,
    pub bytes: Bytes,
    pub content_type: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Sidecar metadata, also what list endpoints expose
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlobMeta {
    pub key: String,
    pub content_type: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Key-addressed byte storage backend.
///
/// `delete` is idempotent: removing an absent key is not an error.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, blob: StoredBlob) -> StorageResult<()>;
    async fn get(&self, key: &str) -> StorageResult<StoredBlob>;
    async fn delete(&self, key: &str) -> StorageResult<()>;
    async fn contains(&self, key: &str) -> StorageResult<bool>;
}

//----------------
// STAGING STORE
//----------------

/// Short-lived inputs awaiting one generation.
/// put/get/delete only, staged bytes are never updated in place.
#[derive(Clone)]
pub struct StagingStore {
    backend: Arc<dyn BlobStore>,
}

impl StagingStore {
    pub fn new(backend: Arc<dyn BlobStore>) -> Self {
        Self { backend }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBlobStore::new()))
    }

    /// Store bytes under a fresh unguessable key and return the key
    pub async fn put(&self, bytes: Bytes) -> StorageResult<String> {
        let key = format!("{}{}", STAGED_PREFIX, Uuid::new_v4());
        let len = bytes.len();
        self.backend
            .put(StoredBlob {
                key: key.clone(),
                bytes,
                content_type: None,
                created_at: Utc::now(),
            })
            .await?;
        tracing::debug!(key = %key, bytes = len, "staged input stored");
        Ok(key)
    }

    pub async fn get(&self, key: &str) -> StorageResult<Bytes> {
        Ok(self.backend.get(key).await?.bytes)
    }

    pub async fn delete(&self, key: &str) -> StorageResult<()> {
        self.backend.delete(key).await
    }

    pub async fn contains(&self, key: &str) -> StorageResult<bool> {
        self.backend.contains(key).await
    }
}

//----------------
// RESULT STORE
//----------------

/// Durable, write-once storage for generated images
#[derive(Clone)]
pub struct ResultStore {
    backend: Arc<dyn BlobStore>,
}

impl ResultStore {
    pub fn new(backend: Arc<dyn BlobStore>) -> Self {
        Self { backend }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBlobStore::new()))
    }

    /// Write a result under `generated/<session>/<random>` and return it
    pub async fn put(
        &self,
        session: &SessionKey,
        bytes: Bytes,
        content_type: &str,
    ) -> StorageResult<StoredBlob> {
        let blob = StoredBlob {
            key: format!("{}{}/{}", GENERATED_PREFIX, session, Uuid::new_v4()),
            bytes,
            content_type: Some(content_type.to_string()),
            created_at: Utc::now(),
        };
        self.backend.put(blob.clone()).await?;
        Ok(blob)
    }

    pub async fn get(&self, key: &str) -> StorageResult<StoredBlob> {
        if !key.starts_with(GENERATED_PREFIX) {
            return Err(StorageError::NotFound(key.to_string()));
        }
        self.backend.get(key).await
    }

    pub async fn delete(&self, key: &str) -> StorageResult<()> {
        self.backend.delete(key).await
    }

    pub async fn contains(&self, key: &str) -> StorageResult<bool> {
        self.backend.contains(key).await
    }
}
