use async_trait::async_trait;
use dashmap::DashMap;

use super::{BlobStore, StorageError, StorageResult, StoredBlob};

/// In-process backend, the default for both tiers
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: DashMap<String, StoredBlob>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, blob: StoredBlob) -> StorageResult<()> {
        self.blobs.insert(blob.key.clone(), blob);
        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<StoredBlob> {
        self.blobs
            .get(key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.blobs.remove(key);
        Ok(())
    }

    async fn contains(&self, key: &str) -> StorageResult<bool> {
        Ok(self.blobs.contains_key(key))
    }
}
