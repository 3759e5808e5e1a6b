use async_trait::async_trait;
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::{BlobMeta, BlobStore, StorageError, StorageResult, StoredBlob};
use crate::utils::security::hash_key;

/// Directory-backed store.
/// Each blob is `<sha256(key)>.bin` plus a `<sha256(key)>.json` sidecar.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Open (and create if needed) the store directory
    pub async fn open(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|source| StorageError::Io {
                key: root.display().to_string(),
                source,
            })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn paths(&self, key: &str) -> (PathBuf, PathBuf) {
        let name = hash_key(key);
        (
            self.root.join(format!("{}.bin", name)),
            self.root.join(format!("{}.json", name)),
        )
    }
}

fn io_err(key: &str) -> impl FnOnce(std::io::Error) -> StorageError + '_ {
    move |source| {
        if source.kind() == ErrorKind::NotFound {
            StorageError::NotFound(key.to_string())
        } else {
            StorageError::Io {
                key: key.to_string(),
                source,
            }
        }
    }
}

// Write to a temp name then rename so readers never see a partial file
async fn write_atomic(path: &Path, data: &[u8], key: &str) -> StorageResult<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, data).await.map_err(io_err(key))?;
    tokio::fs::rename(&tmp, path).await.map_err(io_err(key))
}

async fn remove_if_present(path: &Path, key: &str) -> StorageResult<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(source) => Err(StorageError::Io {
            key: key.to_string(),
            source,
        }),
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, blob: StoredBlob) -> StorageResult<()> {
        let (data_path, meta_path) = self.paths(&blob.key);
        let meta = BlobMeta {
            key: blob.key.clone(),
            content_type: blob.content_type.clone(),
            created_at: blob.created_at,
        };
        let meta_json = serde_json::to_vec(&meta).map_err(|source| StorageError::Metadata {
            key: blob.key.clone(),
            source,
        })?;

        // data first: a sidecar is only visible once its bytes are
        write_atomic(&data_path, &blob.bytes, &blob.key).await?;
        write_atomic(&meta_path, &meta_json, &blob.key).await
    }

    async fn get(&self, key: &str) -> StorageResult<StoredBlob> {
        let (data_path, meta_path) = self.paths(key);
        let meta_raw = tokio::fs::read(&meta_path).await.map_err(io_err(key))?;
        let meta: BlobMeta =
            serde_json::from_slice(&meta_raw).map_err(|source| StorageError::Metadata {
                key: key.to_string(),
                source,
            })?;
        let bytes = tokio::fs::read(&data_path).await.map_err(io_err(key))?;

        Ok(StoredBlob {
            key: meta.key,
            bytes: Bytes::from(bytes),
            content_type: meta.content_type,
            created_at: meta.created_at,
        })
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let (data_path, meta_path) = self.paths(key);
        remove_if_present(&meta_path, key).await?;
        remove_if_present(&data_path, key).await
    }

    async fn contains(&self, key: &str) -> StorageResult<bool> {
        let (_, meta_path) = self.paths(key);
        tokio::fs::try_exists(&meta_path).await.map_err(io_err(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    fn blob(key: &str, bytes: &'static [u8]) -> StoredBlob {
        StoredBlob {
            key: key.to_string(),
            bytes: Bytes::from_static(bytes),
            content_type: Some("image/jpeg".to_string()),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn put_get_delete() {
        let temp_dir = TempDir::new().unwrap();
        let store = FsBlobStore::open(temp_dir.path().join("results"))
            .await
            .unwrap();

        store.put(blob("generated/s/1", b"jpegdata")).await.unwrap();
        assert!(store.contains("generated/s/1").await.unwrap());

        let fetched = store.get("generated/s/1").await.unwrap();
        assert_eq!(fetched.key, "generated/s/1");
        assert_eq!(fetched.bytes, Bytes::from_static(b"jpegdata"));
        assert_eq!(fetched.content_type.as_deref(), Some("image/jpeg"));

        store.delete("generated/s/1").await.unwrap();
        store.delete("generated/s/1").await.unwrap();
        assert!(!store.contains("generated/s/1").await.unwrap());
        assert!(matches!(
            store.get("generated/s/1").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn keys_map_to_flat_hashed_files() {
        let temp_dir = TempDir::new().unwrap();
        let store = FsBlobStore::open(temp_dir.path()).await.unwrap();

        store.put(blob("generated/../../escape", b"x")).await.unwrap();

        let names: Vec<String> = std::fs::read_dir(store.root())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names.len(), 2);
        assert!(names.iter().all(|n| n.len() == 64 + 4 || n.len() == 64 + 5));
    }
}
