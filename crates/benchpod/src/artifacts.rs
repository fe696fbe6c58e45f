//! Object storage for run artifacts.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

/// Errors from an artifact store.
#[derive(Debug, Error)]
pub enum ArtifactStoreError {
    /// No object under this key.
    #[error("Artifact not found: {0}")]
    NotFound(String),

    /// Key is not usable.
    #[error("Invalid artifact key: {0}")]
    InvalidKey(String),

    /// Backend rejected the operation.
    #[error("Artifact backend error: {0}")]
    Backend(String),
}

/// Object key for a run artifact: `runs/<id>/<name>`.
#[must_use]
pub fn artifact_key(run_id: &Uuid, name: &str) -> String {
    format!("runs/{run_id}/{name}")
}

/// Put-by-key, read-by-presigned-URL object store.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Store `bytes` under `key`, replacing any previous object.
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), ArtifactStoreError>;

    /// Time-limited read URL for `key`.
    async fn presigned_url(&self, key: &str, ttl: Duration) -> Result<String, ArtifactStoreError>;
}

/// In-process artifact store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryArtifactStore {
    objects: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl InMemoryArtifactStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored bytes for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Number of stored objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), ArtifactStoreError> {
        if key.trim().is_empty() {
            return Err(ArtifactStoreError::InvalidKey(key.to_string()));
        }
        self.objects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), bytes);
        Ok(())
    }

    async fn presigned_url(&self, key: &str, ttl: Duration) -> Result<String, ArtifactStoreError> {
        if self.get(key).is_none() {
            return Err(ArtifactStoreError::NotFound(key.to_string()));
        }
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| ArtifactStoreError::Backend(e.to_string()))?;
        let expires = Utc::now()
            .checked_add_signed(ttl)
            .ok_or_else(|| ArtifactStoreError::Backend(format!("ttl out of range: {ttl}")))?
            .timestamp();
        Ok(format!("memory://{key}?expires={expires}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_then_presign() {
        let store = InMemoryArtifactStore::new();
        let id = Uuid::new_v4();
        let key = artifact_key(&id, "result.json");
        assert_eq!(key, format!("runs/{id}/result.json"));

        store.put(&key, b"{}".to_vec()).await.unwrap();
        assert_eq!(store.get(&key).unwrap(), b"{}");

        let url = store.presigned_url(&key, Duration::from_secs(60)).await.unwrap();
        assert!(url.starts_with(&format!("memory://{key}?expires=")));
    }

    #[tokio::test]
    async fn test_presign_rejects_out_of_range_ttl() {
        let store = InMemoryArtifactStore::new();
        store.put("runs/x/result.json", Vec::new()).await.unwrap();

        for ttl in [Duration::MAX, Duration::from_secs(365 * 24 * 3600 * 1_000_000)] {
            let err = store
                .presigned_url("runs/x/result.json", ttl)
                .await
                .unwrap_err();
            assert!(matches!(err, ArtifactStoreError::Backend(_)));
        }
    }

    #[tokio::test]
    async fn test_presign_missing_key() {
        let store = InMemoryArtifactStore::new();
        let err = store
            .presigned_url("runs/x/result.json", Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(err, ArtifactStoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_put_rejects_blank_key() {
        let store = InMemoryArtifactStore::new();
        assert!(store.put(" ", Vec::new()).await.is_err());
        assert!(store.is_empty());
    }
}
