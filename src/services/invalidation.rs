//! Bulk removal of an origin's derivatives.

use crate::{
    models::derivative::DerivativeKey,
    services::{blob_store::BlobStore, storage_service::StorageResult},
};
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct InvalidationManager {
    store: Arc<dyn BlobStore>,
    cache_bucket: String,
}

impl InvalidationManager {
    pub fn new(store: Arc<dyn BlobStore>, cache_bucket: impl Into<String>) -> Self {
        Self {
            store,
            cache_bucket: cache_bucket.into(),
        }
    }

    /// Delete every derivative whose key starts with `{bucket}/{origin_id}/`.
    ///
    /// Returns the number of removed derivatives; an origin without
    /// derivatives is a no-op returning `0`.
    pub async fn invalidate(&self, bucket: &str, origin_id: &str) -> StorageResult<usize> {
        let prefix = DerivativeKey::prefix_for(bucket, origin_id);
        let keys = self
            .store
            .list_by_prefix(&self.cache_bucket, &prefix)
            .await?;
        if keys.is_empty() {
            debug!(bucket, origin_id, "no derivatives to invalidate");
            return Ok(0);
        }

        let removed = self.store.delete_many(&self.cache_bucket, &keys).await?;
        debug!(bucket, origin_id, removed, "invalidated derivatives");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{models::metadata::ObjectMetadata, test_support::MemoryStore};
    use bytes::Bytes;

    async fn seed(store: &MemoryStore, keys: &[&str]) {
        for key in keys {
            store
                .put("derivatives", key, Bytes::from_static(b"d"), ObjectMetadata::new("image/png", "alice"))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn removes_only_the_origin_prefix() {
        let store = Arc::new(MemoryStore::default());
        seed(
            &store,
            &["b/x/png/full", "b/x/webp/10x10", "b/xy/png/full", "c/x/png/full"],
        )
        .await;
        let manager = InvalidationManager::new(store.clone(), "derivatives");

        assert_eq!(manager.invalidate("b", "x").await.unwrap(), 2);
        assert_eq!(
            store.keys("derivatives"),
            vec!["b/xy/png/full".to_string(), "c/x/png/full".to_string()]
        );
    }

    #[tokio::test]
    async fn zero_matches_is_a_noop() {
        let store = Arc::new(MemoryStore::default());
        let manager = InvalidationManager::new(store.clone(), "derivatives");
        assert_eq!(manager.invalidate("b", "missing").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn backend_failures_surface() {
        let store = Arc::new(MemoryStore::default());
        seed(&store, &["b/x/png/full"]).await;
        store.fail_deletes(true);
        let manager = InvalidationManager::new(store.clone(), "derivatives");
        assert!(manager.invalidate("b", "x").await.is_err());
    }
}
