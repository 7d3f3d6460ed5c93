//! Derivative cache over the dedicated cache bucket.
//!
//! Every entry is stamped with the origin etag it was generated from
//! (`origin-etag` attribute). An entry may only be served after `is_valid`
//! confirms the stamp still matches the origin.

use crate::{
    models::{
        derivative::{CachedDerivative, DerivativeKey},
        metadata::{ATTR_ORIGIN_ETAG, ObjectMetadata},
    },
    services::{
        blob_store::BlobStore, invalidation::InvalidationManager, storage_service::StorageResult,
    },
};
use bytes::Bytes;
use std::sync::Arc;

#[derive(Clone)]
pub struct DerivativeCache {
    store: Arc<dyn BlobStore>,
    bucket: String,
    invalidation: InvalidationManager,
}

impl DerivativeCache {
    pub fn new(store: Arc<dyn BlobStore>, bucket: impl Into<String>) -> Self {
        let bucket = bucket.into();
        Self {
            invalidation: InvalidationManager::new(store.clone(), bucket.clone()),
            store,
            bucket,
        }
    }

    /// Fetch a cached derivative. A miss is `Ok(None)`, not an error.
    pub async fn lookup(&self, key: &DerivativeKey) -> StorageResult<Option<CachedDerivative>> {
        match self.store.get(&self.bucket, key.as_str()).await {
            Ok((stat, bytes)) => Ok(Some(CachedDerivative {
                origin_etag: stat.metadata.attribute(ATTR_ORIGIN_ETAG).map(str::to_string),
                content_type: stat.metadata.content_type,
                bytes,
            })),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// A derivative is valid iff its stamp equals the current origin etag.
    pub fn is_valid(stored: &CachedDerivative, current_origin_etag: &str) -> bool {
        stored.origin_etag.as_deref() == Some(current_origin_etag)
    }

    /// Write (or overwrite) a derivative stamped with `origin_etag`.
    pub async fn store(
        &self,
        key: &DerivativeKey,
        bytes: Bytes,
        content_type: &str,
        origin_etag: &str,
        owner_id: &str,
    ) -> StorageResult<()> {
        let metadata = ObjectMetadata::new(content_type, owner_id)
            .with_attribute(ATTR_ORIGIN_ETAG, origin_etag);
        self.store
            .put(&self.bucket, key.as_str(), bytes, metadata)
            .await?;
        Ok(())
    }

    /// Drop every derivative of `bucket/origin_id`; zero matches is a no-op.
    pub async fn invalidate_all(&self, bucket: &str, origin_id: &str) -> StorageResult<usize> {
        self.invalidation.invalidate(bucket, origin_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::asset::{Dimensions, ImageFormat},
        test_support::MemoryStore,
    };

    fn cache() -> (DerivativeCache, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::default());
        (DerivativeCache::new(store.clone(), "derivatives"), store)
    }

    fn key() -> DerivativeKey {
        DerivativeKey::build("avatars", "img", Some(ImageFormat::Webp), Dimensions::new(400, 400))
    }

    #[tokio::test]
    async fn miss_is_not_an_error() {
        let (cache, _) = cache();
        assert!(cache.lookup(&key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stamp_tracks_origin_token() {
        let (cache, _) = cache();
        cache
            .store(&key(), Bytes::from_static(b"v1"), "image/webp", "t1", "alice")
            .await
            .unwrap();

        let hit = cache.lookup(&key()).await.unwrap().unwrap();
        assert_eq!(&hit.bytes[..], b"v1");
        assert_eq!(hit.content_type, "image/webp");
        assert!(DerivativeCache::is_valid(&hit, "t1"));
        assert!(!DerivativeCache::is_valid(&hit, "t2"));
    }

    #[tokio::test]
    async fn store_overwrites() {
        let (cache, store) = cache();
        for (bytes, token) in [(&b"v1"[..], "t1"), (&b"v2"[..], "t2"), (&b"v2"[..], "t2")] {
            cache
                .store(&key(), Bytes::copy_from_slice(bytes), "image/webp", token, "alice")
                .await
                .unwrap();
        }
        let hit = cache.lookup(&key()).await.unwrap().unwrap();
        assert_eq!(&hit.bytes[..], b"v2");
        assert_eq!(hit.origin_etag.as_deref(), Some("t2"));
        assert_eq!(store.keys("derivatives").len(), 1);
    }

    #[tokio::test]
    async fn missing_stamp_is_invalid() {
        let (cache, store) = cache();
        store
            .put("derivatives", key().as_str(), Bytes::from_static(b"x"), ObjectMetadata::new("image/webp", "alice"))
            .await
            .unwrap();
        let hit = cache.lookup(&key()).await.unwrap().unwrap();
        assert!(!DerivativeCache::is_valid(&hit, "t1"));
    }

    #[tokio::test]
    async fn invalidate_all_clears_origin() {
        let (cache, store) = cache();
        cache
            .store(&key(), Bytes::from_static(b"v1"), "image/webp", "t1", "alice")
            .await
            .unwrap();
        assert_eq!(cache.invalidate_all("avatars", "img").await.unwrap(), 1);
        assert!(store.keys("derivatives").is_empty());
        assert_eq!(cache.invalidate_all("avatars", "img").await.unwrap(), 0);
    }
}
