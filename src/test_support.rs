//! Fakes shared by the unit tests.

use crate::{
    models::{
        asset::{Dimensions, ImageFormat},
        metadata::ObjectMetadata,
        object::ObjectStat,
    },
    services::{
        blob_store::BlobStore,
        storage_service::{StorageError, StorageResult},
        transform::{ImageTransformer, TransformResult, Transformed, Transformer},
    },
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use dashmap::DashMap;
use image::{ImageBuffer, Rgba};
use std::{
    io::{self, Cursor},
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};

/// In-memory `BlobStore` keyed by `(bucket, key)`.
#[derive(Default)]
pub struct MemoryStore {
    objects: DashMap<(String, String), (ObjectStat, Bytes)>,
    fail_deletes: AtomicBool,
}

impl MemoryStore {
    /// Make every subsequent `delete_many` fail.
    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Sorted keys currently stored in `bucket`.
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .objects
            .iter()
            .filter(|entry| entry.key().0 == bucket)
            .map(|entry| entry.key().1.clone())
            .collect();
        keys.sort();
        keys
    }

    fn not_found(bucket: &str, key: &str) -> StorageError {
        StorageError::ObjectNotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    }
}

#[async_trait]
impl BlobStore for MemoryStore {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        bytes: Bytes,
        metadata: ObjectMetadata,
    ) -> StorageResult<ObjectStat> {
        let stat = ObjectStat {
            key: key.to_string(),
            size_bytes: bytes.len() as i64,
            etag: format!("{:x}", md5::compute(&bytes)),
            last_modified: Utc::now(),
            metadata,
        };
        self.objects
            .insert((bucket.to_string(), key.to_string()), (stat.clone(), bytes));
        Ok(stat)
    }

    async fn get(&self, bucket: &str, key: &str) -> StorageResult<(ObjectStat, Bytes)> {
        self.objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Self::not_found(bucket, key))
    }

    async fn stat(&self, bucket: &str, key: &str) -> StorageResult<ObjectStat> {
        self.get(bucket, key).await.map(|(stat, _)| stat)
    }

    async fn list_by_prefix(&self, bucket: &str, prefix: &str) -> StorageResult<Vec<String>> {
        Ok(self
            .keys(bucket)
            .into_iter()
            .filter(|key| key.starts_with(prefix))
            .collect())
    }

    async fn delete_many(&self, bucket: &str, keys: &[String]) -> StorageResult<usize> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(StorageError::Io(io::Error::other("injected delete failure")));
        }
        Ok(keys
            .iter()
            .filter(|key| {
                self.objects
                    .remove(&(bucket.to_string(), key.to_string()))
                    .is_some()
            })
            .count())
    }
}

/// `ImageTransformer` that counts `transform` calls.
#[derive(Default)]
pub struct CountingTransformer {
    inner: ImageTransformer,
    calls: AtomicUsize,
}

impl CountingTransformer {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transformer for CountingTransformer {
    async fn transform(
        &self,
        source: Bytes,
        format: Option<ImageFormat>,
        dimensions: Option<Dimensions>,
    ) -> TransformResult<Transformed> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.transform(source, format, dimensions).await
    }

    async fn probe(&self, source: Bytes) -> Option<Dimensions> {
        self.inner.probe(source).await
    }
}

/// A PNG of the given size with a gradient so different sizes differ in bytes.
pub fn png_bytes(width: u32, height: u32) -> Bytes {
    png_with_seed(width, height, 0)
}

pub fn png_with_seed(width: u32, height: u32, seed: u8) -> Bytes {
    let image: ImageBuffer<Rgba<u8>, Vec<u8>> = ImageBuffer::from_fn(width, height, |x, y| {
        Rgba([(x % 256) as u8, (y % 256) as u8, seed, 255])
    });
    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, image::ImageFormat::Png)
        .expect("encode test png");
    Bytes::from(out.into_inner())
}
