//! The blob-storage seam consumed by the asset pipeline.
//!
//! `StorageService` is the production implementation; tests swap in the
//! in-memory store from `crate::test_support`.

use crate::{
    models::{metadata::ObjectMetadata, object::ObjectStat},
    services::storage_service::StorageResult,
};
use async_trait::async_trait;
use bytes::Bytes;

#[async_trait]
pub trait BlobStore: Send + Sync + 'static {
    /// Write `bytes` under `bucket/key`, replacing any previous object.
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        bytes: Bytes,
        metadata: ObjectMetadata,
    ) -> StorageResult<ObjectStat>;

    /// Read an object's metadata and payload.
    async fn get(&self, bucket: &str, key: &str) -> StorageResult<(ObjectStat, Bytes)>;

    /// Read an object's metadata only.
    async fn stat(&self, bucket: &str, key: &str) -> StorageResult<ObjectStat>;

    /// Keys in `bucket` starting with `prefix`, in lexicographic order.
    async fn list_by_prefix(&self, bucket: &str, prefix: &str) -> StorageResult<Vec<String>>;

    /// Delete every listed key. Missing keys are skipped; returns how many
    /// objects were removed.
    async fn delete_many(&self, bucket: &str, keys: &[String]) -> StorageResult<usize>;
}
