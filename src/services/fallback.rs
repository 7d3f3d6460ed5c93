//! Substitute assets for missing origins in the fallback-eligible bucket.
//!
//! Defaults live in an internal bucket as `default.<format>`; they are
//! provisioned at startup from a directory of files named the same way.

use crate::{
    models::{
        asset::ImageFormat,
        metadata::ObjectMetadata,
        object::ObjectStat,
    },
    services::{blob_store::BlobStore, storage_service::StorageResult},
};
use bytes::Bytes;
use std::{path::Path, str::FromStr, sync::Arc};
use tokio::fs;
use tracing::{debug, info, warn};

/// Format served when the request does not name one.
pub const DEFAULT_FALLBACK_FORMAT: ImageFormat = ImageFormat::Webp;

const DEFAULT_STEM: &str = "default";
const SYSTEM_OWNER: &str = "system";

/// Only consulted for the fallback-eligible bucket kind; other buckets report
/// a plain not-found without reaching this resolver.
#[derive(Clone)]
pub struct FallbackResolver {
    store: Arc<dyn BlobStore>,
    defaults_bucket: String,
}

impl FallbackResolver {
    pub fn new(store: Arc<dyn BlobStore>, defaults_bucket: impl Into<String>) -> Self {
        Self {
            store,
            defaults_bucket: defaults_bucket.into(),
        }
    }

    pub fn default_key(format: ImageFormat) -> String {
        format!("{DEFAULT_STEM}.{}", format.as_str())
    }

    /// Look up the default asset for `format`. `Ok(None)` means the
    /// deployment has no default in that format.
    pub async fn resolve(
        &self,
        format: Option<ImageFormat>,
    ) -> StorageResult<Option<(ObjectStat, Bytes)>> {
        let key = Self::default_key(format.unwrap_or(DEFAULT_FALLBACK_FORMAT));
        match self.store.get(&self.defaults_bucket, &key).await {
            Ok(found) => {
                debug!(key = %key, "serving fallback asset");
                Ok(Some(found))
            }
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Load every `default.<format>` file in `dir` into the defaults bucket.
    ///
    /// Files whose extension is not a known format are skipped.
    pub async fn provision_from_dir(&self, dir: &Path) -> anyhow::Result<usize> {
        let mut entries = fs::read_dir(dir).await?;
        let mut provisioned = 0;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some((stem, ext)) = name.to_str().and_then(|n| n.rsplit_once('.')) else {
                continue;
            };
            if stem != DEFAULT_STEM {
                continue;
            }
            let Ok(format) = ImageFormat::from_str(ext) else {
                warn!("skipping fallback file {:?}: unknown format", name);
                continue;
            };

            let bytes = Bytes::from(fs::read(entry.path()).await?);
            let metadata = ObjectMetadata::new(format.mime_type(), SYSTEM_OWNER);
            self.store
                .put(&self.defaults_bucket, &Self::default_key(format), bytes, metadata)
                .await?;
            info!("provisioned fallback asset for {}", format);
            provisioned += 1;
        }
        Ok(provisioned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MemoryStore;

    fn resolver(store: Arc<MemoryStore>) -> FallbackResolver {
        FallbackResolver::new(store, "defaults")
    }

    #[tokio::test]
    async fn resolves_requested_or_default_format() {
        let store = Arc::new(MemoryStore::default());
        store
            .put("defaults", "default.webp", Bytes::from_static(b"webp"), ObjectMetadata::new("image/webp", "system"))
            .await
            .unwrap();
        let resolver = resolver(store);

        let (stat, bytes) = resolver.resolve(Some(ImageFormat::Webp)).await.unwrap().unwrap();
        assert_eq!(&bytes[..], b"webp");
        assert_eq!(stat.content_type(), "image/webp");
        assert!(resolver.resolve(None).await.unwrap().is_some());
        assert!(resolver.resolve(Some(ImageFormat::Png)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn provisions_defaults_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("default.webp"), b"w").unwrap();
        std::fs::write(dir.path().join("default.jpg"), b"j").unwrap();
        std::fs::write(dir.path().join("default.bmp"), b"b").unwrap();
        std::fs::write(dir.path().join("readme.txt"), b"r").unwrap();

        let store = Arc::new(MemoryStore::default());
        let resolver = resolver(store.clone());
        assert_eq!(resolver.provision_from_dir(dir.path()).await.unwrap(), 2);
        assert_eq!(
            store.keys("defaults"),
            vec!["default.jpeg".to_string(), "default.webp".to_string()]
        );
    }
}
