//! AssetService: the read / upload / delete flows over origin assets and
//! their cached derivatives.
//!
//! A read resolves the origin's metadata, asks the necessity resolver whether
//! a transform is needed, and then either streams the origin verbatim or goes
//! through the derivative cache: a valid entry is served, a stale one is
//! invalidated and regenerated, a missing one is generated. Missing origins in
//! the fallback-eligible bucket are replaced by a provisioned default.

use crate::{
    config::AssetSettings,
    models::{
        asset::{Dimensions, ImageFormat, OriginAsset, is_image_content_type},
        bucket::BucketKind,
        derivative::{CachedDerivative, DerivativeKey},
        metadata::{ATTR_HEIGHT, ATTR_WIDTH, ObjectMetadata},
    },
    services::{
        blob_store::BlobStore,
        derivative_cache::DerivativeCache,
        fallback::FallbackResolver,
        necessity::{self, Decision},
        storage_service::StorageError,
        transform::{TransformError, Transformer},
    },
};
use bytes::Bytes;
use std::{str::FromStr, sync::Arc};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

const MAX_ASSET_ID_LEN: usize = 255;
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Error)]
pub enum AssetError {
    #[error("bucket `{0}` is not available")]
    InvalidBucket(String),
    #[error("invalid asset id")]
    InvalidId,
    #[error("unsupported image type `{0}`")]
    InvalidFormat(String),
    #[error("request body is empty")]
    EmptyBody,
    #[error("asset `{id}` not found in bucket `{bucket}`")]
    NotFound { bucket: String, id: String },
    #[error("asset `{id}` not found in bucket `{bucket}` and no fallback is available")]
    NoFallback { bucket: String, id: String },
    #[error("asset `{id}` already exists in bucket `{bucket}`")]
    AlreadyExists { bucket: String, id: String },
    #[error("only the owner may modify this asset")]
    NotOwner,
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Transform(#[from] TransformError),
}

pub type AssetResult<T> = Result<T, AssetError>;

/// Normalized `?type=` and `?size=` parameters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadRequest {
    pub format: Option<ImageFormat>,
    pub dimensions: Option<Dimensions>,
}

impl ReadRequest {
    /// An unknown `type` is rejected; an unusable `size` simply means "origin
    /// size". An empty `type` counts as absent.
    pub fn parse(type_param: Option<&str>, size_param: Option<&str>) -> AssetResult<Self> {
        let format = match type_param.map(str::trim).filter(|t| !t.is_empty()) {
            Some(raw) => Some(
                ImageFormat::from_str(raw).map_err(|_| AssetError::InvalidFormat(raw.to_string()))?,
            ),
            None => None,
        };
        Ok(Self {
            format,
            dimensions: Dimensions::parse(size_param),
        })
    }
}

/// Where served bytes came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServeSource {
    /// Origin bytes, untouched.
    Origin,
    /// Valid cached derivative.
    CacheHit,
    /// Freshly generated derivative.
    Generated,
    /// Provisioned default standing in for a missing origin.
    Fallback,
}

impl ServeSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Origin => "bypass",
            Self::CacheHit => "hit",
            Self::Generated => "miss",
            Self::Fallback => "fallback",
        }
    }
}

/// Bytes ready to be written to a response.
#[derive(Debug, Clone)]
pub struct ServedAsset {
    pub bytes: Bytes,
    pub content_type: String,
    pub etag: String,
    pub source: ServeSource,
}

#[derive(Clone)]
pub struct AssetService {
    store: Arc<dyn BlobStore>,
    transformer: Arc<dyn Transformer>,
    cache: DerivativeCache,
    fallback: FallbackResolver,
    settings: Arc<AssetSettings>,
}

impl AssetService {
    pub fn new(
        store: Arc<dyn BlobStore>,
        transformer: Arc<dyn Transformer>,
        settings: AssetSettings,
    ) -> Self {
        Self {
            cache: DerivativeCache::new(store.clone(), settings.cache_bucket.clone()),
            fallback: FallbackResolver::new(store.clone(), settings.defaults_bucket.clone()),
            store,
            transformer,
            settings: Arc::new(settings),
        }
    }

    pub fn settings(&self) -> &AssetSettings {
        &self.settings
    }

    pub fn fallback(&self) -> &FallbackResolver {
        &self.fallback
    }

    /// Classify a bucket name; `None` for buckets this service does not know.
    pub fn bucket_kind(&self, bucket: &str) -> Option<BucketKind> {
        if bucket == self.settings.cache_bucket {
            Some(BucketKind::Cache)
        } else if self.settings.fallback_bucket.as_deref() == Some(bucket) {
            Some(BucketKind::FallbackEligible)
        } else if self.settings.content_buckets.iter().any(|b| b == bucket) {
            Some(BucketKind::Content)
        } else {
            None
        }
    }

    /// Reject unknown or internal buckets and malformed ids before any
    /// storage access.
    fn validate_target(&self, bucket: &str, id: &str) -> AssetResult<BucketKind> {
        let kind = self
            .bucket_kind(bucket)
            .filter(|kind| kind.is_user_addressable())
            .ok_or_else(|| AssetError::InvalidBucket(bucket.to_string()))?;

        let id_ok = !id.is_empty()
            && id.len() <= MAX_ASSET_ID_LEN
            && !id.starts_with('.')
            && !id.contains("..")
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !id_ok {
            return Err(AssetError::InvalidId);
        }
        Ok(kind)
    }

    /// Metadata of an origin asset, without fallback.
    pub async fn head(&self, bucket: &str, id: &str) -> AssetResult<OriginAsset> {
        self.validate_target(bucket, id)?;
        let stat = self
            .store
            .stat(bucket, id)
            .await
            .map_err(|err| not_found_or(err, bucket, id))?;
        Ok(OriginAsset::from_stat(bucket, stat))
    }

    /// Serve `bucket/id`, transforming and caching as the request requires.
    pub async fn read(&self, bucket: &str, id: &str, request: ReadRequest) -> AssetResult<ServedAsset> {
        let kind = self.validate_target(bucket, id)?;

        let stat = match self.store.stat(bucket, id).await {
            Ok(stat) => stat,
            Err(err) if err.is_not_found() => {
                return self.fall_back(kind, bucket, id, request.format).await;
            }
            Err(err) => return Err(err.into()),
        };
        let origin = OriginAsset::from_stat(bucket, stat);

        match necessity::resolve(&origin, request.format, request.dimensions) {
            Decision::PassThrough => {
                let (stat, bytes) = match self.store.get(bucket, id).await {
                    Ok(found) => found,
                    Err(err) if err.is_not_found() => {
                        return self.fall_back(kind, bucket, id, request.format).await;
                    }
                    Err(err) => return Err(err.into()),
                };
                debug!(bucket, id, "serving origin as-is");
                Ok(ServedAsset {
                    bytes,
                    content_type: stat.metadata.content_type,
                    etag: stat.etag,
                    source: ServeSource::Origin,
                })
            }
            Decision::Transform { format, dimensions } => {
                self.serve_derivative(&origin, format, dimensions).await
            }
        }
    }

    async fn serve_derivative(
        &self,
        origin: &OriginAsset,
        format: Option<ImageFormat>,
        dimensions: Option<Dimensions>,
    ) -> AssetResult<ServedAsset> {
        let key = DerivativeKey::build(&origin.bucket, &origin.id, format, dimensions);

        let stale = match self.cache.lookup(&key).await? {
            Some(cached) if DerivativeCache::is_valid(&cached, &origin.etag) => {
                debug!(key = %key, "derivative cache hit");
                return Ok(served_from_cache(cached, &origin.etag));
            }
            Some(_) => true,
            None => false,
        };

        let mut write_back = true;
        if stale {
            info!(key = %key, "derivative is stale, invalidating origin `{}`", origin.id);
            if let Err(err) = self.cache.invalidate_all(&origin.bucket, &origin.id).await {
                warn!(
                    "invalidation of `{}` failed, serving without caching: {}",
                    origin.id, err
                );
                write_back = false;
            }
        } else {
            debug!(key = %key, "derivative cache miss");
        }

        let (current, source) = self
            .store
            .get(&origin.bucket, &origin.id)
            .await
            .map_err(|err| not_found_or(err, &origin.bucket, &origin.id))?;
        let transformed = self.transformer.transform(source, format, dimensions).await?;
        info!(
            key = %key,
            "generated {} derivative {}",
            transformed.format, transformed.dimensions
        );

        if write_back {
            self.cache
                .store(
                    &key,
                    transformed.bytes.clone(),
                    transformed.content_type(),
                    &current.etag,
                    current.owner_id(),
                )
                .await?;
        }

        Ok(ServedAsset {
            content_type: transformed.content_type().to_string(),
            bytes: transformed.bytes,
            etag: current.etag,
            source: ServeSource::Generated,
        })
    }

    async fn fall_back(
        &self,
        kind: BucketKind,
        bucket: &str,
        id: &str,
        format: Option<ImageFormat>,
    ) -> AssetResult<ServedAsset> {
        if kind != BucketKind::FallbackEligible {
            return Err(AssetError::NotFound {
                bucket: bucket.to_string(),
                id: id.to_string(),
            });
        }
        match self.fallback.resolve(format).await? {
            Some((stat, bytes)) => Ok(ServedAsset {
                bytes,
                content_type: stat.metadata.content_type,
                etag: stat.etag,
                source: ServeSource::Fallback,
            }),
            None => Err(AssetError::NoFallback {
                bucket: bucket.to_string(),
                id: id.to_string(),
            }),
        }
    }

    /// Store a new origin asset. Uploads are immutable: an existing id is a
    /// conflict. A missing `id` gets a generated UUID.
    pub async fn upload(
        &self,
        bucket: &str,
        id: Option<String>,
        content_type: Option<String>,
        bytes: Bytes,
        owner_id: &str,
    ) -> AssetResult<OriginAsset> {
        let id = id.unwrap_or_else(|| Uuid::new_v4().to_string());
        self.validate_target(bucket, &id)?;
        if bytes.is_empty() {
            return Err(AssetError::EmptyBody);
        }

        match self.store.stat(bucket, &id).await {
            Ok(_) => {
                return Err(AssetError::AlreadyExists {
                    bucket: bucket.to_string(),
                    id,
                });
            }
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err.into()),
        }

        let content_type = content_type
            .map(|ct| ct.trim().to_string())
            .filter(|ct| !ct.is_empty())
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());
        let mut metadata = ObjectMetadata::new(content_type, owner_id);
        if is_image_content_type(&metadata.content_type) {
            if let Some(dims) = self.transformer.probe(bytes.clone()).await {
                metadata = metadata
                    .with_attribute(ATTR_WIDTH, dims.width.to_string())
                    .with_attribute(ATTR_HEIGHT, dims.height.to_string());
            }
        }

        let stat = self.store.put(bucket, &id, bytes, metadata).await?;
        info!(bucket, id = %id, owner_id, "stored origin asset");
        Ok(OriginAsset::from_stat(bucket, stat))
    }

    /// Delete an origin owned by `owner_id`; image origins also lose all
    /// their derivatives.
    pub async fn delete(&self, bucket: &str, id: &str, owner_id: &str) -> AssetResult<()> {
        self.validate_target(bucket, id)?;
        let stat = self
            .store
            .stat(bucket, id)
            .await
            .map_err(|err| not_found_or(err, bucket, id))?;
        if stat.owner_id() != owner_id {
            return Err(AssetError::NotOwner);
        }

        self.store.delete_many(bucket, &[id.to_string()]).await?;
        info!(bucket, id, "deleted origin asset");

        if is_image_content_type(stat.content_type()) {
            let removed = self.cache.invalidate_all(bucket, id).await?;
            debug!(bucket, id, removed, "invalidated derivatives after delete");
        }
        Ok(())
    }
}

fn served_from_cache(cached: CachedDerivative, origin_etag: &str) -> ServedAsset {
    ServedAsset {
        bytes: cached.bytes,
        content_type: cached.content_type,
        etag: origin_etag.to_string(),
        source: ServeSource::CacheHit,
    }
}

fn not_found_or(err: StorageError, bucket: &str, id: &str) -> AssetError {
    if err.is_not_found() {
        AssetError::NotFound {
            bucket: bucket.to_string(),
            id: id.to_string(),
        }
    } else {
        err.into()
    }
}
