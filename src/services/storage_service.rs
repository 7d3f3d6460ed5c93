//! src/services/storage_service.rs
//!
//! StorageService: the `BlobStore` backed by SQLite for metadata and local
//! disk for object payloads. Payloads are sharded beneath
//! `base_path/{bucket}/{shard}/{shard}/{key}`; object attributes live in the
//! `object_metadata` table.

use crate::{
    models::{
        bucket::Bucket,
        metadata::{MetadataEntry, ObjectMetadata},
        object::{Object, ObjectStat},
    },
    services::blob_store::BlobStore,
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::future::join_all;
use sqlx::{QueryBuilder, SqlitePool, sqlite::Sqlite};
use std::{
    collections::BTreeMap,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

const SCHEMA_SQL: &str = include_str!("../../migrations/0001_init.sql");

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("bucket `{0}` not found")]
    BucketNotFound(String),
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error("object `{key}` not found in bucket `{bucket}`")]
    ObjectNotFound { bucket: String, key: String },
    #[error("invalid object key")]
    InvalidObjectKey,
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::ObjectNotFound { .. })
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// StorageService provides the blob operations the asset layer relies on:
/// - put (writes bytes to disk and upserts metadata into SQLite)
/// - get / stat (reads metadata from SQLite and payload from disk)
/// - list by prefix (query SQLite)
/// - delete many (removes rows, then payload files)
#[derive(Clone)]
pub struct StorageService {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,
}

const MAX_OBJECT_KEY_LEN: usize = 1024;
const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;

impl StorageService {
    /// Create a new StorageService backed by the provided SQLite pool and
    /// using `base_path` as the root directory for object payloads.
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            db,
            base_path: base_path.into(),
        }
    }

    /// Create the schema if it does not exist yet.
    pub async fn migrate(&self) -> StorageResult<()> {
        let statements = SCHEMA_SQL
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        tracing::info!("Running {} migration statements...", statements.len());

        for stmt in statements {
            debug!("Executing migration SQL: {}", stmt);
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }

    /// Make sure a bucket row and directory exist, creating them if needed.
    pub async fn ensure_bucket(&self, name: &str) -> StorageResult<Bucket> {
        self.ensure_bucket_name_safe(name)?;
        fs::create_dir_all(self.bucket_root(name)).await?;

        let inserted = sqlx::query(
            "INSERT INTO buckets (id, name, created_at) VALUES (?, ?, ?)
             ON CONFLICT(name) DO NOTHING",
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(Utc::now())
        .execute(&*self.db)
        .await?;

        if inserted.rows_affected() > 0 {
            tracing::info!("Created bucket `{}`", name);
        }
        self.fetch_bucket(name).await
    }

    /// Names among `names` that have no bucket row.
    pub async fn missing_buckets<'a>(
        &self,
        names: impl IntoIterator<Item = &'a str>,
    ) -> StorageResult<Vec<String>> {
        let mut missing = Vec::new();
        for name in names {
            match self.fetch_bucket(name).await {
                Ok(_) => {}
                Err(StorageError::BucketNotFound(_)) => missing.push(name.to_string()),
                Err(err) => return Err(err),
            }
        }
        Ok(missing)
    }

    /// Basic key validation to avoid trivial path traversal vectors.
    ///
    /// Rejects keys that begin with `/` or contain `..`.
    fn ensure_key_safe(&self, key: &str) -> StorageResult<()> {
        if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
            return Err(StorageError::InvalidObjectKey);
        }
        if key.starts_with('/') || key.contains("..") {
            return Err(StorageError::InvalidObjectKey);
        }
        if key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            return Err(StorageError::InvalidObjectKey);
        }
        Ok(())
    }

    /// Validate bucket name format.
    ///
    /// - 3–63 characters
    /// - lowercase letters, digits, dots, hyphens only
    /// - cannot start/end with dot or hyphen
    /// - cannot contain consecutive dots or dot-hyphen patterns
    fn ensure_bucket_name_safe(&self, name: &str) -> StorageResult<()> {
        let invalid = |reason: &str| StorageError::InvalidBucketName {
            name: name.to_string(),
            reason: reason.into(),
        };

        let len = name.len();
        if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&len) {
            return Err(invalid("must be between 3 and 63 characters"));
        }

        if !name
            .chars()
            .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
        {
            return Err(invalid(
                "allowed characters are lowercase letters, digits, dots, and hyphens",
            ));
        }

        if name.starts_with(['.', '-']) || name.ends_with(['.', '-']) {
            return Err(invalid("must start and end with a lowercase letter or digit"));
        }

        if name.contains("..") || name.contains("-.") || name.contains(".-") {
            return Err(invalid(
                "cannot contain consecutive dots or dot-hyphen combinations",
            ));
        }

        Ok(())
    }

    /// Compute the physical base folder path for a bucket.
    fn bucket_root(&self, bucket_name: &str) -> PathBuf {
        let mut path = self.base_path.clone();
        path.push(bucket_name);
        path
    }

    /// Generate two-level shard identifiers for an object key.
    ///
    /// Uses MD5(bucket/key) and returns the first two bytes as lowercase
    /// hexadecimal strings (00–ff).
    fn object_shards(bucket_name: &str, key: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", bucket_name, key));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    /// Construct a fully-qualified object payload path.
    ///
    /// Combines base_path/bucket/{shard}/{shard}/{key}.
    /// Parent directories may not exist yet.
    fn object_path(&self, bucket_name: &str, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(bucket_name, key);
        let mut path = self.bucket_root(bucket_name);
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    /// Fetch bucket metadata from SQLite.
    async fn fetch_bucket(&self, bucket: &str) -> StorageResult<Bucket> {
        self.ensure_bucket_name_safe(bucket)?;
        sqlx::query_as::<Sqlite, Bucket>("SELECT id, name, created_at FROM buckets WHERE name = ?")
            .bind(bucket)
            .fetch_one(&*self.db)
            .await
            .map_err(|err| match err {
                sqlx::Error::RowNotFound => StorageError::BucketNotFound(bucket.to_string()),
                other => StorageError::Sqlx(other),
            })
    }

    /// Fetch an object row together with its attributes.
    async fn fetch_object(&self, bucket: &Bucket, key: &str) -> StorageResult<ObjectStat> {
        let object = sqlx::query_as::<_, Object>(
            "SELECT id, bucket_id, key, content_type, owner_id, size_bytes, etag, last_modified
             FROM objects
             WHERE key = ? AND bucket_id = ?",
        )
        .bind(key)
        .bind(bucket.id)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StorageError::ObjectNotFound {
                bucket: bucket.name.clone(),
                key: key.to_string(),
            },
            other => StorageError::Sqlx(other),
        })?;

        let attributes = sqlx::query_as::<_, MetadataEntry>(
            "SELECT id, object_id, key, value FROM object_metadata WHERE object_id = ?",
        )
        .bind(object.id)
        .fetch_all(&*self.db)
        .await?
        .into_iter()
        .map(|entry| (entry.key, entry.value))
        .collect::<BTreeMap<_, _>>();

        Ok(object.into_stat(attributes))
    }

    /// Write `bytes` to a temp file next to `file_path`, fsync, and rename it
    /// into place.
    async fn write_payload(&self, file_path: &Path, bytes: &[u8]) -> StorageResult<()> {
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StorageError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let written = async {
            file.write_all(bytes).await?;
            file.flush().await?;
            file.sync_all().await
        }
        .await;
        if let Err(err) = written {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }

        if let Err(err) = fs::rename(&tmp_path, file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(file_path).await?;
                fs::rename(&tmp_path, file_path).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::Io(err));
            }
        }
        Ok(())
    }

    /// Upsert the object row and replace its attribute rows in one transaction.
    async fn upsert_object(
        &self,
        bucket: &Bucket,
        key: &str,
        size_bytes: i64,
        etag: &str,
        metadata: &ObjectMetadata,
    ) -> StorageResult<Object> {
        let mut tx = self.db.begin().await?;

        let object = sqlx::query_as::<_, Object>(
            r#"
            INSERT INTO objects (
                id, bucket_id, key, content_type, owner_id, size_bytes, etag, last_modified
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(bucket_id, key) DO UPDATE SET
                content_type = excluded.content_type,
                owner_id = excluded.owner_id,
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                last_modified = excluded.last_modified
            RETURNING id, bucket_id, key, content_type, owner_id, size_bytes, etag, last_modified
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(bucket.id)
        .bind(key)
        .bind(&metadata.content_type)
        .bind(&metadata.owner_id)
        .bind(size_bytes)
        .bind(etag)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM object_metadata WHERE object_id = ?")
            .bind(object.id)
            .execute(&mut *tx)
            .await?;

        for (attr_key, attr_value) in &metadata.attributes {
            sqlx::query(
                "INSERT INTO object_metadata (id, object_id, key, value) VALUES (?, ?, ?, ?)",
            )
            .bind(Uuid::new_v4())
            .bind(object.id)
            .bind(attr_key)
            .bind(attr_value)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(object)
    }

    /// Remove a payload file and prune the shard directories it leaves empty.
    async fn remove_payload(&self, bucket_name: &str, key: &str) -> StorageResult<()> {
        let file_path = self.object_path(bucket_name, key);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
            }
            Err(err) => return Err(StorageError::Io(err)),
        }

        if let Some(parent) = file_path.parent() {
            let bucket_root = self.bucket_root(bucket_name);
            self.prune_empty_dirs(parent, &bucket_root).await;
        }
        Ok(())
    }

    /// Recursively remove empty directories up to bucket root.
    ///
    /// Stops when:
    /// - directory not empty
    /// - directory not found
    /// - reached root
    /// - encountered unexpected I/O errors
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl BlobStore for StorageService {
    /// Writes the payload durably, then upserts metadata (overwrite semantics).
    /// The etag is the MD5 of the payload.
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        bytes: Bytes,
        metadata: ObjectMetadata,
    ) -> StorageResult<ObjectStat> {
        self.ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;

        let file_path = self.object_path(&bucket_rec.name, key);
        self.write_payload(&file_path, &bytes).await?;

        let etag = format!("{:x}", md5::compute(&bytes));
        let object = match self
            .upsert_object(&bucket_rec, key, bytes.len() as i64, &etag, &metadata)
            .await
        {
            Ok(object) => object,
            Err(err) => {
                let _ = fs::remove_file(&file_path).await;
                return Err(err);
            }
        };

        Ok(object.into_stat(metadata.attributes))
    }

    async fn get(&self, bucket: &str, key: &str) -> StorageResult<(ObjectStat, Bytes)> {
        self.ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let stat = self.fetch_object(&bucket_rec, key).await?;

        let file_path = self.object_path(&bucket_rec.name, key);
        let bytes = fs::read(&file_path).await.map_err(|err| {
            if err.kind() == io::ErrorKind::NotFound {
                StorageError::ObjectNotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                }
            } else {
                StorageError::Io(err)
            }
        })?;

        Ok((stat, Bytes::from(bytes)))
    }

    async fn stat(&self, bucket: &str, key: &str) -> StorageResult<ObjectStat> {
        self.ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        self.fetch_object(&bucket_rec, key).await
    }

    async fn list_by_prefix(&self, bucket: &str, prefix: &str) -> StorageResult<Vec<String>> {
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let keys = sqlx::query_scalar::<_, String>(
            "SELECT key FROM objects
             WHERE bucket_id = ? AND substr(key, 1, length(?)) = ?
             ORDER BY key ASC",
        )
        .bind(bucket_rec.id)
        .bind(prefix)
        .bind(prefix)
        .fetch_all(&*self.db)
        .await?;
        Ok(keys)
    }

    /// Deletes rows first (attributes cascade), then payload files.
    async fn delete_many(&self, bucket: &str, keys: &[String]) -> StorageResult<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        for key in keys {
            self.ensure_key_safe(key)?;
        }
        let bucket_rec = self.fetch_bucket(bucket).await?;

        let mut builder = QueryBuilder::<Sqlite>::new("DELETE FROM objects WHERE bucket_id = ");
        builder.push_bind(bucket_rec.id);
        builder.push(" AND key IN (");
        let mut separated = builder.separated(", ");
        for key in keys {
            separated.push_bind(key);
        }
        separated.push_unseparated(") RETURNING key");

        let deleted: Vec<String> = builder
            .build_query_scalar()
            .fetch_all(&*self.db)
            .await?;

        let removals = deleted
            .iter()
            .map(|key| self.remove_payload(&bucket_rec.name, key));
        for result in join_all(removals).await {
            result?;
        }

        debug!("deleted {} objects from bucket `{}`", deleted.len(), bucket);
        Ok(deleted.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;
    use tempfile::TempDir;

    async fn service() -> (StorageService, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let service = StorageService::new(Arc::new(pool), dir.path());
        service.migrate().await.unwrap();
        service.ensure_bucket("avatars").await.unwrap();
        (service, dir)
    }

    fn meta() -> ObjectMetadata {
        ObjectMetadata::new("image/png", "alice").with_attribute("width", "10")
    }

    #[tokio::test]
    async fn put_then_get_round_trips_payload_and_metadata() {
        let (svc, _dir) = service().await;
        let stat = svc
            .put("avatars", "a1", Bytes::from_static(b"hello"), meta())
            .await
            .unwrap();
        assert_eq!(stat.etag, format!("{:x}", md5::compute(b"hello")));
        assert_eq!(stat.size_bytes, 5);

        let (got, bytes) = svc.get("avatars", "a1").await.unwrap();
        assert_eq!(&bytes[..], b"hello");
        assert_eq!(got.metadata, meta());
        assert_eq!(got.owner_id(), "alice");
    }

    #[tokio::test]
    async fn put_overwrites_and_replaces_attributes() {
        let (svc, _dir) = service().await;
        svc.put("avatars", "a1", Bytes::from_static(b"one"), meta())
            .await
            .unwrap();
        let replaced = ObjectMetadata::new("image/webp", "bob").with_attribute("height", "3");
        svc.put("avatars", "a1", Bytes::from_static(b"two"), replaced.clone())
            .await
            .unwrap();

        let stat = svc.stat("avatars", "a1").await.unwrap();
        assert_eq!(stat.metadata, replaced);
        assert_eq!(stat.etag, format!("{:x}", md5::compute(b"two")));
    }

    #[tokio::test]
    async fn reports_missing_buckets() {
        let (svc, _dir) = service().await;
        let missing = svc.missing_buckets(["avatars", "derivatives"]).await.unwrap();
        assert_eq!(missing, vec!["derivatives".to_string()]);
    }

    #[tokio::test]
    async fn missing_object_and_bucket_are_reported() {
        let (svc, _dir) = service().await;
        assert!(svc.stat("avatars", "nope").await.unwrap_err().is_not_found());
        assert!(matches!(
            svc.stat("unknown", "a1").await,
            Err(StorageError::BucketNotFound(_))
        ));
        assert!(matches!(
            svc.get("avatars", "../etc").await,
            Err(StorageError::InvalidObjectKey)
        ));
    }

    #[tokio::test]
    async fn list_and_delete_by_prefix() {
        let (svc, dir) = service().await;
        for key in ["ab/png/full", "ab/webp/10x10", "abc/png/full", "b_/x"] {
            svc.put("avatars", key, Bytes::from_static(b"x"), meta())
                .await
                .unwrap();
        }

        let keys = svc.list_by_prefix("avatars", "ab/").await.unwrap();
        assert_eq!(keys, vec!["ab/png/full", "ab/webp/10x10"]);
        assert_eq!(svc.list_by_prefix("avatars", "b%").await.unwrap().len(), 0);

        let removed = svc.delete_many("avatars", &keys).await.unwrap();
        assert_eq!(removed, 2);
        assert!(svc.list_by_prefix("avatars", "ab/").await.unwrap().is_empty());
        assert_eq!(svc.list_by_prefix("avatars", "abc/").await.unwrap().len(), 1);
        assert!(!svc.object_path("avatars", "ab/png/full").exists());
        assert!(dir.path().join("avatars").exists());

        assert_eq!(svc.delete_many("avatars", &keys).await.unwrap(), 0);
        assert_eq!(svc.delete_many("avatars", &[]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn bucket_names_are_validated() {
        let (svc, _dir) = service().await;
        for bad in ["ab", "Avatars", "-avatars", "ava..tars", "a_b_c"] {
            assert!(matches!(
                svc.ensure_bucket(bad).await,
                Err(StorageError::InvalidBucketName { .. })
            ));
        }
        let first = svc.ensure_bucket("attachments").await.unwrap();
        let again = svc.ensure_bucket("attachments").await.unwrap();
        assert_eq!(first.id, again.id);
    }
}
