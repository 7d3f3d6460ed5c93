//! Represents an object (blob) stored in a bucket.

use super::metadata::ObjectMetadata;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Row of the `objects` table.
///
/// The struct stores the object's metadata, not the content bytes.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Object {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Foreign key linking to the parent bucket.
    pub bucket_id: Uuid,

    /// Object key within the bucket.
    pub key: String,

    /// Content type (MIME type).
    pub content_type: String,

    /// Identifier of the uploader.
    pub owner_id: String,

    /// Size in bytes.
    pub size_bytes: i64,

    /// MD5 checksum of the payload, used as the validation token.
    pub etag: String,

    /// Timestamp when object was last written.
    pub last_modified: DateTime<Utc>,
}

impl Object {
    /// Combine the row with its attribute rows into the stat view.
    pub fn into_stat(self, attributes: BTreeMap<String, String>) -> ObjectStat {
        ObjectStat {
            key: self.key,
            size_bytes: self.size_bytes,
            etag: self.etag,
            last_modified: self.last_modified,
            metadata: ObjectMetadata {
                content_type: self.content_type,
                owner_id: self.owner_id,
                attributes,
            },
        }
    }
}

/// What a blob store reports about a stored object.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ObjectStat {
    pub key: String,
    pub size_bytes: i64,
    pub etag: String,
    pub last_modified: DateTime<Utc>,
    pub metadata: ObjectMetadata,
}

impl ObjectStat {
    pub fn content_type(&self) -> &str {
        &self.metadata.content_type
    }

    pub fn owner_id(&self) -> &str {
        &self.metadata.owner_id
    }
}
