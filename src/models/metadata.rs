//! User-facing and system metadata attached to stored objects.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Pixel width of an origin image, recorded at upload.
pub const ATTR_WIDTH: &str = "width";
/// Pixel height of an origin image, recorded at upload.
pub const ATTR_HEIGHT: &str = "height";
/// Origin etag a derivative was generated from.
pub const ATTR_ORIGIN_ETAG: &str = "origin-etag";

/// Metadata every stored object carries.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ObjectMetadata {
    /// Content type (MIME type).
    pub content_type: String,

    /// Identifier of the owner that uploaded the object.
    pub owner_id: String,

    /// Free-form string attributes (dimensions, origin stamps, ...).
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl ObjectMetadata {
    pub fn new(content_type: impl Into<String>, owner_id: impl Into<String>) -> Self {
        Self {
            content_type: content_type.into(),
            owner_id: owner_id.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Builder-style attribute setter.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

/// A single attribute row in the `object_metadata` table.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct MetadataEntry {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Reference to the associated object.
    pub object_id: Uuid,

    /// Attribute key (e.g. "width").
    pub key: String,

    /// Attribute value as plain text.
    pub value: String,
}
