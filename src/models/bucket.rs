//! Represents a logical bucket, a top-level container for objects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A storage bucket row.
///
/// Buckets are provisioned from configuration at startup; clients never create
/// or delete them.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Bucket {
    /// Unique identifier for this bucket (UUID for internal DB use).
    pub id: Uuid,

    /// Bucket name (lowercase letters, digits, dots and hyphens).
    pub name: String,

    /// When this bucket was created.
    pub created_at: DateTime<Utc>,
}

/// How the asset layer treats a bucket.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BucketKind {
    /// User-addressable content bucket, absence is a plain not-found.
    Content,
    /// Content bucket whose missing assets are replaced by a provisioned default.
    FallbackEligible,
    /// Derivative namespace, never addressed directly by clients.
    Cache,
}

impl BucketKind {
    /// Whether clients may read from or write to buckets of this kind.
    pub fn is_user_addressable(self) -> bool {
        !matches!(self, BucketKind::Cache)
    }
}
