//! Derivative keys and cached derivative payloads.
//!
//! A derivative key has the shape `{bucket}/{origin_id}/{format}/{size}`
//! where `format` is the requested format or `origin`, and `size` is `WxH` or
//! `full`. Ids are unique only within their bucket and neither bucket names
//! nor ids contain `/`, so the `{bucket}/{origin_id}/` prefix selects the
//! derivatives of exactly one origin.

use super::asset::{Dimensions, ImageFormat};
use bytes::Bytes;
use std::fmt;

const KEY_DELIMITER: char = '/';
const ORIGIN_FORMAT_MARKER: &str = "origin";
const ORIGIN_SIZE_MARKER: &str = "full";

/// Deterministic cache key for a `(bucket, origin id, format, size)` request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DerivativeKey(String);

impl DerivativeKey {
    /// Compose the key. Total: every input maps to exactly one key.
    pub fn build(
        bucket: &str,
        origin_id: &str,
        format: Option<ImageFormat>,
        dimensions: Option<Dimensions>,
    ) -> Self {
        let format = format.map_or(ORIGIN_FORMAT_MARKER, ImageFormat::as_str);
        let size = dimensions.map_or_else(|| ORIGIN_SIZE_MARKER.to_string(), |d| d.to_string());
        Self(format!(
            "{}{format}{KEY_DELIMITER}{size}",
            Self::prefix_for(bucket, origin_id)
        ))
    }

    /// Prefix shared by every derivative key of `bucket/origin_id`.
    pub fn prefix_for(bucket: &str, origin_id: &str) -> String {
        format!("{bucket}{KEY_DELIMITER}{origin_id}{KEY_DELIMITER}")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DerivativeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DerivativeKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A derivative read back from the cache namespace.
#[derive(Debug, Clone)]
pub struct CachedDerivative {
    pub bytes: Bytes,
    pub content_type: String,
    /// Origin etag stamped at generation time; `None` if the stamp is missing.
    pub origin_etag: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_deterministic() {
        let a = DerivativeKey::build("avatars", "img1", Some(ImageFormat::Webp), Dimensions::new(400, 400));
        let b = DerivativeKey::build("avatars", "img1", Some(ImageFormat::Webp), Dimensions::parse(Some("400")));
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "avatars/img1/webp/400x400");
    }

    #[test]
    fn key_markers_for_origin_format_and_size() {
        let key = DerivativeKey::build("avatars", "img1", None, None);
        assert_eq!(key.as_str(), "avatars/img1/origin/full");
        let key = DerivativeKey::build("avatars", "img1", None, Dimensions::new(800, 600));
        assert_eq!(key.as_str(), "avatars/img1/origin/800x600");
    }

    #[test]
    fn distinct_tuples_give_distinct_keys() {
        let dims = [None, Dimensions::new(1, 1), Dimensions::new(400, 300), Dimensions::new(300, 400)];
        let formats = [None, Some(ImageFormat::Png), Some(ImageFormat::Jpeg)];
        let mut seen = std::collections::HashSet::new();
        for bucket in ["attachments", "avatars"] {
            for id in ["a", "ab", "b"] {
                for format in formats {
                    for size in dims {
                        assert!(seen.insert(DerivativeKey::build(bucket, id, format, size)));
                    }
                }
            }
        }
    }

    #[test]
    fn keys_share_only_their_own_origin_prefix() {
        let a = DerivativeKey::build("avatars", "ab", Some(ImageFormat::Png), None);
        let b = DerivativeKey::build("avatars", "abc", Some(ImageFormat::Png), None);
        let other_bucket = DerivativeKey::build("attachments", "ab", Some(ImageFormat::Png), None);
        let prefix = DerivativeKey::prefix_for("avatars", "ab");
        assert!(a.as_str().starts_with(&prefix));
        assert!(!b.as_str().starts_with(&prefix));
        assert!(!other_bucket.as_str().starts_with(&prefix));
    }
}
