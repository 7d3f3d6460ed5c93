//! Origin assets and the request vocabulary used to address their derivatives.

use super::{
    metadata::{ATTR_HEIGHT, ATTR_WIDTH},
    object::ObjectStat,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use strum::EnumString;

/// Image formats a client may request through `?type=`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum ImageFormat {
    #[strum(serialize = "jpeg", serialize = "jpg")]
    Jpeg,
    #[strum(serialize = "png")]
    Png,
    #[strum(serialize = "webp")]
    Webp,
    #[strum(serialize = "gif")]
    Gif,
    #[strum(serialize = "avif")]
    Avif,
}

impl ImageFormat {
    /// Canonical lowercase name, also the key and file-extension marker.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Jpeg => "jpeg",
            Self::Png => "png",
            Self::Webp => "webp",
            Self::Gif => "gif",
            Self::Avif => "avif",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Webp => "image/webp",
            Self::Gif => "image/gif",
            Self::Avif => "image/avif",
        }
    }

    /// Map a content type to the format it implies, ignoring parameters.
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            "image/jpeg" | "image/jpg" | "image/pjpeg" => Some(Self::Jpeg),
            "image/png" => Some(Self::Png),
            "image/webp" => Some(Self::Webp),
            "image/gif" => Some(Self::Gif),
            "image/avif" => Some(Self::Avif),
            _ => None,
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pixel dimensions, both strictly positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    /// Returns `None` when either side is zero.
    pub fn new(width: u32, height: u32) -> Option<Self> {
        (width > 0 && height > 0).then_some(Self { width, height })
    }

    /// Parse a `?size=` descriptor.
    ///
    /// `"N"` means `N x N`, `"WxH"` means `W x H`. Anything else, including
    /// zero components, yields `None`: the caller falls back to the origin
    /// dimensions.
    pub fn parse(descriptor: Option<&str>) -> Option<Self> {
        let descriptor = descriptor?.trim();
        match descriptor.split_once(['x', 'X']) {
            Some((w, h)) => Self::new(w.parse().ok()?, h.parse().ok()?),
            None => {
                let side = descriptor.parse().ok()?;
                Self::new(side, side)
            }
        }
    }

    /// True when `self` is at least as large as `other` on both axes.
    pub fn covers(&self, other: &Dimensions) -> bool {
        self.width >= other.width && self.height >= other.height
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// An uploaded, immutable asset as seen by the derivative pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct OriginAsset {
    pub id: String,
    pub bucket: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub etag: String,
    pub owner_id: String,
    pub dimensions: Option<Dimensions>,
}

impl OriginAsset {
    pub fn from_stat(bucket: &str, stat: ObjectStat) -> Self {
        let dimensions = {
            let meta = &stat.metadata;
            let side = |key: &str| meta.attribute(key).and_then(|v| v.parse::<u32>().ok());
            match (side(ATTR_WIDTH), side(ATTR_HEIGHT)) {
                (Some(w), Some(h)) => Dimensions::new(w, h),
                _ => None,
            }
        };
        Self {
            id: stat.key,
            bucket: bucket.to_string(),
            content_type: stat.metadata.content_type,
            size_bytes: stat.size_bytes,
            etag: stat.etag,
            owner_id: stat.metadata.owner_id,
            dimensions,
        }
    }

    pub fn is_image(&self) -> bool {
        is_image_content_type(&self.content_type)
    }

    /// Format implied by the content type, if it is one the engine knows.
    pub fn implied_format(&self) -> Option<ImageFormat> {
        ImageFormat::from_content_type(&self.content_type)
    }
}

pub fn is_image_content_type(content_type: &str) -> bool {
    content_type
        .trim_start()
        .get(..6)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("image/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::metadata::ObjectMetadata;
    use chrono::Utc;
    use std::str::FromStr;

    #[test]
    fn size_descriptor_parsing() {
        assert_eq!(Dimensions::parse(Some("512")), Dimensions::new(512, 512));
        assert_eq!(Dimensions::parse(Some("800x600")), Dimensions::new(800, 600));
        assert_eq!(Dimensions::parse(Some("0")), None);
        assert_eq!(Dimensions::parse(Some("abc")), None);
        assert_eq!(Dimensions::parse(Some("")), None);
        assert_eq!(Dimensions::parse(None), None);
        assert_eq!(Dimensions::parse(Some("800x")), None);
        assert_eq!(Dimensions::parse(Some("0x600")), None);
        assert_eq!(Dimensions::parse(Some("-5")), None);
    }

    #[test]
    fn format_names_and_aliases() {
        assert_eq!(ImageFormat::from_str("jpg").unwrap(), ImageFormat::Jpeg);
        assert_eq!(ImageFormat::from_str("WEBP").unwrap(), ImageFormat::Webp);
        assert!(ImageFormat::from_str("bmp").is_err());
        assert_eq!(ImageFormat::Jpeg.to_string(), "jpeg");
        assert_eq!(
            ImageFormat::from_content_type("image/png; charset=binary"),
            Some(ImageFormat::Png)
        );
        assert_eq!(ImageFormat::from_content_type("image/svg+xml"), None);
    }

    #[test]
    fn origin_reads_dimensions_from_attributes() {
        let stat = ObjectStat {
            key: "a1".into(),
            size_bytes: 10,
            etag: "t1".into(),
            last_modified: Utc::now(),
            metadata: ObjectMetadata::new("image/png", "alice")
                .with_attribute(ATTR_WIDTH, "1200")
                .with_attribute(ATTR_HEIGHT, "800"),
        };
        let origin = OriginAsset::from_stat("avatars", stat);
        assert_eq!(origin.dimensions, Dimensions::new(1200, 800));
        assert!(origin.is_image());
        assert_eq!(origin.implied_format(), Some(ImageFormat::Png));
    }
}
