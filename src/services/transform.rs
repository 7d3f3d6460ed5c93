//! Image transform engine: downscale-only resize and re-encode.
//!
//! Decoding and encoding are CPU bound, so `ImageTransformer` runs them on the
//! blocking pool and never stalls other requests on the runtime threads.

use crate::models::asset::{Dimensions, ImageFormat};
use async_trait::async_trait;
use bytes::Bytes;
use image::{DynamicImage, ImageReader, imageops::FilterType};
use std::io::Cursor;
use thiserror::Error;

/// Format used when the requested one cannot be encoded by this engine.
pub const FALLBACK_ENCODE_FORMAT: ImageFormat = ImageFormat::Png;

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("failed to decode image: {0}")]
    Decode(#[source] image::ImageError),
    #[error("failed to encode image as {format}: {source}")]
    Encode {
        format: ImageFormat,
        #[source]
        source: image::ImageError,
    },
    #[error("source image format is not supported")]
    UnsupportedSource,
    #[error("transform task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type TransformResult<T> = Result<T, TransformError>;

/// Output of a transform.
#[derive(Debug, Clone)]
pub struct Transformed {
    pub bytes: Bytes,
    pub format: ImageFormat,
    pub dimensions: Dimensions,
}

impl Transformed {
    pub fn content_type(&self) -> &'static str {
        self.format.mime_type()
    }
}

#[async_trait]
pub trait Transformer: Send + Sync + 'static {
    /// Resize to fit inside `dimensions` (never enlarging) and encode as
    /// `format`, or as the source format when `format` is `None`.
    async fn transform(
        &self,
        source: Bytes,
        format: Option<ImageFormat>,
        dimensions: Option<Dimensions>,
    ) -> TransformResult<Transformed>;

    /// Read pixel dimensions from the image header, `None` if undecodable.
    async fn probe(&self, source: Bytes) -> Option<Dimensions>;
}

/// `Transformer` backed by the `image` crate.
#[derive(Clone, Debug)]
pub struct ImageTransformer {
    filter: FilterType,
}

impl Default for ImageTransformer {
    fn default() -> Self {
        Self {
            filter: FilterType::Lanczos3,
        }
    }
}

impl ImageTransformer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Formats this engine can encode.
    pub fn can_encode(format: ImageFormat) -> bool {
        !matches!(format, ImageFormat::Avif)
    }

    fn run(
        filter: FilterType,
        source: &[u8],
        format: Option<ImageFormat>,
        bounds: Option<Dimensions>,
    ) -> TransformResult<Transformed> {
        let reader = ImageReader::new(Cursor::new(source))
            .with_guessed_format()
            .map_err(|err| TransformError::Decode(err.into()))?;
        let source_format = reader.format().and_then(from_codec_format);
        let decoded = reader.decode().map_err(TransformError::Decode)?;

        let target = match format.or(source_format) {
            Some(requested) if Self::can_encode(requested) => requested,
            Some(_) => FALLBACK_ENCODE_FORMAT,
            None => return Err(TransformError::UnsupportedSource),
        };

        let resized = match bounds {
            Some(bounds) => fit_inside(decoded, bounds, filter),
            None => decoded,
        };
        let dimensions = Dimensions::new(resized.width(), resized.height())
            .ok_or(TransformError::UnsupportedSource)?;

        let prepared = prepare_for(target, resized);
        let mut out = Cursor::new(Vec::new());
        prepared
            .write_to(&mut out, to_codec_format(target))
            .map_err(|source| TransformError::Encode {
                format: target,
                source,
            })?;

        Ok(Transformed {
            bytes: Bytes::from(out.into_inner()),
            format: target,
            dimensions,
        })
    }
}

#[async_trait]
impl Transformer for ImageTransformer {
    async fn transform(
        &self,
        source: Bytes,
        format: Option<ImageFormat>,
        dimensions: Option<Dimensions>,
    ) -> TransformResult<Transformed> {
        let filter = self.filter;
        tokio::task::spawn_blocking(move || Self::run(filter, &source, format, dimensions)).await?
    }

    async fn probe(&self, source: Bytes) -> Option<Dimensions> {
        tokio::task::spawn_blocking(move || {
            let (w, h) = ImageReader::new(Cursor::new(&source[..]))
                .with_guessed_format()
                .ok()?
                .into_dimensions()
                .ok()?;
            Dimensions::new(w, h)
        })
        .await
        .ok()
        .flatten()
    }
}

/// Aspect-preserving, fit-inside resize that never enlarges.
fn fit_inside(image: DynamicImage, bounds: Dimensions, filter: FilterType) -> DynamicImage {
    let width = bounds.width.min(image.width());
    let height = bounds.height.min(image.height());
    if width == image.width() && height == image.height() {
        return image;
    }
    image.resize(width, height, filter)
}

/// Convert the pixel layout to one the target encoder accepts.
fn prepare_for(format: ImageFormat, image: DynamicImage) -> DynamicImage {
    match format {
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(image.to_rgb8()),
        ImageFormat::Webp | ImageFormat::Gif => DynamicImage::ImageRgba8(image.to_rgba8()),
        ImageFormat::Png | ImageFormat::Avif => image,
    }
}

fn to_codec_format(format: ImageFormat) -> image::ImageFormat {
    match format {
        ImageFormat::Jpeg => image::ImageFormat::Jpeg,
        ImageFormat::Png => image::ImageFormat::Png,
        ImageFormat::Webp => image::ImageFormat::WebP,
        ImageFormat::Gif => image::ImageFormat::Gif,
        ImageFormat::Avif => image::ImageFormat::Avif,
    }
}

fn from_codec_format(format: image::ImageFormat) -> Option<ImageFormat> {
    match format {
        image::ImageFormat::Jpeg => Some(ImageFormat::Jpeg),
        image::ImageFormat::Png => Some(ImageFormat::Png),
        image::ImageFormat::WebP => Some(ImageFormat::Webp),
        image::ImageFormat::Gif => Some(ImageFormat::Gif),
        image::ImageFormat::Avif => Some(ImageFormat::Avif),
        _ => None,
    }
}
