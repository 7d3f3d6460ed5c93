//! Decides whether a read can stream the origin verbatim or needs a transform.

use crate::models::asset::{Dimensions, ImageFormat, OriginAsset};

/// What a read request resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Serve the origin bytes as-is and leave the derivative cache untouched.
    PassThrough,
    /// Produce (or reuse) a derivative with these parameters.
    Transform {
        format: Option<ImageFormat>,
        dimensions: Option<Dimensions>,
    },
}

impl Decision {
    #[cfg(test)]
    pub fn is_pass_through(&self) -> bool {
        matches!(self, Decision::PassThrough)
    }
}

/// Resolve the transform decision for a request against `origin`.
///
/// Non-image content and images in formats the pipeline does not know are
/// always passed through. Otherwise a transform is needed when the requested
/// size is smaller than the origin on either axis, or when a format other
/// than the origin's is requested. Enlargement is never requested: a size at
/// least as large as the origin on both axes counts as satisfied.
///
/// A requested format equal to the origin's is folded into "origin format",
/// so equivalent requests share one derivative.
pub fn resolve(
    origin: &OriginAsset,
    format: Option<ImageFormat>,
    dimensions: Option<Dimensions>,
) -> Decision {
    let Some(origin_format) = origin.is_image().then(|| origin.implied_format()).flatten()
    else {
        return Decision::PassThrough;
    };

    let size_satisfied = match (dimensions, origin.dimensions) {
        (None, _) => true,
        (Some(requested), Some(actual)) => requested.covers(&actual),
        (Some(_), None) => false,
    };
    let format_differs = format.is_some_and(|requested| requested != origin_format);

    if size_satisfied && !format_differs {
        Decision::PassThrough
    } else {
        Decision::Transform {
            format: format.filter(|requested| *requested != origin_format),
            dimensions,
        }
    }
}
