//! Letterbox transformation: fit inside a `width × height` box, pad the rest.
//!
//! The transformation is deterministic, which is what makes its output
//! cacheable under a fingerprint of the input bytes and the box size.
//!
//! ```text
//! 400x300 source, 200x200 box
//!
//! ┌──────────────┐
//! │   padding    │  25px
//! ├──────────────┤
//! │  200 x 150   │
//! ├──────────────┤
//! │   padding    │  25px
//! └──────────────┘
//! ```

use super::calculations::{
    calculate_center_offset, calculate_contain_dimensions, is_scaled_downsize,
};
use super::codec;
use crate::error::{ErrorKind, ThumbnailError};
use crate::service::Transformation;
use image::imageops::FilterType;
use image::{DynamicImage, RgbaImage};
use sha1::{Digest, Sha1};

/// Letterbox-pad resize to exact target dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Letterbox {
    pub width: u32,
    pub height: u32,
}

impl Letterbox {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Resize and pad a decoded raster.
    fn apply(&self, img: DynamicImage) -> Result<DynamicImage, ThumbnailError> {
        let original = (img.width(), img.height());
        let target = (self.width, self.height);

        if original == target {
            return Ok(img);
        }
        if self.width == 0 || self.height == 0 {
            return Err(ThumbnailError::with_cause(
                ErrorKind::TransformationFailure,
                format!("cannot letterbox into a {}x{} box", self.width, self.height),
            ));
        }

        let (thumb_w, thumb_h) = calculate_contain_dimensions(original, target);
        let thumb = if (thumb_w, thumb_h) == original {
            img
        } else {
            img.resize_exact(thumb_w, thumb_h, FilterType::Lanczos3)
        };

        if is_scaled_downsize(original, target) {
            return Ok(thumb);
        }

        let (x, y) = calculate_center_offset((thumb_w, thumb_h), target);
        let mut canvas = RgbaImage::new(self.width, self.height);
        image::imageops::overlay(&mut canvas, &thumb.to_rgba8(), x, y);

        Ok(DynamicImage::ImageRgba8(canvas))
    }
}

impl Transformation for Letterbox {
    /// `"<sha1 hex>_<width>_<height>"`.
    fn fingerprint(&self, data: &[u8]) -> String {
        format!("{:x}_{}_{}", Sha1::digest(data), self.width, self.height)
    }

    fn perform(&self, data: &[u8]) -> Result<Vec<u8>, ThumbnailError> {
        let img = codec::decode(data)
            .map_err(|e| ThumbnailError::with_cause(ErrorKind::UnsupportedContentType, e))?;

        let img = self.apply(img)?;

        codec::encode(&img).map_err(|e| ThumbnailError::with_cause(ErrorKind::EncodingFailure, e))
    }
}
