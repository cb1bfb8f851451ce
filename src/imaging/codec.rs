//! Raster codec: bytes ⇄ [`DynamicImage`].
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Sniff format | `image::guess_format` (magic bytes) |
//! | Decode (JPEG, PNG, GIF) | `image::load_from_memory_with_format` |
//! | Encode → JPEG | `image::codecs::jpeg::JpegEncoder`, quality 100 |
//!
//! Only the three formats above are accepted, even if the `image` crate was
//! built with more decoders.

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat};
use thiserror::Error;

/// Formats [`decode`] accepts.
pub const SUPPORTED_FORMATS: &[ImageFormat] = &[ImageFormat::Jpeg, ImageFormat::Png, ImageFormat::Gif];

/// JPEG quality used for every encoded artifact.
const JPEG_QUALITY: u8 = 100;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Unsupported image format: {0}")]
    UnsupportedFormat(String),
    #[error("Encoding failed: {0}")]
    Encode(#[source] image::ImageError),
}

/// Decode JPEG, PNG or GIF bytes into a raster.
pub fn decode(data: &[u8]) -> Result<DynamicImage, CodecError> {
    let format = image::guess_format(data)
        .map_err(|_| CodecError::UnsupportedFormat("unknown image format".into()))?;

    if !SUPPORTED_FORMATS.contains(&format) {
        return Err(CodecError::UnsupportedFormat(format!("{format:?}")));
    }

    image::load_from_memory_with_format(data, format)
        .map_err(|e| CodecError::UnsupportedFormat(format!("failed to decode {format:?}: {e}")))
}

/// Encode a raster as JPEG at maximum quality.
///
/// JPEG has no alpha channel, so the raster is flattened to RGB first;
/// transparent pixels come out black.
pub fn encode(img: &DynamicImage) -> Result<Vec<u8>, CodecError> {
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    let mut buf = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY);
    rgb.write_with_encoder(encoder).map_err(CodecError::Encode)?;
    Ok(buf)
}
