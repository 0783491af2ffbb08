//! Re-encodes uploaded profile pictures as JPEG.
//!
//! Normalization is compression only: no resizing and no EXIF orientation
//! handling. The output keeps the logical name it was given, so a file uploaded
//! as `avatar.png` is stored under that name with JPEG bytes inside.

use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, DynamicImage};
use thiserror::Error;

pub const JPEG_QUALITY: u8 = 50;

#[derive(Debug, Error)]
pub enum CompressionError {
    #[error("cannot read source image: {0}")]
    Source(#[from] std::io::Error),
    #[error("cannot decode image: {0}")]
    Decode(#[source] image::ImageError),
    #[error("cannot encode jpeg: {0}")]
    Encode(#[source] image::ImageError),
    #[error("image worker failed")]
    Worker,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NormalizedImage {
    pub name: String,
    pub bytes: Vec<u8>,
}

pub trait ImageNormalizer: Send + Sync {
    fn normalize(&self, name: &str, raw: &[u8]) -> Result<NormalizedImage, CompressionError>;
}

#[derive(Clone, Copy, Debug)]
pub struct JpegNormalizer {
    quality: u8,
}

impl JpegNormalizer {
    pub fn new(quality: u8) -> Self {
        Self { quality: quality.clamp(1, 100) }
    }
}

impl Default for JpegNormalizer {
    fn default() -> Self {
        Self::new(JPEG_QUALITY)
    }
}

impl ImageNormalizer for JpegNormalizer {
    fn normalize(&self, name: &str, raw: &[u8]) -> Result<NormalizedImage, CompressionError> {
        let decoded = image::load_from_memory(raw).map_err(CompressionError::Decode)?;

        let mut bytes = Vec::new();
        {
            let mut encoder = JpegEncoder::new_with_quality(&mut bytes, self.quality);
            // JPEG has no palette or alpha; anything but plain gray goes to opaque RGB.
            let encoded = match decoded {
                DynamicImage::ImageLuma8(gray) => {
                    encoder.encode(gray.as_raw(), gray.width(), gray.height(), ColorType::L8)
                }
                other => {
                    let rgb = other.to_rgb8();
                    encoder.encode(rgb.as_raw(), rgb.width(), rgb.height(), ColorType::Rgb8)
                }
            };
            encoded.map_err(CompressionError::Encode)?;
        }

        Ok(NormalizedImage {
            name: name.to_string(),
            bytes,
        })
    }
}
