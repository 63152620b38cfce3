use std::io::Cursor;

use image::{codecs::jpeg::JpegEncoder, imageops::FilterType, DynamicImage, ImageReader};
use thiserror::Error;
use tracing::debug;

use crate::{config::ImagePolicy, models::NormalizedImage};

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("Failed to process image: {0}")]
    Unsupported(String),
    #[error("Image must be at least {min}x{min} pixels (got {width}x{height})")]
    TooSmall { width: u32, height: u32, min: u32 },
}

/// Decodes an upload, bounds its dimensions and re-encodes it as baseline JPEG.
///
/// Output depends only on the input bytes and the policy: the JPEG encoder
/// writes no timestamps or other per-run metadata, and no source metadata is
/// carried over.
#[derive(Debug, Clone, Copy, Default)]
pub struct Normalizer {
    policy: ImagePolicy,
}

impl Normalizer {
    pub fn new(policy: ImagePolicy) -> Self {
        Self { policy }
    }

    pub fn normalize(&self, data: &[u8]) -> Result<NormalizedImage, NormalizeError> {
        let reader = ImageReader::new(Cursor::new(data))
            .with_guessed_format()
            .map_err(|e| NormalizeError::Unsupported(format!("Failed to read image: {}", e)))?;

        let source_format = reader.format();
        let img = reader
            .decode()
            .map_err(|e| NormalizeError::Unsupported(format!("Failed to decode image: {}", e)))?;

        let (width, height) = (img.width(), img.height());
        let min = self.policy.min_dimension;
        if width < min || height < min {
            return Err(NormalizeError::TooSmall { width, height, min });
        }

        let img = self.fit_within_bounds(img);
        let rgb = img.to_rgb8();
        let (out_width, out_height) = rgb.dimensions();

        let mut buf = Cursor::new(Vec::new());
        let encoder = JpegEncoder::new_with_quality(&mut buf, self.policy.quality);
        DynamicImage::ImageRgb8(rgb)
            .write_with_encoder(encoder)
            .map_err(|e| NormalizeError::Unsupported(format!("Failed to encode image: {}", e)))?;
        let bytes = buf.into_inner();

        debug!(
            ?source_format,
            source = %format!("{}x{}", width, height),
            normalized = %format!("{}x{}", out_width, out_height),
            size = bytes.len(),
            "Normalized image"
        );

        Ok(NormalizedImage { width: out_width, height: out_height, bytes })
    }

    /// Shrinks to fit the bounding box, keeping aspect ratio. Never enlarges.
    fn fit_within_bounds(&self, img: DynamicImage) -> DynamicImage {
        let ImagePolicy { max_width, max_height, .. } = self.policy;
        if img.width() <= max_width && img.height() <= max_height {
            return img;
        }
        img.resize(max_width, max_height, FilterType::Lanczos3)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};

    pub(crate) fn jpeg(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 128]));
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img).write_to(&mut buf, ImageFormat::Jpeg).unwrap();
        buf.into_inner()
    }

    pub(crate) fn png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbaImage::from_fn(width, height, |x, y| Rgba([(x % 256) as u8, 64, (y % 256) as u8, 200]));
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(img).write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    fn small_policy() -> ImagePolicy {
        ImagePolicy { min_dimension: 16, max_width: 64, max_height: 64, quality: 90 }
    }

    #[test]
    fn rejects_undecodable_bytes() {
        let err = Normalizer::default().normalize(b"definitely not an image").unwrap_err();
        assert!(matches!(err, NormalizeError::Unsupported(_)));
    }

    #[test]
    fn rejects_images_below_minimum() {
        let err = Normalizer::default().normalize(&png(300, 300)).unwrap_err();
        assert!(matches!(err, NormalizeError::TooSmall { width: 300, height: 300, min: 512 }));

        // One short side is enough.
        let err = Normalizer::new(small_policy()).normalize(&jpeg(40, 15)).unwrap_err();
        assert!(matches!(err, NormalizeError::TooSmall { .. }));
    }

    #[test]
    fn keeps_images_that_already_fit() {
        let out = Normalizer::new(small_policy()).normalize(&jpeg(48, 32)).unwrap();
        assert_eq!((out.width, out.height), (48, 32));
    }

    #[test]
    fn shrinks_preserving_aspect_ratio() {
        let out = Normalizer::new(small_policy()).normalize(&png(128, 64)).unwrap();
        assert_eq!((out.width, out.height), (64, 32));

        let out = Normalizer::new(small_policy()).normalize(&jpeg(50, 200)).unwrap();
        assert_eq!((out.width, out.height), (16, 64));
    }

    #[test]
    fn output_is_always_jpeg() {
        let out = Normalizer::new(small_policy()).normalize(&png(32, 32)).unwrap();
        assert_eq!(image::guess_format(&out.bytes).unwrap(), ImageFormat::Jpeg);
        assert_eq!(out.len(), out.bytes.len());
        assert!(!out.is_empty());
    }

    #[test]
    fn output_is_deterministic() {
        let normalizer = Normalizer::new(small_policy());
        let input = png(100, 80);
        let first = normalizer.normalize(&input).unwrap();
        let second = normalizer.normalize(&input).unwrap();
        assert_eq!(first.bytes, second.bytes);
    }

    #[test]
    fn never_exceeds_bounds_or_input() {
        let normalizer = Normalizer::new(small_policy());
        for (w, h) in [(16, 16), (64, 64), (65, 16), (200, 17), (17, 300), (90, 90)] {
            let out = normalizer.normalize(&jpeg(w, h)).unwrap();
            assert!(out.width <= 64 && out.height <= 64, "{}x{} -> {}x{}", w, h, out.width, out.height);
            assert!(out.width <= w && out.height <= h, "{}x{} -> {}x{}", w, h, out.width, out.height);
        }
    }
}
