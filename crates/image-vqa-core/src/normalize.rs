//! Image format normalization.
//!
//! The VQA model is fed three-channel images that round-trip through JPEG.
//! Images decoded from any format outside the accepted list are flattened to
//! RGB, re-encoded in memory and decoded again so that their format tag
//! reflects the conversion.

use std::io::Cursor;

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat};
use tracing::debug;

use crate::domain::ImageInfo;

/// Quality used when re-encoding to JPEG.
pub const DEFAULT_JPEG_QUALITY: u8 = 75;

/// Which source formats are passed to the model untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatPolicy {
    /// Formats returned unchanged.
    pub accepted: Vec<ImageFormat>,
    /// JPEG quality (1-100) for converted images.
    pub jpeg_quality: u8,
}

impl Default for FormatPolicy {
    fn default() -> Self {
        Self {
            accepted: vec![ImageFormat::Jpeg],
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

impl FormatPolicy {
    /// Creates a policy accepting the given formats.
    #[must_use]
    pub fn new(accepted: Vec<ImageFormat>) -> Self {
        Self {
            accepted,
            ..Self::default()
        }
    }

    /// Sets the JPEG quality, clamped to 1-100.
    #[must_use]
    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality.clamp(1, 100);
        self
    }

    /// Returns true if images tagged with `format` need no conversion.
    #[must_use]
    pub fn accepts(&self, format: Option<ImageFormat>) -> bool {
        format.is_some_and(|f| self.accepted.contains(&f))
    }
}

/// Parses a format name such as `jpeg`, `jpg`, `png` or `webp`.
///
/// # Errors
///
/// Returns an error if the name is not a known image format.
pub fn parse_format(name: &str) -> Result<ImageFormat> {
    ImageFormat::from_extension(name.trim().to_lowercase())
        .with_context(|| format!("Unknown image format '{name}'"))
}

/// Returns an image in a format the model accepts.
///
/// Accepted images are returned unchanged. Anything else is converted to RGB,
/// encoded as JPEG into a memory buffer and decoded from it.
///
/// # Errors
///
/// Returns an error if encoding fails or the buffer cannot be decoded again.
pub fn normalize(image: ImageInfo, policy: &FormatPolicy) -> Result<ImageInfo> {
    if policy.accepts(image.format) {
        return Ok(image);
    }

    debug!("Converting {} from {:?} to JPEG", image.path, image.format);

    let rgb = image.image.to_rgb8();
    let mut buffer = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(rgb)
        .write_with_encoder(JpegEncoder::new_with_quality(&mut buffer, policy.jpeg_quality))
        .with_context(|| format!("Failed to encode {} as JPEG", image.path))?;

    let decoded = image::load_from_memory_with_format(buffer.get_ref(), ImageFormat::Jpeg)
        .with_context(|| format!("Failed to decode converted image {}", image.path))?;

    Ok(ImageInfo::new(image.path, Some(ImageFormat::Jpeg), decoded))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage, Rgba, RgbaImage};

    fn jpeg_info(width: u32, height: u32) -> ImageInfo {
        let img = RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 16) as u8, (y * 16) as u8, 128])
        });
        ImageInfo::new("test.jpg", Some(ImageFormat::Jpeg), DynamicImage::ImageRgb8(img))
    }

    fn png_with_alpha(width: u32, height: u32) -> ImageInfo {
        let img = RgbaImage::from_fn(width, height, |x, _| Rgba([200, 10, 10, (x * 20) as u8]));
        ImageInfo::new("test.png", Some(ImageFormat::Png), DynamicImage::ImageRgba8(img))
    }

    #[test]
    fn test_accepted_format_unchanged() {
        let original = jpeg_info(8, 8);
        let pixels = original.image.to_rgb8().into_raw();

        let normalized = normalize(original, &FormatPolicy::default()).unwrap();

        assert_eq!(normalized.format, Some(ImageFormat::Jpeg));
        assert_eq!(normalized.image.to_rgb8().into_raw(), pixels);
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let policy = FormatPolicy::default();
        let once = normalize(png_with_alpha(12, 9), &policy).unwrap();
        let pixels = once.image.to_rgb8().into_raw();

        let twice = normalize(once, &policy).unwrap();

        assert_eq!(twice.format, Some(ImageFormat::Jpeg));
        assert_eq!(twice.image.to_rgb8().into_raw(), pixels);
    }

    #[test]
    fn test_png_with_alpha_converted_to_rgb_jpeg() {
        let normalized = normalize(png_with_alpha(10, 6), &FormatPolicy::default()).unwrap();

        assert_eq!(normalized.format, Some(ImageFormat::Jpeg));
        assert_eq!(normalized.channels(), 3);
        assert_eq!((normalized.width, normalized.height), (10, 6));
        assert_eq!(normalized.path, "test.png");
    }

    #[test]
    fn test_unknown_format_converted() {
        let info = ImageInfo::new("memory", None, DynamicImage::new_luma8(4, 4));
        let normalized = normalize(info, &FormatPolicy::default()).unwrap();

        assert_eq!(normalized.format, Some(ImageFormat::Jpeg));
        assert_eq!(normalized.channels(), 3);
    }

    #[test]
    fn test_webp_converted_unless_accepted() {
        let webp = || {
            ImageInfo::new(
                "test.webp",
                Some(ImageFormat::WebP),
                DynamicImage::new_rgb8(4, 4),
            )
        };

        let converted = normalize(webp(), &FormatPolicy::default()).unwrap();
        assert_eq!(converted.format, Some(ImageFormat::Jpeg));

        let policy = FormatPolicy::new(vec![ImageFormat::Jpeg, ImageFormat::WebP]);
        let kept = normalize(webp(), &policy).unwrap();
        assert_eq!(kept.format, Some(ImageFormat::WebP));
    }

    #[test]
    fn test_jpeg_quality_clamped() {
        assert_eq!(FormatPolicy::default().with_jpeg_quality(0).jpeg_quality, 1);
        assert_eq!(FormatPolicy::default().with_jpeg_quality(250).jpeg_quality, 100);
    }

    #[test]
    fn test_parse_format() {
        assert_eq!(parse_format("jpg").unwrap(), ImageFormat::Jpeg);
        assert_eq!(parse_format("JPEG").unwrap(), ImageFormat::Jpeg);
        assert_eq!(parse_format("webp").unwrap(), ImageFormat::WebP);
        assert!(parse_format("doc").is_err());
    }
}
