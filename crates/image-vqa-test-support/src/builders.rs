//! Synthetic image builders for testing.

use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
use image_vqa_core::domain::ImageInfo;

/// Builder for creating synthetic test images.
///
/// In-memory images carry the format they pretend to be decoded from, and
/// the `write_*` helpers put real encoded files on disk for loader tests.
pub struct SyntheticImageBuilder;

impl SyntheticImageBuilder {
    // === In-memory images ===

    /// Creates an RGB gradient tagged as a decoded JPEG.
    #[must_use]
    pub fn rgb_gradient(width: u32, height: u32) -> ImageInfo {
        ImageInfo::new(
            "synthetic://gradient.jpg",
            Some(ImageFormat::Jpeg),
            DynamicImage::ImageRgb8(Self::gradient(width, height)),
        )
    }

    /// Creates a uniform RGB image tagged as a decoded JPEG.
    #[must_use]
    pub fn rgb_uniform(width: u32, height: u32, color: [u8; 3]) -> ImageInfo {
        let img = RgbImage::from_pixel(width, height, Rgb(color));
        ImageInfo::new(
            "synthetic://uniform.jpg",
            Some(ImageFormat::Jpeg),
            DynamicImage::ImageRgb8(img),
        )
    }

    /// Creates an RGBA image with a horizontal alpha ramp, tagged as PNG.
    #[must_use]
    pub fn rgba_with_alpha(width: u32, height: u32) -> ImageInfo {
        ImageInfo::new(
            "synthetic://alpha.png",
            Some(ImageFormat::Png),
            DynamicImage::ImageRgba8(Self::alpha_ramp(width, height)),
        )
    }

    /// Creates an RGB image tagged with an arbitrary source format.
    #[must_use]
    pub fn tagged(width: u32, height: u32, format: Option<ImageFormat>) -> ImageInfo {
        ImageInfo::new(
            "synthetic://tagged",
            format,
            DynamicImage::ImageRgb8(Self::gradient(width, height)),
        )
    }

    // === Files on disk ===

    /// Writes an RGB gradient in `format` to `dir/name`.
    ///
    /// # Panics
    ///
    /// Panics if the image cannot be encoded or written.
    #[must_use]
    pub fn write_rgb(dir: &Path, name: &str, format: ImageFormat) -> PathBuf {
        Self::write(dir, name, format, &DynamicImage::ImageRgb8(Self::gradient(48, 32)))
    }

    /// Writes a PNG with an alpha channel to `dir/name`.
    ///
    /// # Panics
    ///
    /// Panics if the image cannot be encoded or written.
    #[must_use]
    pub fn write_rgba_png(dir: &Path, name: &str) -> PathBuf {
        Self::write(
            dir,
            name,
            ImageFormat::Png,
            &DynamicImage::ImageRgba8(Self::alpha_ramp(40, 24)),
        )
    }

    /// Writes bytes that no decoder accepts to `dir/name`.
    ///
    /// # Panics
    ///
    /// Panics if the file cannot be written.
    #[must_use]
    pub fn write_corrupt(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        #[allow(clippy::expect_used)]
        std::fs::write(&path, b"definitely not an image").expect("write corrupt file");
        path
    }

    #[allow(clippy::expect_used)]
    fn write(dir: &Path, name: &str, format: ImageFormat, image: &DynamicImage) -> PathBuf {
        let path = dir.join(name);
        image
            .save_with_format(&path, format)
            .expect("write synthetic image");
        path
    }

    #[allow(clippy::cast_possible_truncation)]
    fn gradient(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            let r = (x * 255 / width.max(1)) as u8;
            let g = (y * 255 / height.max(1)) as u8;
            Rgb([r, g, 96])
        })
    }

    #[allow(clippy::cast_possible_truncation)]
    fn alpha_ramp(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, _| {
            Rgba([220, 40, 40, (x * 255 / width.max(1)) as u8])
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_rgb_gradient() {
        let info = SyntheticImageBuilder::rgb_gradient(64, 32);
        assert_eq!((info.width, info.height), (64, 32));
        assert_eq!(info.format, Some(ImageFormat::Jpeg));
        assert_eq!(info.channels(), 3);

        let rgb = info.image.to_rgb8();
        assert_eq!(rgb.get_pixel(0, 0).0[0], 0);
        assert!(rgb.get_pixel(63, 0).0[0] > 240);
    }

    #[test]
    fn test_rgba_with_alpha() {
        let info = SyntheticImageBuilder::rgba_with_alpha(10, 4);
        assert_eq!(info.format, Some(ImageFormat::Png));
        assert_eq!(info.channels(), 4);
    }

    #[test]
    fn test_rgb_uniform() {
        let info = SyntheticImageBuilder::rgb_uniform(5, 5, [255, 0, 128]);
        assert_eq!(info.image.to_rgb8().get_pixel(2, 2).0, [255, 0, 128]);
    }

    #[test]
    fn test_write_files() {
        let dir = tempfile::tempdir().unwrap();
        let jpeg = SyntheticImageBuilder::write_rgb(dir.path(), "a.jpg", ImageFormat::Jpeg);
        let png = SyntheticImageBuilder::write_rgba_png(dir.path(), "b.png");
        let bad = SyntheticImageBuilder::write_corrupt(dir.path(), "c.jpg");

        assert_eq!(image::open(&jpeg).unwrap().width(), 48);
        assert!(image::open(&png).unwrap().color().has_alpha());
        assert!(image::open(&bad).is_err());
    }
}
