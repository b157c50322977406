//! Integration tests for loading images from disk.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use image::ImageFormat;
use image_vqa_adapters::{load_image, FsImageSource};
use image_vqa_core::ImageSource;
use image_vqa_test_support::SyntheticImageBuilder;

#[test]
fn test_load_formats() {
    let dir = tempfile::tempdir().unwrap();

    for (name, format) in [
        ("monet.jpg", ImageFormat::Jpeg),
        ("picasso.png", ImageFormat::Png),
        ("vangough.webp", ImageFormat::WebP),
        ("pointillism.bmp", ImageFormat::Bmp),
    ] {
        let path = SyntheticImageBuilder::write_rgb(dir.path(), name, format);
        let info = load_image(&path).expect("fixture should load");

        assert_eq!(info.format, Some(format), "{name}");
        assert_eq!((info.width, info.height), (48, 32), "{name}");
        assert!(info.path.ends_with(name));
    }
}

#[test]
fn test_png_alpha_preserved_on_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = SyntheticImageBuilder::write_rgba_png(dir.path(), "alpha.png");

    let info = load_image(&path).unwrap();
    assert_eq!(info.format, Some(ImageFormat::Png));
    assert_eq!(info.channels(), 4);
}

#[test]
fn test_corrupt_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = SyntheticImageBuilder::write_corrupt(dir.path(), "broken.jpg");

    let err = load_image(&path).unwrap_err();
    assert!(format!("{err:#}").contains("broken.jpg"));
}

#[test]
fn test_source_keeps_order() {
    let dir = tempfile::tempdir().unwrap();
    let paths = vec![
        SyntheticImageBuilder::write_rgb(dir.path(), "b.png", ImageFormat::Png),
        SyntheticImageBuilder::write_rgb(dir.path(), "a.jpg", ImageFormat::Jpeg),
    ];
    let source = FsImageSource::new(paths);

    assert_eq!(source.count_hint(), Some(2));

    let formats: Vec<_> = source.images().map(|r| r.unwrap().format).collect();
    assert_eq!(formats, vec![Some(ImageFormat::Png), Some(ImageFormat::Jpeg)]);
}

#[test]
fn test_source_yields_error_for_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let source = FsImageSource::new(vec![dir.path().join("missing.jpg")]);

    let results: Vec<_> = source.images().collect();
    assert_eq!(results.len(), 1);
    assert!(results[0].is_err());
}
