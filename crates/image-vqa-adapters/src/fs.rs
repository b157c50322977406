//! Filesystem adapter for loading images.

use anyhow::{Context, Result};
use image::ImageReader;
use image_vqa_core::{ImageInfo, ImageSource};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Image source over an ordered list of files.
///
/// Formats are detected from file content, not the extension, so a PNG
/// saved as `.jpg` is still reported as PNG.
pub struct FsImageSource {
    paths: Vec<PathBuf>,
}

impl FsImageSource {
    /// Creates a source yielding `paths` in the given order.
    #[must_use]
    pub const fn new(paths: Vec<PathBuf>) -> Self {
        Self { paths }
    }
}

impl ImageSource for FsImageSource {
    fn images(&self) -> Box<dyn Iterator<Item = Result<ImageInfo>> + Send + '_> {
        debug!("Loading {} images", self.paths.len());
        Box::new(self.paths.iter().map(|path| load_image(path)))
    }

    fn count_hint(&self) -> Option<usize> {
        Some(self.paths.len())
    }
}

/// Opens and decodes an image, recording the format sniffed from its bytes.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or decoded.
pub fn load_image(path: &Path) -> Result<ImageInfo> {
    let reader = ImageReader::open(path)
        .with_context(|| format!("Failed to open image: {}", path.display()))?
        .with_guessed_format()
        .with_context(|| format!("Failed to read image: {}", path.display()))?;

    let format = reader.format();
    let image = reader
        .decode()
        .with_context(|| format!("Failed to decode image: {}", path.display()))?;

    debug!(
        "Loaded {} ({:?}, {}x{})",
        path.display(),
        format,
        image.width(),
        image.height()
    );

    Ok(ImageInfo::new(path.to_string_lossy(), format, image))
}
