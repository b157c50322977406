//! Decoded images and per-image answer sets.

use image::{DynamicImage, ImageFormat};
use serde::{Deserialize, Serialize};

use super::Response;

/// A decoded image together with the format it was decoded from.
#[derive(Debug, Clone)]
pub struct ImageInfo {
    /// Path the image was loaded from.
    pub path: String,
    /// Source format, `None` when unknown (e.g. built in memory).
    pub format: Option<ImageFormat>,
    /// Image width in pixels.
    pub width: u32,
    /// Image height in pixels.
    pub height: u32,
    /// Decoded image data.
    pub image: DynamicImage,
}

impl ImageInfo {
    /// Wraps a decoded image, reading dimensions from the bitmap.
    #[must_use]
    pub fn new(path: impl Into<String>, format: Option<ImageFormat>, image: DynamicImage) -> Self {
        Self {
            path: path.into(),
            format,
            width: image.width(),
            height: image.height(),
            image,
        }
    }

    /// Number of color channels in the decoded bitmap.
    #[must_use]
    pub fn channels(&self) -> u8 {
        self.image.color().channel_count()
    }
}

/// All answers produced for one image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageAnswers {
    /// Path to the image.
    pub path: String,
    /// Display title for the image.
    pub title: String,
    /// Timestamp of the run (RFC 3339).
    pub timestamp: String,
    /// Answers in question order.
    pub responses: Vec<Response>,
}
