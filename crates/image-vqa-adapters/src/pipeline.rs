//! Per-image question answering: open, normalize, answer.

use std::path::Path;

use anyhow::Result;
use image_vqa_core::normalize::{normalize, FormatPolicy};
use image_vqa_core::{ImageInfo, Query, QueryRunner, Response};

use crate::fs::load_image;

/// Answers `queries` about the image stored at `path`.
///
/// The image is opened before any model work, so a missing or corrupt file
/// fails without loading the model.
///
/// # Errors
///
/// Returns an error if the image cannot be opened, decoded or normalized, or
/// if answering any query fails.
pub fn query_image(
    path: &Path,
    queries: &[Query],
    runner: &QueryRunner<'_>,
    policy: &FormatPolicy,
) -> Result<Vec<Response>> {
    let image = load_image(path)?;
    answer_image(image, queries, runner, policy)
}

/// Normalizes an already decoded image and answers `queries` about it.
///
/// # Errors
///
/// Returns an error if normalization or answering fails.
pub fn answer_image(
    image: ImageInfo,
    queries: &[Query],
    runner: &QueryRunner<'_>,
    policy: &FormatPolicy,
) -> Result<Vec<Response>> {
    let image = normalize(image, policy)?;
    runner.answer_all(&image, queries)
}
