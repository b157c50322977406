//! Image VQA Adapters - filesystem and model registry adapters.
//!
//! This crate provides adapters for:
//! - Loading images from disk with content-based format detection
//! - Downloading and caching ViLT checkpoints from a Hugging Face style hub
//! - The per-image `query_image` pipeline

pub mod fs;
pub mod models;
pub mod pipeline;

pub use fs::{load_image, FsImageSource};
pub use models::{models_dir, HubRegistry, HubViltSource, ModelRef};
pub use pipeline::{answer_image, query_image};
