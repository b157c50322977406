//! Core domain types for image question answering.

mod image_info;
mod query;
mod vocabulary;

pub use image_info::{ImageAnswers, ImageInfo};
pub use query::{Query, Response};
pub use vocabulary::LabelVocabulary;
