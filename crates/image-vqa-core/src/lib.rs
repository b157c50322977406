//! Image VQA Core - domain types, ports and model inference
//!
//! This crate holds the question/answer domain, the ports adapters plug into,
//! the image normalizer, the at-most-once model loader, the query runner and
//! a Candle implementation of ViLT for visual question answering.

pub mod domain;
pub mod inference;
pub mod normalize;
pub mod ports;

pub use domain::{ImageAnswers, ImageInfo, LabelVocabulary, Query, Response};
pub use inference::{ModelBundle, ModelLoader, QueryRunner};
pub use normalize::{normalize, FormatPolicy};
pub use ports::{
    AnswerModel, Encoding, ImageSource, ModelSource, Preprocessor, ProgressEvent, ProgressSink,
    ResultOutput,
};
