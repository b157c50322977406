//! Model ports: turning (image, question) pairs into answer-class scores.

use candle_core::Tensor;
use image::DynamicImage;

use crate::inference::ModelBundle;

/// Model input tensors for one (image, question) pair.
#[derive(Debug, Clone)]
pub struct Encoding {
    /// Token ids, shape `(1, seq_len)`.
    pub input_ids: Tensor,
    /// Token type ids, shape `(1, seq_len)`.
    pub token_type_ids: Tensor,
    /// Text attention mask, shape `(1, seq_len)`.
    pub attention_mask: Tensor,
    /// Normalized pixels, shape `(1, 3, height, width)`.
    pub pixel_values: Tensor,
    /// Valid-pixel mask, shape `(1, height, width)`.
    pub pixel_mask: Tensor,
}

/// Converts raw (image, text) pairs into model input tensors.
pub trait Preprocessor: Send + Sync {
    /// Encodes one image and one question.
    ///
    /// # Errors
    ///
    /// Returns an error if tokenization or tensor creation fails.
    fn encode(&self, image: &DynamicImage, question: &str) -> anyhow::Result<Encoding>;
}

/// A classification-style VQA model.
pub trait AnswerModel: Send + Sync {
    /// Number of answer classes the model scores.
    fn num_labels(&self) -> usize;

    /// Runs one forward pass and returns one score per answer class.
    ///
    /// # Errors
    ///
    /// Returns an error if the forward pass fails.
    fn forward(&self, encoding: &Encoding) -> anyhow::Result<Vec<f32>>;
}

/// Where a model bundle comes from.
pub trait ModelSource: Send + Sync {
    /// Identifier of the model, for logging.
    fn name(&self) -> &str;

    /// Fetches and initializes the model and its preprocessor.
    ///
    /// May perform network or disk I/O and be slow.
    ///
    /// # Errors
    ///
    /// Returns an error if the model assets cannot be resolved or loaded.
    fn load(&self) -> anyhow::Result<ModelBundle>;
}
