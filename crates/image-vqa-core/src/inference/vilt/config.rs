//! ViLT model and preprocessor configuration files.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::domain::LabelVocabulary;

/// Model hyper-parameters, as stored in `config.json`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ViltConfig {
    /// Size of the text token vocabulary.
    pub vocab_size: usize,
    /// Number of token type ids.
    pub type_vocab_size: usize,
    /// Number of modality embeddings (text and image).
    pub modality_type_vocab_size: usize,
    /// Longest token sequence the text embeddings support.
    pub max_position_embeddings: usize,
    /// Width of the transformer hidden state.
    pub hidden_size: usize,
    /// Number of transformer layers.
    pub num_hidden_layers: usize,
    /// Attention heads per layer.
    pub num_attention_heads: usize,
    /// Width of the feed-forward block.
    pub intermediate_size: usize,
    /// Epsilon used by every layer norm.
    pub layer_norm_eps: f64,
    /// Pretraining image side, in pixels.
    pub image_size: usize,
    /// Side of one square image patch, in pixels.
    pub patch_size: usize,
    /// Color channels of the pixel input.
    pub num_channels: usize,
    /// Whether the attention projections carry a bias.
    pub qkv_bias: bool,
    /// Answer labels keyed by stringified class index.
    pub id2label: HashMap<String, String>,
}

impl Default for ViltConfig {
    /// Hyper-parameters of the `vilt-b32` family.
    fn default() -> Self {
        Self {
            vocab_size: 30522,
            type_vocab_size: 2,
            modality_type_vocab_size: 2,
            max_position_embeddings: 40,
            hidden_size: 768,
            num_hidden_layers: 12,
            num_attention_heads: 12,
            intermediate_size: 3072,
            layer_norm_eps: 1e-12,
            image_size: 384,
            patch_size: 32,
            num_channels: 3,
            qkv_bias: true,
            id2label: HashMap::new(),
        }
    }
}

impl ViltConfig {
    /// Reads and parses a `config.json` file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read model config: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse model config: {}", path.display()))
    }

    /// Number of answer classes.
    #[must_use]
    pub fn num_labels(&self) -> usize {
        self.id2label.len()
    }

    /// Side length of the pretrained patch grid.
    #[must_use]
    pub fn patch_grid(&self) -> usize {
        self.image_size / self.patch_size
    }

    /// Builds the answer vocabulary from `id2label`.
    ///
    /// # Errors
    ///
    /// Returns an error if the table does not cover every class index.
    pub fn labels(&self) -> Result<LabelVocabulary> {
        LabelVocabulary::from_id2label(&self.id2label, self.num_labels())
            .context("Model config has an invalid id2label table")
    }
}

/// Image preprocessing settings, as stored in `preprocessor_config.json`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ImageProcessorConfig {
    /// Resize so the shorter edge matches `size`.
    pub do_resize: bool,
    /// Resize target for the shorter edge.
    pub size: ResizeTarget,
    /// Both output sides are rounded down to a multiple of this.
    pub size_divisor: u32,
    /// Scale raw pixel values by `rescale_factor`.
    pub do_rescale: bool,
    /// Factor applied to raw `u8` values, usually `1/255`.
    pub rescale_factor: f32,
    /// Normalize each channel with `image_mean` and `image_std`.
    pub do_normalize: bool,
    /// Per-channel mean subtracted during normalization.
    pub image_mean: [f32; 3],
    /// Per-channel standard deviation divided out during normalization.
    pub image_std: [f32; 3],
}

/// Target size of the shorter image edge.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(untagged)]
pub enum ResizeTarget {
    /// `{"shortest_edge": 384}`
    ShortestEdge {
        /// Length of the shorter edge after resizing.
        shortest_edge: u32,
    },
    /// Legacy plain integer form.
    Plain(u32),
}

impl ResizeTarget {
    /// Length of the shorter edge after resizing.
    #[must_use]
    pub const fn shortest_edge(self) -> u32 {
        match self {
            Self::ShortestEdge { shortest_edge } | Self::Plain(shortest_edge) => shortest_edge,
        }
    }
}

impl Default for ImageProcessorConfig {
    fn default() -> Self {
        Self {
            do_resize: true,
            size: ResizeTarget::ShortestEdge { shortest_edge: 384 },
            size_divisor: 32,
            do_rescale: true,
            rescale_factor: 1.0 / 255.0,
            do_normalize: true,
            image_mean: [0.5; 3],
            image_std: [0.5; 3],
        }
    }
}

impl ImageProcessorConfig {
    /// Reads and parses a `preprocessor_config.json` file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read preprocessor config: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse preprocessor config: {}", path.display()))
    }
}
