//! ViLT vision-and-language transformer with a VQA classification head.
//!
//! Based on "ViLT: Vision-and-Language Transformer Without Convolution or
//! Region Supervision" (Kim et al., 2021). Text tokens and image patches share
//! one pre-norm transformer encoder; the pooled first token feeds an answer
//! classifier over a fixed label vocabulary.

// Allow common ML code patterns
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]

use anyhow::{Context, Result};
use candle_core::{DType, Module, Tensor};
use candle_nn::{
    conv2d, embedding, layer_norm, linear, linear_b, Conv2d, Conv2dConfig, Embedding, LayerNorm,
    Linear, VarBuilder,
};

use super::config::ViltConfig;
use crate::ports::{AnswerModel, Encoding};

/// Modality type id of text tokens.
const TEXT_TOKEN_TYPE: u32 = 0;
/// Modality type id of image patches.
const IMAGE_TOKEN_TYPE: u32 = 1;

/// BERT-style word, position and token type embeddings.
struct TextEmbeddings {
    word: Embedding,
    position: Embedding,
    token_type: Embedding,
    norm: LayerNorm,
    max_positions: usize,
}

impl TextEmbeddings {
    fn new(config: &ViltConfig, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            word: embedding(config.vocab_size, config.hidden_size, vb.pp("word_embeddings"))?,
            position: embedding(
                config.max_position_embeddings,
                config.hidden_size,
                vb.pp("position_embeddings"),
            )?,
            token_type: embedding(
                config.type_vocab_size,
                config.hidden_size,
                vb.pp("token_type_embeddings"),
            )?,
            norm: layer_norm(config.hidden_size, config.layer_norm_eps, vb.pp("LayerNorm"))?,
            max_positions: config.max_position_embeddings,
        })
    }

    fn forward(&self, input_ids: &Tensor, token_type_ids: &Tensor) -> Result<Tensor> {
        let seq_len = input_ids.dim(1)?;
        if seq_len > self.max_positions {
            anyhow::bail!(
                "Question has {seq_len} tokens, model supports at most {}",
                self.max_positions
            );
        }

        let position_ids = Tensor::arange(0u32, seq_len as u32, input_ids.device())?.unsqueeze(0)?;
        let embeddings = self
            .word
            .forward(input_ids)?
            .broadcast_add(&self.position.forward(&position_ids)?)?
            .broadcast_add(&self.token_type.forward(token_type_ids)?)?;

        Ok(self.norm.forward(&embeddings)?)
    }
}

/// Multi-head self-attention.
struct SelfAttention {
    query: Linear,
    key: Linear,
    value: Linear,
    num_heads: usize,
    head_dim: usize,
}

impl SelfAttention {
    fn new(config: &ViltConfig, vb: VarBuilder) -> Result<Self> {
        let hidden = config.hidden_size;
        if hidden % config.num_attention_heads != 0 {
            anyhow::bail!(
                "Hidden size {hidden} is not divisible by {} attention heads",
                config.num_attention_heads
            );
        }

        Ok(Self {
            query: linear_b(hidden, hidden, config.qkv_bias, vb.pp("query"))?,
            key: linear_b(hidden, hidden, config.qkv_bias, vb.pp("key"))?,
            value: linear_b(hidden, hidden, config.qkv_bias, vb.pp("value"))?,
            num_heads: config.num_attention_heads,
            head_dim: hidden / config.num_attention_heads,
        })
    }

    /// `mask` is additive with shape `(batch, 1, 1, seq_len)`.
    fn forward(&self, hidden: &Tensor, mask: &Tensor) -> Result<Tensor> {
        let (batch, seq_len, _) = hidden.dims3()?;
        let heads = |t: Tensor| -> Result<Tensor> {
            Ok(t.reshape((batch, seq_len, self.num_heads, self.head_dim))?
                .transpose(1, 2)?
                .contiguous()?)
        };

        let query = heads(self.query.forward(hidden)?)?;
        let key = heads(self.key.forward(hidden)?)?;
        let value = heads(self.value.forward(hidden)?)?;

        let scale = (self.head_dim as f64).powf(-0.5);
        let scores = (query.matmul(&key.t()?.contiguous()?)? * scale)?.broadcast_add(mask)?;
        let probs = candle_nn::ops::softmax_last_dim(&scores)?;

        Ok(probs
            .matmul(&value)?
            .transpose(1, 2)?
            .contiguous()?
            .reshape((batch, seq_len, self.num_heads * self.head_dim))?)
    }
}

/// Pre-norm transformer block.
struct Layer {
    attention: SelfAttention,
    attention_output: Linear,
    intermediate: Linear,
    output: Linear,
    norm_before: LayerNorm,
    norm_after: LayerNorm,
}

impl Layer {
    fn new(config: &ViltConfig, vb: VarBuilder) -> Result<Self> {
        let hidden = config.hidden_size;
        let eps = config.layer_norm_eps;
        Ok(Self {
            attention: SelfAttention::new(config, vb.pp("attention").pp("attention"))?,
            attention_output: linear(hidden, hidden, vb.pp("attention").pp("output").pp("dense"))?,
            intermediate: linear(
                hidden,
                config.intermediate_size,
                vb.pp("intermediate").pp("dense"),
            )?,
            output: linear(config.intermediate_size, hidden, vb.pp("output").pp("dense"))?,
            norm_before: layer_norm(hidden, eps, vb.pp("layernorm_before"))?,
            norm_after: layer_norm(hidden, eps, vb.pp("layernorm_after"))?,
        })
    }

    fn forward(&self, hidden: &Tensor, mask: &Tensor) -> Result<Tensor> {
        let attended = self
            .attention
            .forward(&self.norm_before.forward(hidden)?, mask)?;
        let hidden = self.attention_output.forward(&attended)?.add(hidden)?;

        let mlp = self
            .intermediate
            .forward(&self.norm_after.forward(&hidden)?)?
            .gelu_erf()?;
        Ok(self.output.forward(&mlp)?.add(&hidden)?)
    }
}

/// Answer classifier applied to the pooled representation.
struct Classifier {
    dense: Linear,
    norm: LayerNorm,
    out: Linear,
}

impl Classifier {
    fn new(config: &ViltConfig, vb: VarBuilder) -> Result<Self> {
        let hidden = config.hidden_size;
        Ok(Self {
            dense: linear(hidden, hidden * 2, vb.pp("0"))?,
            norm: layer_norm(hidden * 2, config.layer_norm_eps, vb.pp("1"))?,
            out: linear(hidden * 2, config.num_labels(), vb.pp("3"))?,
        })
    }

    fn forward(&self, pooled: &Tensor) -> Result<Tensor> {
        let hidden = self.norm.forward(&self.dense.forward(pooled)?)?.gelu_erf()?;
        Ok(self.out.forward(&hidden)?)
    }
}

/// ViLT model fine-tuned for visual question answering.
pub struct ViltForQuestionAnswering {
    text_embeddings: TextEmbeddings,
    patch_projection: Conv2d,
    cls_token: Tensor,
    position_embeddings: Tensor,
    modality_embeddings: Embedding,
    layers: Vec<Layer>,
    norm: LayerNorm,
    pooler: Linear,
    classifier: Classifier,
    patch_grid: usize,
    num_labels: usize,
}

impl ViltForQuestionAnswering {
    /// Builds the model from weights.
    ///
    /// # Errors
    ///
    /// Returns an error if model weights cannot be loaded or are invalid.
    #[allow(clippy::needless_pass_by_value)]
    pub fn new(config: &ViltConfig, vb: VarBuilder) -> Result<Self> {
        if config.num_labels() == 0 {
            anyhow::bail!("Model config defines no answer labels");
        }

        let vilt = vb.pp("vilt");
        let embeddings = vilt.pp("embeddings");
        let hidden = config.hidden_size;
        let patch_grid = config.patch_grid();

        let patch_projection = conv2d(
            config.num_channels,
            hidden,
            config.patch_size,
            Conv2dConfig {
                stride: config.patch_size,
                ..Conv2dConfig::default()
            },
            embeddings.pp("patch_embeddings").pp("projection"),
        )?;

        let layers = (0..config.num_hidden_layers)
            .map(|i| Layer::new(config, vilt.pp("encoder").pp("layer").pp(i)))
            .collect::<Result<Vec<_>>>()
            .context("Failed to load encoder layers")?;

        Ok(Self {
            text_embeddings: TextEmbeddings::new(config, embeddings.pp("text_embeddings"))?,
            patch_projection,
            cls_token: embeddings.get((1, 1, hidden), "cls_token")?,
            position_embeddings: embeddings
                .get((1, patch_grid * patch_grid + 1, hidden), "position_embeddings")?,
            modality_embeddings: embedding(
                config.modality_type_vocab_size,
                hidden,
                embeddings.pp("token_type_embeddings"),
            )?,
            layers,
            norm: layer_norm(hidden, config.layer_norm_eps, vilt.pp("layernorm"))?,
            pooler: linear(hidden, hidden, vilt.pp("pooler").pp("dense"))?,
            classifier: Classifier::new(config, vb.pp("classifier"))?,
            patch_grid,
            num_labels: config.num_labels(),
        })
    }

    /// Embeds image patches with interpolated position embeddings.
    ///
    /// Returns the patch sequence `(batch, 1 + patches, hidden)` (class token
    /// first) and its mask `(batch, 1 + patches)`.
    fn visual_embed(&self, pixel_values: &Tensor, pixel_mask: &Tensor) -> Result<(Tensor, Tensor)> {
        let device = pixel_values.device();
        let patches = self.patch_projection.forward(pixel_values)?;
        let (batch, hidden, height, width) = patches.dims4()?;
        let grid = self.patch_grid;

        let spatial = self
            .position_embeddings
            .narrow(1, 1, grid * grid)?
            .transpose(1, 2)?
            .contiguous()?
            .reshape((hidden, grid, grid))?;
        let position = interpolate_align_corners(&spatial, height, width)?
            .reshape((hidden, height * width))?
            .t()?
            .unsqueeze(0)?
            .contiguous()?;
        let cls_position = self.position_embeddings.narrow(1, 0, 1)?;
        let position = Tensor::cat(&[&cls_position, &position], 1)?;

        let patches = patches.flatten_from(2)?.transpose(1, 2)?.contiguous()?;
        let cls = self.cls_token.broadcast_as((batch, 1, hidden))?.contiguous()?;
        let embedded = Tensor::cat(&[&cls, &patches], 1)?.broadcast_add(&position)?;

        let patch_mask = pixel_mask
            .to_dtype(DType::F32)?
            .unsqueeze(1)?
            .upsample_nearest2d(height, width)?
            .flatten_from(1)?;
        let mask = Tensor::cat(&[&Tensor::ones((batch, 1), DType::F32, device)?, &patch_mask], 1)?;

        Ok((embedded, mask))
    }

    /// Runs the model and returns answer logits of shape `(batch, num_labels)`.
    ///
    /// # Errors
    ///
    /// Returns an error if input shapes do not match the model.
    pub fn logits(&self, encoding: &Encoding) -> Result<Tensor> {
        let text = self
            .text_embeddings
            .forward(&encoding.input_ids, &encoding.token_type_ids)?;
        let (batch, text_len, _) = text.dims3()?;
        let device = text.device();

        let text_types = Tensor::full(TEXT_TOKEN_TYPE, (batch, text_len), device)?;
        let text = text.broadcast_add(&self.modality_embeddings.forward(&text_types)?)?;

        let (image, image_mask) = self.visual_embed(&encoding.pixel_values, &encoding.pixel_mask)?;
        let image_types = Tensor::full(IMAGE_TOKEN_TYPE, image_mask.dims2()?, device)?;
        let image = image.broadcast_add(&self.modality_embeddings.forward(&image_types)?)?;

        let mut hidden = Tensor::cat(&[&text, &image], 1)?;
        let mask = Tensor::cat(&[&encoding.attention_mask.to_dtype(DType::F32)?, &image_mask], 1)?;
        let mask = additive_mask(&mask)?;

        for layer in &self.layers {
            hidden = layer.forward(&hidden, &mask)?;
        }

        let hidden = self.norm.forward(&hidden)?;
        let first = hidden.narrow(1, 0, 1)?.squeeze(1)?;
        let pooled = self.pooler.forward(&first)?.tanh()?;

        self.classifier.forward(&pooled)
    }
}

impl AnswerModel for ViltForQuestionAnswering {
    fn num_labels(&self) -> usize {
        self.num_labels
    }

    fn forward(&self, encoding: &Encoding) -> Result<Vec<f32>> {
        let logits = self.logits(encoding)?;
        Ok(logits.squeeze(0)?.to_dtype(DType::F32)?.to_vec1::<f32>()?)
    }
}

/// Turns a `(batch, seq_len)` 0/1 mask into an additive `(batch, 1, 1, seq_len)` mask.
fn additive_mask(mask: &Tensor) -> Result<Tensor> {
    let inverted = mask.ones_like()?.sub(mask)?;
    Ok((inverted * f64::from(f32::MIN))?.unsqueeze(1)?.unsqueeze(1)?)
}

/// Bilinear resize of a `(channels, in_h, in_w)` tensor with corner alignment.
fn interpolate_align_corners(input: &Tensor, height: usize, width: usize) -> Result<Tensor> {
    let (channels, in_h, in_w) = input.dims3()?;
    let device = input.device();

    let rows = Tensor::from_vec(interpolation_weights(in_h, height), (height, in_h), device)?
        .unsqueeze(0)?
        .broadcast_as((channels, height, in_h))?
        .contiguous()?;
    let cols = Tensor::from_vec(interpolation_weights(in_w, width), (width, in_w), device)?
        .t()?
        .unsqueeze(0)?
        .broadcast_as((channels, in_w, width))?
        .contiguous()?;

    Ok(rows.matmul(&input.contiguous()?.matmul(&cols)?)?)
}

/// Row-major `(dst, src)` matrix of linear interpolation weights, corners aligned.
fn interpolation_weights(src: usize, dst: usize) -> Vec<f32> {
    let mut weights = vec![0.0f32; dst * src];
    if src == 0 {
        return weights;
    }

    for i in 0..dst {
        let pos = if dst > 1 {
            i as f32 * (src - 1) as f32 / (dst - 1) as f32
        } else {
            0.0
        };
        let lo = (pos.floor() as usize).min(src - 1);
        let hi = (lo + 1).min(src - 1);
        let frac = pos - lo as f32;
        weights[i * src + lo] += 1.0 - frac;
        weights[i * src + hi] += frac;
    }

    weights
}
