//! Writes miniature ViLT checkpoints with random weights.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use image_vqa_core::inference::vilt::{ViltConfig, ViltForQuestionAnswering};
use serde_json::json;

/// Word-level vocabulary of the tiny tokenizer. Unknown words map to `[UNK]`.
const VOCAB: &[&str] = &["[UNK]", "what", "is", "the", "of", "it", "?", "a", "painting"];

/// A ViLT checkpoint small enough to run in tests.
///
/// The answers it gives are arbitrary but always come from its labels.
pub struct TinyCheckpoint;

impl TinyCheckpoint {
    /// Hyper-parameters of the tiny model with the given answer labels.
    #[must_use]
    pub fn config(labels: &[&str]) -> ViltConfig {
        ViltConfig {
            vocab_size: 16,
            max_position_embeddings: 8,
            hidden_size: 8,
            num_hidden_layers: 1,
            num_attention_heads: 2,
            intermediate_size: 16,
            image_size: 64,
            patch_size: 32,
            id2label: labels
                .iter()
                .enumerate()
                .map(|(i, label)| (i.to_string(), (*label).to_string()))
                .collect(),
            ..ViltConfig::default()
        }
    }

    /// Writes `config.json`, `tokenizer.json`, `preprocessor_config.json`
    /// and `model.safetensors` into `dir` and returns `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the model cannot be built or a file cannot be written.
    pub fn write(dir: &Path, labels: &[&str]) -> Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let config = Self::config(labels);

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        ViltForQuestionAnswering::new(&config, vb)?;
        varmap
            .save(dir.join("model.safetensors"))
            .context("Failed to save tiny weights")?;

        let config_json = json!({
            "vocab_size": config.vocab_size,
            "max_position_embeddings": config.max_position_embeddings,
            "hidden_size": config.hidden_size,
            "num_hidden_layers": config.num_hidden_layers,
            "num_attention_heads": config.num_attention_heads,
            "intermediate_size": config.intermediate_size,
            "image_size": config.image_size,
            "patch_size": config.patch_size,
            "id2label": config.id2label,
        });
        write_json(&dir.join("config.json"), &config_json)?;

        let vocab: serde_json::Map<String, serde_json::Value> = VOCAB
            .iter()
            .enumerate()
            .map(|(i, word)| ((*word).to_string(), json!(i)))
            .collect();
        let tokenizer_json = json!({
            "version": "1.0",
            "truncation": null,
            "padding": null,
            "added_tokens": [],
            "normalizer": {"type": "Lowercase"},
            "pre_tokenizer": {"type": "Whitespace"},
            "post_processor": null,
            "decoder": null,
            "model": {"type": "WordLevel", "vocab": vocab, "unk_token": "[UNK]"}
        });
        write_json(&dir.join("tokenizer.json"), &tokenizer_json)?;

        write_json(
            &dir.join("preprocessor_config.json"),
            &json!({"size": {"shortest_edge": 64}, "size_divisor": 32}),
        )?;

        Ok(dir.to_path_buf())
    }
}

fn write_json(path: &Path, value: &serde_json::Value) -> Result<()> {
    fs::write(path, serde_json::to_vec_pretty(value)?)
        .with_context(|| format!("Failed to write {}", path.display()))
}
