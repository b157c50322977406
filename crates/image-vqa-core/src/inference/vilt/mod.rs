//! ViLT visual question answering backed by Candle.

mod config;
mod model;
mod processor;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use candle_core::{DType, Device};
use candle_nn::VarBuilder;
use tracing::{debug, info};

pub use config::{ImageProcessorConfig, ResizeTarget, ViltConfig};
pub use model::ViltForQuestionAnswering;
pub use processor::{preprocess_image, resize_output_size, ViltProcessor};

use super::{load_safetensors, ModelBundle};
use crate::ports::ModelSource;

/// Local files making up a pretrained ViLT checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelFiles {
    /// `config.json` with hyper-parameters and `id2label`.
    pub config: PathBuf,
    /// `tokenizer.json` for the text encoder.
    pub tokenizer: PathBuf,
    /// Model weights, safetensors or a PyTorch checkpoint.
    pub weights: PathBuf,
    /// Optional `preprocessor_config.json`.
    pub preprocessor_config: Option<PathBuf>,
}

impl ModelFiles {
    /// Locates the standard file names inside a checkpoint directory.
    ///
    /// # Errors
    ///
    /// Returns an error if a required file is missing.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let require = |name: &str| -> Result<PathBuf> {
            let path = dir.join(name);
            if path.is_file() {
                Ok(path)
            } else {
                anyhow::bail!("Missing {name} in {}", dir.display())
            }
        };

        let weights = require("model.safetensors").or_else(|_| require("pytorch_model.bin"))?;
        let preprocessor_config =
            Some(dir.join("preprocessor_config.json")).filter(|p| p.is_file());

        Ok(Self {
            config: require("config.json")?,
            tokenizer: require("tokenizer.json")?,
            weights,
            preprocessor_config,
        })
    }
}

/// Builds a ViLT model bundle from local checkpoint files.
pub struct ViltSource {
    name: String,
    files: ModelFiles,
    device: Device,
}

impl ViltSource {
    /// Creates a source for the given files, loaded onto `device`.
    #[must_use]
    pub fn new(name: impl Into<String>, files: ModelFiles, device: Device) -> Self {
        Self {
            name: name.into(),
            files,
            device,
        }
    }

    /// Loads a bundle from checkpoint files.
    ///
    /// # Errors
    ///
    /// Returns an error if any file cannot be read or the weights do not
    /// match the configuration.
    pub fn load_files(files: &ModelFiles, device: &Device) -> Result<ModelBundle> {
        let config = ViltConfig::from_file(&files.config)?;
        let labels = config.labels()?;

        let image_config = match &files.preprocessor_config {
            Some(path) => ImageProcessorConfig::from_file(path)?,
            None => {
                debug!("No preprocessor config, using ViLT defaults");
                ImageProcessorConfig::default()
            }
        };

        let processor = ViltProcessor::from_files(
            &files.tokenizer,
            image_config,
            config.max_position_embeddings,
            device.clone(),
        )?;

        let vb = load_weights(&files.weights, device)?;
        let model = ViltForQuestionAnswering::new(&config, vb)
            .with_context(|| format!("Failed to build model from {}", files.weights.display()))?;

        ModelBundle::new(Box::new(processor), Box::new(model), labels)
    }
}

impl ModelSource for ViltSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn load(&self) -> Result<ModelBundle> {
        info!("Loading model {}", self.name);
        Self::load_files(&self.files, &self.device)
    }
}

/// Opens model weights, choosing the reader by file extension.
fn load_weights(path: &Path, device: &Device) -> Result<VarBuilder<'static>> {
    let is_safetensors = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("safetensors"));

    if is_safetensors {
        load_safetensors(path, device)
    } else {
        debug!("Loading PyTorch checkpoint from {}", path.display());
        VarBuilder::from_pth(path, DType::F32, device)
            .with_context(|| format!("Failed to read PyTorch checkpoint: {}", path.display()))
    }
}
