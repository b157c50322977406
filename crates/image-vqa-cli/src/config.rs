//! Configuration file support for image-vqa.
//!
//! Supports TOML configuration from:
//! - XDG config: `~/.config/image-vqa/config.toml` (lowest priority)
//! - Project-local: `.image-vqa.toml` (searched up directory tree)
//! - CLI flags (highest priority, applied separately)

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, info, warn};

/// Project-local config file name.
pub const PROJECT_CONFIG: &str = ".image-vqa.toml";

/// Top-level configuration structure.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Which checkpoint answers questions.
    pub model: ModelConfig,
    /// Model cache settings.
    pub models: ModelsConfig,
    /// Image normalization settings.
    pub normalize: NormalizeConfig,
    /// Default questions.
    pub questions: QuestionsConfig,
    /// Output formatting settings.
    pub output: OutputConfig,
}

/// Checkpoint selection.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Hub repository id or local checkpoint directory.
    pub repo: Option<String>,
    /// Branch, tag or commit.
    pub revision: Option<String>,
    /// Hub base URL.
    pub endpoint: Option<String>,
    /// Expected SHA-256 hex digests keyed by file name, e.g.
    /// `[model.sha256] "model.safetensors" = "..."`.
    pub sha256: Option<HashMap<String, String>>,
}

/// Model cache configuration.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    /// Custom models directory path.
    pub dir: Option<PathBuf>,
}

/// Image normalization configuration.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct NormalizeConfig {
    /// Formats passed to the model without conversion, e.g. `["jpeg"]`.
    pub accepted_formats: Option<Vec<String>>,
    /// JPEG quality for converted images (1-100).
    pub jpeg_quality: Option<u8>,
}

/// Default question list.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct QuestionsConfig {
    /// Questions asked when none are given on the command line.
    pub list: Option<Vec<String>>,
}

/// Output formatting configuration.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Output format: "text", "json" or "jsonl".
    pub format: Option<String>,
    /// Pretty-print JSON output.
    pub pretty: Option<bool>,
    /// Show progress bar.
    pub progress: Option<bool>,
}

impl AppConfig {
    /// Load configuration from XDG and project-local files.
    ///
    /// Priority (lowest to highest):
    /// 1. XDG config: `~/.config/image-vqa/config.toml`
    /// 2. Project-local: `.image-vqa.toml` (searched up from cwd)
    ///
    /// Missing files are silently ignored. Invalid values are logged as warnings.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(xdg_path) = xdg_config_path() {
            if xdg_path.exists() {
                info!("Loading XDG config: {}", xdg_path.display());
                if let Some(xdg_config) = load_file(&xdg_path) {
                    config = xdg_config;
                }
            } else {
                debug!("XDG config not found: {}", xdg_path.display());
            }
        }

        if let Some(project_path) = find_project_config() {
            info!("Loading project config: {}", project_path.display());
            if let Some(project_config) = load_file(&project_path) {
                config.merge(project_config);
            }
        }

        if let Err(e) = config.validate() {
            eprintln!("warning: {e}");
        }

        config
    }

    /// Validate configuration values are within acceptable ranges.
    fn validate(&self) -> Result<(), String> {
        if let Some(q) = self.normalize.jpeg_quality {
            if !(1..=100).contains(&q) {
                return Err(format!("normalize.jpeg_quality must be 1-100, got {q}"));
            }
        }

        if let Some(ref formats) = self.normalize.accepted_formats {
            for f in formats {
                if image_vqa_core::normalize::parse_format(f).is_err() {
                    return Err(format!(
                        "normalize.accepted_formats has unknown format '{f}'"
                    ));
                }
            }
        }

        if let Some(ref pins) = self.model.sha256 {
            for (file, digest) in pins {
                if digest.len() != 64 || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
                    return Err(format!(
                        "model.sha256.\"{file}\" must be 64 hex digits, got '{digest}'"
                    ));
                }
            }
        }

        if let Some(ref list) = self.questions.list {
            if list.iter().any(|q| q.trim().is_empty()) {
                return Err("questions.list must not contain empty questions".to_string());
            }
        }

        if let Some(ref f) = self.output.format {
            if !matches!(f.as_str(), "text" | "json" | "jsonl") {
                return Err(format!(
                    "output.format must be 'text', 'json' or 'jsonl', got '{f}'"
                ));
            }
        }

        Ok(())
    }

    /// Merge another config into this one.
    /// Values from `other` override values in `self` when present.
    fn merge(&mut self, other: Self) {
        // Model
        self.model.repo = other.model.repo.or_else(|| self.model.repo.take());
        self.model.revision = other.model.revision.or_else(|| self.model.revision.take());
        self.model.endpoint = other.model.endpoint.or_else(|| self.model.endpoint.take());
        self.model.sha256 = other.model.sha256.or_else(|| self.model.sha256.take());

        // Models
        self.models.dir = other.models.dir.or_else(|| self.models.dir.take());

        // Normalize
        self.normalize.accepted_formats = other
            .normalize
            .accepted_formats
            .or_else(|| self.normalize.accepted_formats.take());
        self.normalize.jpeg_quality = other.normalize.jpeg_quality.or(self.normalize.jpeg_quality);

        // Questions replace as a whole list
        self.questions.list = other.questions.list.or_else(|| self.questions.list.take());

        // Output
        self.output.format = other.output.format.or_else(|| self.output.format.take());
        self.output.pretty = other.output.pretty.or(self.output.pretty);
        self.output.progress = other.output.progress.or(self.output.progress);
    }
}

/// Get the XDG config file path.
fn xdg_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("image-vqa").join("config.toml"))
}

/// Find project-local config by searching up from current directory.
fn find_project_config() -> Option<PathBuf> {
    let cwd = std::env::current_dir().ok()?;
    find_config_in_parents(&cwd)
}

/// Search for `.image-vqa.toml` in the given directory and its parents.
fn find_config_in_parents(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(PROJECT_CONFIG))
        .find(|path| path.is_file())
}

/// Load and parse a TOML config file.
fn load_file(path: &Path) -> Option<AppConfig> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to read config file {}: {}", path.display(), e);
            return None;
        }
    };

    match toml::from_str(&content) {
        Ok(config) => Some(config),
        Err(e) => {
            warn!("Failed to parse config file {}: {}", path.display(), e);
            None
        }
    }
}
