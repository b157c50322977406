//! Model downloading and caching adapter.
//!
//! Checkpoints are fetched from a Hugging Face style hub, where every file
//! lives at `{endpoint}/{repo}/resolve/{revision}/{file}`, and cached under
//! `{models_dir}/{owner}--{name}/{revision}/`.

use anyhow::{Context, Result};
use candle_core::Device;
use image_vqa_core::inference::vilt::{ModelFiles, ViltSource};
use image_vqa_core::inference::ModelBundle;
use image_vqa_core::ports::ModelSource;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Checkpoint answering questions about images.
pub const DEFAULT_REPO: &str = "dandelin/vilt-b32-finetuned-vqa";

/// Revision fetched when none is configured.
pub const DEFAULT_REVISION: &str = "main";

/// Hub serving the checkpoints.
pub const DEFAULT_ENDPOINT: &str = "https://huggingface.co";

/// Called with `(file, bytes downloaded, total bytes if known)`.
pub type ProgressCallback = Box<dyn Fn(&str, u64, Option<u64>) + Send + Sync>;

/// A file of a ViLT checkpoint.
#[derive(Debug, Clone, Copy)]
pub struct ModelFile {
    /// Accepted names, most preferred first.
    pub names: &'static [&'static str],
    /// Whether the checkpoint is unusable without this file.
    pub required: bool,
}

/// Files making up a ViLT checkpoint.
pub const VILT_FILES: &[ModelFile] = &[
    ModelFile {
        names: &["config.json"],
        required: true,
    },
    ModelFile {
        names: &["tokenizer.json"],
        required: true,
    },
    ModelFile {
        names: &["preprocessor_config.json"],
        required: false,
    },
    ModelFile {
        names: &["model.safetensors", "pytorch_model.bin"],
        required: true,
    },
];

/// A repository at a given revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRef {
    /// Repository id, e.g. `dandelin/vilt-b32-finetuned-vqa`.
    pub repo: String,
    /// Branch, tag or commit.
    pub revision: String,
}

impl ModelRef {
    /// References `repo` at the default revision.
    #[must_use]
    pub fn new(repo: impl Into<String>) -> Self {
        Self {
            repo: repo.into(),
            revision: DEFAULT_REVISION.to_string(),
        }
    }

    /// Sets the revision.
    #[must_use]
    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = revision.into();
        self
    }

    /// Relative cache directory for this reference.
    #[must_use]
    pub fn cache_key(&self) -> PathBuf {
        PathBuf::from(self.repo.replace('/', "--")).join(&self.revision)
    }
}

impl Default for ModelRef {
    fn default() -> Self {
        Self::new(DEFAULT_REPO)
    }
}

impl std::fmt::Display for ModelRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.repo, self.revision)
    }
}

/// A checkpoint found in the cache.
#[derive(Debug, Clone)]
pub struct CachedModel {
    /// The cached reference.
    pub model: ModelRef,
    /// File names and sizes in bytes.
    pub files: Vec<(String, u64)>,
}

/// Returns the default models directory.
///
/// Uses `XDG_DATA_HOME/image-vqa/models` or `~/.local/share/image-vqa/models`.
#[must_use]
pub fn models_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("image-vqa")
        .join("models")
}

/// Downloads checkpoint files on demand and keeps them on disk.
pub struct HubRegistry {
    endpoint: String,
    cache_dir: PathBuf,
    checksums: HashMap<String, String>,
    progress: Option<ProgressCallback>,
}

impl HubRegistry {
    /// Creates a registry caching into `cache_dir`.
    #[must_use]
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            cache_dir: cache_dir.into(),
            checksums: HashMap::new(),
            progress: None,
        }
    }

    /// Sets the hub base URL.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    /// Reports download progress to `callback`.
    #[must_use]
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Requires the downloaded `file` to have the given SHA-256 hex digest.
    #[must_use]
    pub fn pin_checksum(mut self, file: impl Into<String>, sha256: impl Into<String>) -> Self {
        self.checksums
            .insert(file.into(), sha256.into().to_lowercase());
        self
    }

    /// Pins every `(file, sha256)` pair, see [`Self::pin_checksum`].
    #[must_use]
    pub fn pin_checksums<K, V>(self, checksums: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        checksums
            .into_iter()
            .fold(self, |registry, (file, sha256)| registry.pin_checksum(file, sha256))
    }

    /// The cache root.
    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Directory holding the files of `model`.
    #[must_use]
    pub fn model_dir(&self, model: &ModelRef) -> PathBuf {
        self.cache_dir.join(model.cache_key())
    }

    /// Download URL of one file.
    #[must_use]
    pub fn file_url(&self, model: &ModelRef, file: &str) -> String {
        format!(
            "{}/{}/resolve/{}/{file}",
            self.endpoint, model.repo, model.revision
        )
    }

    /// Returns the cached checkpoint, if every required file is present.
    #[must_use]
    pub fn cached(&self, model: &ModelRef) -> Option<ModelFiles> {
        ModelFiles::from_dir(self.model_dir(model)).ok()
    }

    /// Returns the checkpoint, downloading missing files first.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache directory cannot be created, a required
    /// file cannot be downloaded, or a pinned checksum does not match.
    pub fn fetch(&self, model: &ModelRef) -> Result<ModelFiles> {
        let dir = self.model_dir(model);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create models directory: {}", dir.display()))?;

        let missing: Vec<&ModelFile> = VILT_FILES
            .iter()
            .filter(|file| !file.names.iter().any(|name| dir.join(name).is_file()))
            .collect();
        if missing.is_empty() {
            debug!("{model} fully cached");
            self.verify_cached(model)?;
            return ModelFiles::from_dir(&dir);
        }

        let client = http_client()?;
        for file in missing {
            let mut found = false;
            for name in file.names {
                if self.download(&client, model, name, &dir.join(name))? {
                    found = true;
                    break;
                }
            }

            if !found {
                if file.required {
                    anyhow::bail!(
                        "{} not found in {model} (tried {})",
                        file.names[0],
                        file.names.join(", ")
                    );
                }
                debug!("Optional {} not available for {model}", file.names[0]);
            }
        }

        ModelFiles::from_dir(&dir)
    }

    /// Checks cached files of `model` against their pinned checksums.
    ///
    /// Files without a pinned checksum are not read.
    ///
    /// # Errors
    ///
    /// Returns an error if a pinned file cannot be read or its digest differs.
    pub fn verify_cached(&self, model: &ModelRef) -> Result<()> {
        let dir = self.model_dir(model);
        for name in self.checksums.keys() {
            let path = dir.join(name);
            if !path.is_file() {
                continue;
            }
            let mut file = fs::File::open(&path)
                .with_context(|| format!("Failed to open {}", path.display()))?;
            let mut hasher = Sha256::new();
            std::io::copy(&mut file, &mut hasher)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            self.verify(name, &format!("{:x}", hasher.finalize()))?;
        }
        Ok(())
    }

    /// Lists checkpoints present in the cache.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache directory exists but cannot be read.
    pub fn list_cached(&self) -> Result<Vec<CachedModel>> {
        if !self.cache_dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut models = Vec::new();
        for repo_dir in read_dirs(&self.cache_dir)? {
            let Some(repo) = dir_name(&repo_dir) else {
                continue;
            };
            for revision_dir in read_dirs(&repo_dir)? {
                let Some(revision) = dir_name(&revision_dir) else {
                    continue;
                };
                let mut files: Vec<(String, u64)> = fs::read_dir(&revision_dir)
                    .with_context(|| format!("Failed to read {}", revision_dir.display()))?
                    .flatten()
                    .filter(|entry| entry.path().is_file())
                    .filter_map(|entry| {
                        let size = entry.metadata().ok()?.len();
                        Some((entry.file_name().to_string_lossy().into_owned(), size))
                    })
                    .filter(|(name, _)| !name.ends_with(".part"))
                    .collect();
                files.sort();

                models.push(CachedModel {
                    model: ModelRef::new(repo.replace("--", "/")).with_revision(revision),
                    files,
                });
            }
        }

        models.sort_by(|a, b| a.model.to_string().cmp(&b.model.to_string()));
        Ok(models)
    }

    /// Downloads one file. Returns `false` if the hub does not have it.
    fn download(
        &self,
        client: &reqwest::blocking::Client,
        model: &ModelRef,
        name: &str,
        path: &Path,
    ) -> Result<bool> {
        let url = self.file_url(model, name);
        info!("Downloading {name} from {url}");

        let mut response = client
            .get(&url)
            .send()
            .with_context(|| format!("Failed to download {name}"))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            debug!("{name} not found at {url}");
            return Ok(false);
        }
        if !response.status().is_success() {
            anyhow::bail!("Download of {name} failed with status: {}", response.status());
        }

        let total = response.content_length();
        let part = path.with_extension(format!(
            "{}.part",
            path.extension().and_then(|e| e.to_str()).unwrap_or_default()
        ));
        let mut out = fs::File::create(&part)
            .with_context(|| format!("Failed to create {}", part.display()))?;

        let mut hasher = Sha256::new();
        let mut downloaded = 0u64;
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = response
                .read(&mut buf)
                .with_context(|| format!("Failed to read response for {name}"))?;
            if n == 0 {
                break;
            }
            out.write_all(&buf[..n])
                .with_context(|| format!("Failed to write {}", part.display()))?;
            hasher.update(&buf[..n]);
            downloaded += n as u64;
            if let Some(progress) = &self.progress {
                progress(name, downloaded, total);
            }
        }
        out.flush()
            .with_context(|| format!("Failed to write {}", part.display()))?;
        drop(out);

        let digest = format!("{:x}", hasher.finalize());
        if let Err(e) = self.verify(name, &digest) {
            if let Err(remove) = fs::remove_file(&part) {
                warn!("Failed to remove {}: {remove}", part.display());
            }
            return Err(e);
        }

        fs::rename(&part, path)
            .with_context(|| format!("Failed to move {} into place", part.display()))?;

        info!("Downloaded {name} ({downloaded} bytes)");
        Ok(true)
    }

    fn verify(&self, name: &str, digest: &str) -> Result<()> {
        match self.checksums.get(name) {
            None => {
                debug!("No checksum pinned for {name}");
                Ok(())
            }
            Some(expected) if expected == digest => Ok(()),
            Some(expected) => anyhow::bail!(
                "Checksum mismatch for {name}: expected {expected}, got {digest}. \
                 Delete the cached copy and re-run to download it again."
            ),
        }
    }
}

fn http_client() -> Result<reqwest::blocking::Client> {
    reqwest::blocking::Client::builder()
        .user_agent(concat!("image-vqa/", env!("CARGO_PKG_VERSION")))
        .timeout(None::<Duration>)
        .build()
        .context("Failed to create HTTP client")
}

fn read_dirs(dir: &Path) -> Result<Vec<PathBuf>> {
    Ok(fs::read_dir(dir)
        .with_context(|| format!("Failed to read {}", dir.display()))?
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect())
}

fn dir_name(path: &Path) -> Option<String> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
}

/// ViLT checkpoint resolved through a `HubRegistry`.
pub struct HubViltSource {
    registry: HubRegistry,
    model: ModelRef,
    name: String,
    device: Device,
}

impl HubViltSource {
    /// Creates a source loading `model` onto `device`.
    #[must_use]
    pub fn new(registry: HubRegistry, model: ModelRef, device: Device) -> Self {
        Self {
            name: model.to_string(),
            registry,
            model,
            device,
        }
    }
}

impl ModelSource for HubViltSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn load(&self) -> Result<ModelBundle> {
        let files = match self.registry.cached(&self.model) {
            Some(files) => {
                debug!("Using cached {}", self.model);
                self.registry.verify_cached(&self.model)?;
                files
            }
            None => self.registry.fetch(&self.model)?,
        };

        info!("Loading model {}", self.model);
        ViltSource::load_files(&files, &self.device)
    }
}
