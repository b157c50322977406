//! Models command - manage the cached VQA checkpoint.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use clap::{Args, Subcommand};
use image_vqa_adapters::models::{
    self as hub, HubRegistry, ModelRef, ProgressCallback, DEFAULT_REPO,
};
use indicatif::{ProgressBar, ProgressStyle};

use crate::config::AppConfig;

/// Arguments for the models command
#[derive(Args)]
pub struct ModelsArgs {
    #[command(subcommand)]
    pub command: ModelsCommand,

    /// Custom models directory (overrides default and config)
    #[arg(long, value_name = "DIR", global = true)]
    pub models_dir: Option<PathBuf>,
}

/// Models subcommands
#[derive(Subcommand)]
pub enum ModelsCommand {
    /// Download a checkpoint into the models directory
    Fetch {
        /// Hub repository id [default: from config, else the ViLT VQA checkpoint]
        #[arg(long, value_name = "REPO")]
        model: Option<String>,
        /// Branch, tag or commit
        #[arg(long)]
        revision: Option<String>,
    },
    /// List cached checkpoints
    List,
    /// Print model directory path
    Path,
}

/// Run the models command.
pub fn run(args: &ModelsArgs, config: &AppConfig) -> Result<()> {
    let dir = args
        .models_dir
        .clone()
        .or_else(|| config.models.dir.clone());
    let dir = resolve_models_dir(dir);

    match &args.command {
        ModelsCommand::Fetch { model, revision } => {
            let model = model_ref(
                model.as_deref().or(config.model.repo.as_deref()),
                revision.as_deref().or(config.model.revision.as_deref()),
            );
            let registry = configured_registry(
                dir,
                config.model.endpoint.as_deref(),
                config.model.sha256.as_ref(),
            )
            .with_progress(download_progress()?);
            fetch_model(&registry, &model)
        }
        ModelsCommand::List => list_models(dir),
        ModelsCommand::Path => print_path(&dir),
    }
}

/// Models directory from CLI or config, else the platform default.
pub fn resolve_models_dir(dir: Option<PathBuf>) -> PathBuf {
    dir.unwrap_or_else(hub::models_dir)
}

/// Byte progress bar that follows whichever file is downloading.
pub fn download_progress() -> Result<ProgressCallback> {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta}) {msg}")
            .map_err(|e| anyhow::anyhow!("Invalid progress template: {e}"))?
            .progress_chars("#>-"),
    );

    let current_file: Arc<Mutex<String>> = Arc::new(Mutex::new(String::new()));

    Ok(Box::new(move |name: &str, downloaded: u64, total: Option<u64>| {
        let is_new_file = {
            let mut current = current_file
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if *current == name {
                false
            } else {
                *current = name.to_string();
                true
            }
        };
        if is_new_file {
            pb.reset();
            pb.set_length(total.unwrap_or(0));
            pb.set_message(name.to_string());
        }
        pb.set_position(downloaded);
        if total == Some(downloaded) {
            pb.finish_and_clear();
        }
    }))
}

fn model_ref(repo: Option<&str>, revision: Option<&str>) -> ModelRef {
    let model = ModelRef::new(repo.unwrap_or(DEFAULT_REPO));
    match revision {
        Some(revision) => model.with_revision(revision),
        None => model,
    }
}

/// Registry with the configured endpoint and pinned checksums.
pub fn configured_registry(
    dir: PathBuf,
    endpoint: Option<&str>,
    checksums: Option<&HashMap<String, String>>,
) -> HubRegistry {
    let mut registry = HubRegistry::new(dir);
    if let Some(endpoint) = endpoint {
        registry = registry.with_endpoint(endpoint);
    }
    if let Some(checksums) = checksums {
        registry = registry.pin_checksums(checksums.clone());
    }
    registry
}

fn fetch_model(registry: &HubRegistry, model: &ModelRef) -> Result<()> {
    registry.fetch(model)?;
    println!("{model} ready in {}", registry.model_dir(model).display());
    Ok(())
}

fn list_models(dir: PathBuf) -> Result<()> {
    let registry = HubRegistry::new(dir);
    let models = registry.list_cached()?;

    println!("Models directory: {}", registry.cache_dir().display());
    println!();

    for cached in &models {
        let complete = registry.cached(&cached.model).is_some();
        let status = if complete { "✓" } else { "✗" };
        let bytes: u64 = cached.files.iter().map(|(_, size)| size).sum();
        println!("  {status} {} ({} files, {bytes} bytes)", cached.model, cached.files.len());
    }

    println!();
    println!("{} model(s) cached", models.len());

    Ok(())
}

#[allow(clippy::unnecessary_wraps)]
fn print_path(dir: &std::path::Path) -> Result<()> {
    println!("{}", dir.display());
    Ok(())
}
