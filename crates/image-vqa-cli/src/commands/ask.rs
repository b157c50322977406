//! Ask command - answer questions about images.

use std::collections::HashMap;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use image::ImageFormat;
use image_vqa_adapters::models::{HubViltSource, ModelRef, DEFAULT_REPO};
use image_vqa_adapters::{answer_image, FsImageSource};
use image_vqa_core::inference::select_device;
use image_vqa_core::inference::vilt::{ModelFiles, ViltSource};
use image_vqa_core::normalize::{parse_format, FormatPolicy, DEFAULT_JPEG_QUALITY};
use image_vqa_core::{
    ImageAnswers, ImageSource, ModelLoader, ProgressEvent, ProgressSink, Query, QueryRunner,
    ResultOutput,
};
use tracing::{debug, info};

use super::models;
use crate::config::AppConfig;
use crate::output::{JsonOutput, ProgressBar, TextOutput};

/// Questions asked when none are configured.
pub const DEFAULT_QUESTIONS: &[&str] = &[
    "What is the primary subject of the painting?",
    "What are the secondary subjects of the painting?",
    "What is the style of the painting?",
    "What is the medium of the painting?",
    "What is the genre of the painting?",
    "What is the time period of the painting?",
    "What is the artist's name?",
];

/// Images answered when none are given, relative to the working directory.
pub const DEFAULT_GALLERY: &[(&str, &str)] = &[
    ("Monet", "monet.jpg"),
    ("Picasso", "picasso.jpg"),
    ("Pointillism", "pointillism.jpg"),
    ("Van Gogh", "vangough.webp"),
];

/// Output format for results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Title, then each question in bold followed by its answer
    #[default]
    Text,
    /// Single JSON array
    Json,
    /// JSON Lines (one JSON object per image)
    Jsonl,
}

/// An image to ask about, with the title it is reported under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageArg {
    /// Report title.
    pub title: String,
    /// Image file.
    pub path: PathBuf,
}

impl ImageArg {
    /// Creates an entry titled after the file stem.
    #[must_use]
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let title = path
            .file_stem()
            .map_or_else(|| path.display().to_string(), |s| s.to_string_lossy().into_owned());
        Self { title, path }
    }
}

/// Parse `PATH` or `TITLE=PATH`.
fn parse_image_arg(s: &str) -> Result<ImageArg, String> {
    if s.is_empty() {
        return Err("image path must not be empty".to_string());
    }
    // An existing file wins over the TITLE=PATH reading
    if Path::new(s).is_file() {
        return Ok(ImageArg::from_path(s));
    }
    match s.split_once('=') {
        Some((title, path)) if !title.trim().is_empty() && !path.is_empty() => Ok(ImageArg {
            title: title.to_string(),
            path: PathBuf::from(path),
        }),
        Some(_) => Err(format!("'{s}' is not PATH or TITLE=PATH")),
        None => Ok(ImageArg::from_path(s)),
    }
}

/// Parse an image format name for `--accept`.
fn parse_format_arg(s: &str) -> Result<ImageFormat, String> {
    parse_format(s).map_err(|e| e.to_string())
}

/// Shared arguments for answering questions.
#[derive(Args, Clone)]
pub struct AskArgs {
    /// Images to ask about, as PATH or TITLE=PATH [default: the built-in gallery]
    #[arg(value_name = "IMAGES", value_parser = parse_image_arg)]
    pub images: Vec<ImageArg>,

    /// Question to ask (repeatable, replaces the default questions)
    #[arg(short = 'q', long = "question", value_name = "TEXT")]
    pub questions: Vec<String>,

    /// Output format
    #[arg(long, value_enum)]
    pub format: Option<OutputFormat>,

    /// Pretty-print JSON output (only affects --format json)
    #[arg(long)]
    pub pretty: bool,

    /// Hub repository id or local checkpoint directory
    #[arg(long, value_name = "REPO")]
    pub model: Option<String>,

    /// Model revision (branch, tag or commit)
    #[arg(long)]
    pub revision: Option<String>,

    /// Custom models directory (overrides default and config)
    #[arg(long, value_name = "DIR")]
    pub models_dir: Option<PathBuf>,

    /// Image format passed to the model unconverted (repeatable) [default: jpeg]
    #[arg(long = "accept", value_name = "FORMAT", value_parser = parse_format_arg)]
    pub accept: Vec<ImageFormat>,

    /// JPEG quality for converted images
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub jpeg_quality: Option<u8>,

    /// Show progress bar
    #[arg(long)]
    pub progress: bool,

    /// Suppress progress output
    #[arg(long)]
    pub quiet: bool,

    /// Hub endpoint from config (not a CLI flag).
    #[arg(skip)]
    endpoint: Option<String>,

    /// Pinned file checksums from config (not a CLI flag).
    #[arg(skip)]
    checksums: Option<HashMap<String, String>>,
}

impl AskArgs {
    /// Apply configuration file values, respecting CLI precedence.
    ///
    /// Layering priority (lowest to highest):
    /// 1. Hardcoded defaults (in accessor methods)
    /// 2. Config file values (XDG, then project-local)
    /// 3. CLI arguments (already set on self)
    pub fn with_config(mut args: Self, config: &AppConfig) -> Self {
        if args.questions.is_empty() {
            if let Some(list) = &config.questions.list {
                args.questions.clone_from(list);
            }
        }

        if args.format.is_none() {
            args.format = config
                .output
                .format
                .as_deref()
                .and_then(|s| OutputFormat::from_str(s, true).ok());
        }
        if !args.pretty {
            args.pretty = config.output.pretty.unwrap_or(false);
        }
        if !args.progress {
            args.progress = config.output.progress.unwrap_or(false);
        }

        if args.model.is_none() {
            args.model.clone_from(&config.model.repo);
        }
        if args.revision.is_none() {
            args.revision.clone_from(&config.model.revision);
        }
        args.endpoint.clone_from(&config.model.endpoint);
        args.checksums.clone_from(&config.model.sha256);
        if args.models_dir.is_none() {
            args.models_dir.clone_from(&config.models.dir);
        }

        // Unknown names were already reported by config validation
        if args.accept.is_empty() {
            if let Some(formats) = &config.normalize.accepted_formats {
                args.accept = formats.iter().filter_map(|f| parse_format(f).ok()).collect();
            }
        }
        args.jpeg_quality = args.jpeg_quality.or(config.normalize.jpeg_quality);

        args
    }

    /// Images to process, falling back to the built-in gallery.
    fn images(&self) -> Vec<ImageArg> {
        if self.images.is_empty() {
            DEFAULT_GALLERY
                .iter()
                .map(|(title, path)| ImageArg {
                    title: (*title).to_string(),
                    path: PathBuf::from(path),
                })
                .collect()
        } else {
            self.images.clone()
        }
    }

    /// Questions to ask, falling back to the built-in list.
    fn queries(&self) -> Result<Vec<Query>> {
        if self.questions.is_empty() {
            Query::from_questions(DEFAULT_QUESTIONS.iter().copied())
        } else {
            Query::from_questions(self.questions.iter().cloned())
        }
    }

    /// Format policy with fallback to JPEG-only.
    fn policy(&self) -> FormatPolicy {
        let policy = if self.accept.is_empty() {
            FormatPolicy::default()
        } else {
            FormatPolicy::new(self.accept.clone())
        };
        policy.with_jpeg_quality(self.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY))
    }

    /// Get output format with fallback to text.
    fn format(&self) -> OutputFormat {
        self.format.unwrap_or_default()
    }

    /// Model reference with fallback to the default checkpoint.
    fn model_ref(&self) -> ModelRef {
        let model = ModelRef::new(self.model.as_deref().unwrap_or(DEFAULT_REPO));
        match &self.revision {
            Some(revision) => model.with_revision(revision),
            None => model,
        }
    }
}

/// Result of running the ask command.
pub struct AskResult {
    /// Number of images answered.
    pub processed: usize,
}

/// Run the ask command.
///
/// Expects `args` to have been processed through `with_config()` first
/// to apply configuration file settings. Images are answered one at a time
/// and the first failure aborts the run.
pub fn run(args: &AskArgs) -> Result<AskResult> {
    let queries = args.queries()?;
    let images = args.images();
    info!(
        "Asking {} question(s) about {} image(s)",
        queries.len(),
        images.len()
    );

    let show_progress = !args.quiet && (args.progress || std::io::stderr().is_terminal());
    let loader = build_loader(args, show_progress)?;
    let progress = ProgressBar::new(Some(images.len()), queries.len(), show_progress);
    let runner = QueryRunner::new(&loader).with_progress(&progress);

    let titles: Vec<String> = images.iter().map(|i| i.title.clone()).collect();
    let source = FsImageSource::new(images.into_iter().map(|i| i.path).collect());

    let session = Session {
        titles: &titles,
        source: &source,
        queries: &queries,
        runner: &runner,
        policy: args.policy(),
        progress: &progress,
    };

    let processed = match args.format() {
        OutputFormat::Text => emit_each(&session, &TextOutput::stdout())?,
        OutputFormat::Jsonl => emit_each(&session, &JsonOutput::stdout())?,
        OutputFormat::Json => {
            let output = JsonOutput::stdout();
            let mut all = Vec::new();
            let processed = session.answer(|answers| {
                all.push(answers);
                Ok(())
            })?;
            output.write_array(&all, args.pretty)?;
            output.flush()?;
            processed
        }
    };

    progress.on_event(ProgressEvent::Finished { processed });
    Ok(AskResult { processed })
}

/// Builds the model loader. Nothing is read or downloaded until first use.
fn build_loader(args: &AskArgs, show_progress: bool) -> Result<ModelLoader> {
    if let Some(dir) = args.model.as_deref().map(Path::new).filter(|p| p.is_dir()) {
        debug!("Using local checkpoint {}", dir.display());
        let files = ModelFiles::from_dir(dir)?;
        return Ok(ModelLoader::new(ViltSource::new(
            dir.display().to_string(),
            files,
            select_device(),
        )));
    }

    let models_dir = models::resolve_models_dir(args.models_dir.clone());
    debug!("Using models directory: {}", models_dir.display());

    let mut registry =
        models::configured_registry(models_dir, args.endpoint.as_deref(), args.checksums.as_ref());
    if show_progress {
        registry = registry.with_progress(models::download_progress()?);
    }

    Ok(ModelLoader::new(HubViltSource::new(
        registry,
        args.model_ref(),
        select_device(),
    )))
}

/// Everything needed to answer the batch of images.
struct Session<'a> {
    /// Report titles, one per image yielded by `source`.
    titles: &'a [String],
    source: &'a dyn ImageSource,
    queries: &'a [Query],
    runner: &'a QueryRunner<'a>,
    policy: FormatPolicy,
    progress: &'a dyn ProgressSink,
}

impl Session<'_> {
    /// Answers every image in order, handing each result to `emit`.
    ///
    /// Images are pulled from the source one at a time, so nothing after
    /// a failing image is read.
    fn answer(&self, mut emit: impl FnMut(ImageAnswers) -> Result<()>) -> Result<usize> {
        let total = self.source.count_hint();
        let mut processed = 0usize;

        for (index, (title, image)) in self.titles.iter().zip(self.source.images()).enumerate() {
            let image = image?;

            self.progress.on_event(ProgressEvent::Started {
                path: image.path.clone(),
                index,
                total,
            });

            let path = image.path.clone();
            let responses = answer_image(image, self.queries, self.runner, &self.policy)
                .with_context(|| format!("Failed to answer questions about {title}"))?;

            let answers = ImageAnswers {
                path,
                title: title.clone(),
                timestamp: iso_timestamp(),
                responses,
            };

            self.progress.on_event(ProgressEvent::Completed {
                answers: answers.clone(),
            });

            emit(answers)?;
            processed += 1;
        }

        Ok(processed)
    }
}

/// Answers every image, writing each result as soon as it is ready.
fn emit_each(session: &Session<'_>, output: &dyn ResultOutput) -> Result<usize> {
    let processed = session.answer(|answers| output.write(&answers))?;
    output.flush()?;
    Ok(processed)
}

/// Generate ISO 8601 UTC timestamp (RFC 3339 format).
fn iso_timestamp() -> String {
    match time::OffsetDateTime::now_utc().format(&time::format_description::well_known::Rfc3339) {
        Ok(ts) => ts,
        Err(e) => {
            debug!("Timestamp format failed: {e}");
            String::from("1970-01-01T00:00:00Z")
        }
    }
}
