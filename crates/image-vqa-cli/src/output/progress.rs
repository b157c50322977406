//! Progress bar adapter using indicatif.

use indicatif::{ProgressBar as IndicatifBar, ProgressStyle};
use image_vqa_core::{ProgressEvent, ProgressSink};

/// Progress bar adapter for CLI output.
///
/// The bar counts questions across all images, so it moves during the
/// slow per-question forward passes.
pub struct ProgressBar {
    bar: Option<IndicatifBar>,
    images: Option<usize>,
}

impl ProgressBar {
    /// Creates a new progress bar.
    ///
    /// # Arguments
    ///
    /// * `images` - Number of images, if known
    /// * `questions` - Number of questions asked per image
    /// * `show_bar` - If false, all events are ignored
    #[must_use]
    pub fn new(images: Option<usize>, questions: usize, show_bar: bool) -> Self {
        if !show_bar {
            return Self { bar: None, images };
        }

        let bar = images.map_or_else(IndicatifBar::new_spinner, |n| {
            IndicatifBar::new((n * questions) as u64)
        });
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        {
            bar.set_style(style.progress_chars("#>-"));
        }

        Self {
            bar: Some(bar),
            images,
        }
    }
}

impl ProgressSink for ProgressBar {
    fn on_event(&self, event: ProgressEvent) {
        let Some(bar) = &self.bar else {
            return;
        };

        match event {
            ProgressEvent::Started { path, index, .. } => {
                let of = self.images.map(|n| format!("/{n}")).unwrap_or_default();
                bar.set_message(format!("[{}{of}] {path}", index + 1));
            }
            ProgressEvent::Answered { .. } => bar.inc(1),
            ProgressEvent::Completed { .. } => {}
            ProgressEvent::Finished { processed } => {
                bar.finish_and_clear();
                eprintln!("Answered questions about {processed} image(s)");
            }
        }
    }
}
