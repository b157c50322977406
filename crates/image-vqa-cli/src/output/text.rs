//! Plain-text report: a title, then each question in bold with its answer.

use anyhow::Result;
use image_vqa_core::{ImageAnswers, ResultOutput};
use std::io::{self, Write};
use std::sync::Mutex;

/// Writes answers as human-readable text.
///
/// ```text
/// Monet
///
/// **What is the style of the painting?**
/// impressionism
///
/// ```
pub struct TextOutput {
    writer: Mutex<Box<dyn Write + Send>>,
}

impl TextOutput {
    /// Creates a text output writing to stdout.
    #[must_use]
    pub fn stdout() -> Self {
        Self::new(Box::new(io::stdout()))
    }

    /// Creates a text output writing to the given writer.
    #[must_use]
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }
}

/// Renders one image's answers in report form.
#[must_use]
pub fn render(answers: &ImageAnswers) -> String {
    let mut out = format!("{}\n\n", answers.title);
    for response in &answers.responses {
        out.push_str(&format!("**{}**\n{}\n", response.question, response.answer));
    }
    out.push('\n');
    out
}

impl ResultOutput for TextOutput {
    #[allow(clippy::significant_drop_tightening)]
    fn write(&self, answers: &ImageAnswers) -> Result<()> {
        let text = render(answers);
        let mut writer = self
            .writer
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock poisoned: {e}"))?;
        writer.write_all(text.as_bytes())?;
        Ok(())
    }

    #[allow(clippy::significant_drop_tightening)]
    fn flush(&self) -> Result<()> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock poisoned: {e}"))?;
        writer.flush()?;
        Ok(())
    }
}
