//! Result output port for writing answers.

use crate::domain::ImageAnswers;

/// Port for outputting the answers of one image.
pub trait ResultOutput: Send + Sync {
    /// Writes the answers of a single image.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    fn write(&self, answers: &ImageAnswers) -> anyhow::Result<()>;

    /// Flushes any buffered output.
    ///
    /// # Errors
    ///
    /// Returns an error if flushing fails.
    fn flush(&self) -> anyhow::Result<()>;
}
