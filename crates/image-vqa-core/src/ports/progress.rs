//! Progress reporting port for UI integration.

use crate::domain::ImageAnswers;

/// Events emitted while answering questions.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// Work started on an image.
    Started {
        /// Path to the image.
        path: String,
        /// Index in the batch (0-based).
        index: usize,
        /// Total images in batch, if known.
        total: Option<usize>,
    },
    /// One question was answered.
    Answered {
        /// The question text.
        question: String,
        /// Index of the question (0-based).
        index: usize,
        /// Number of questions for this image.
        total: usize,
    },
    /// All questions for an image were answered.
    Completed {
        /// Answers for the image.
        answers: ImageAnswers,
    },
    /// All images have been processed.
    Finished {
        /// Total images processed.
        processed: usize,
    },
}

/// Port for receiving progress events.
pub trait ProgressSink: Send + Sync {
    /// Called when a progress event occurs.
    fn on_event(&self, event: ProgressEvent);
}
