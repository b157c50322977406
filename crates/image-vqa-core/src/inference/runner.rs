//! Answering questions about an image, one forward pass per question.

use anyhow::{Context, Result};
use tracing::debug;

use super::ModelLoader;
use crate::domain::{ImageInfo, Query, Response};
use crate::ports::{ProgressEvent, ProgressSink};

/// The winning answer class of one forward pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    /// Class index.
    pub index: usize,
    /// Label of the class.
    pub label: String,
    /// Raw score of the class.
    pub score: f32,
}

/// Index of the highest score.
///
/// Ties resolve to the first maximum. NaN scores never win, so a slice that is
/// empty or all NaN yields `None`.
#[must_use]
pub fn argmax(scores: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (index, &score) in scores.iter().enumerate() {
        match best {
            Some((_, top)) if score <= top || score.is_nan() => {}
            None if score.is_nan() => {}
            _ => best = Some((index, score)),
        }
    }
    best.map(|(index, _)| index)
}

/// Runs questions through the model owned by a `ModelLoader`.
pub struct QueryRunner<'a> {
    loader: &'a ModelLoader,
    progress: Option<&'a dyn ProgressSink>,
}

impl<'a> QueryRunner<'a> {
    /// Creates a runner. The model is loaded on the first non-empty query list.
    #[must_use]
    pub fn new(loader: &'a ModelLoader) -> Self {
        Self {
            loader,
            progress: None,
        }
    }

    /// Reports an `Answered` event for every question.
    #[must_use]
    pub fn with_progress(mut self, sink: &'a dyn ProgressSink) -> Self {
        self.progress = Some(sink);
        self
    }

    /// Answers every query about `image`, in query order.
    ///
    /// # Errors
    ///
    /// Returns an error if the model fails to load, preprocessing or the
    /// forward pass fails, or the winning class has no label. The first
    /// failure aborts the remaining queries.
    pub fn answer_all(&self, image: &ImageInfo, queries: &[Query]) -> Result<Vec<Response>> {
        if queries.is_empty() {
            return Ok(Vec::new());
        }

        let mut responses = Vec::with_capacity(queries.len());
        for (index, query) in queries.iter().enumerate() {
            let prediction = self.predict(image, query).with_context(|| {
                format!("Failed to answer '{}' for {}", query.question(), image.path)
            })?;

            debug!(
                "{}: '{}' -> '{}' (class {}, score {:.3})",
                image.path,
                query.question(),
                prediction.label,
                prediction.index,
                prediction.score
            );

            if let Some(sink) = self.progress {
                sink.on_event(ProgressEvent::Answered {
                    question: query.question().to_string(),
                    index,
                    total: queries.len(),
                });
            }

            responses.push(Response::new(query, prediction.label));
        }

        Ok(responses)
    }

    /// Runs one query and returns the top class.
    ///
    /// # Errors
    ///
    /// Returns an error if loading, encoding or the forward pass fails, the
    /// model returns no scores, or the top class is missing from the labels.
    pub fn predict(&self, image: &ImageInfo, query: &Query) -> Result<Prediction> {
        let bundle = self.loader.get()?;

        let encoding = bundle.processor().encode(&image.image, query.question())?;
        let scores = bundle.model().forward(&encoding)?;

        let index = argmax(&scores).context("Model returned no usable scores")?;
        let label = bundle.labels().get(index).with_context(|| {
            format!(
                "No label for class {index} ({} labels known)",
                bundle.labels().len()
            )
        })?;

        Ok(Prediction {
            index,
            label: label.to_string(),
            score: scores[index],
        })
    }
}
