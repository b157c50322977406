//! Mock implementations of core port traits.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use candle_core::{DType, Device, Tensor};
use image::DynamicImage;
use image_vqa_core::domain::{ImageAnswers, ImageInfo, LabelVocabulary};
use image_vqa_core::inference::ModelBundle;
use image_vqa_core::ports::{
    AnswerModel, Encoding, ImageSource, ModelSource, Preprocessor, ProgressEvent, ProgressSink,
    ResultOutput,
};

/// Mock implementation of `ImageSource` for testing.
///
/// Yields pre-built images and tracks iteration for assertions. One
/// position can be made to fail the way an unreadable file does.
pub struct MockImageSource {
    images: Vec<ImageInfo>,
    failure: Option<(usize, String)>,
    iteration_count: Arc<Mutex<usize>>,
    yielded: Arc<AtomicUsize>,
}

impl MockImageSource {
    /// Creates a new mock source with the given images.
    #[must_use]
    pub fn new(images: Vec<ImageInfo>) -> Self {
        Self {
            images,
            failure: None,
            iteration_count: Arc::new(Mutex::new(0)),
            yielded: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Creates an empty mock source.
    #[must_use]
    pub fn empty() -> Self {
        Self::new(vec![])
    }

    /// Yields an error carrying `message` instead of the image at `index`.
    #[must_use]
    pub fn failing_at(mut self, index: usize, message: impl Into<String>) -> Self {
        self.failure = Some((index, message.into()));
        self
    }

    /// Returns the number of times the source has been iterated.
    #[must_use]
    pub fn iteration_count(&self) -> usize {
        *self
            .iteration_count
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns how many items (images or errors) consumers pulled.
    #[must_use]
    pub fn yielded_count(&self) -> usize {
        self.yielded.load(Ordering::SeqCst)
    }
}

impl ImageSource for MockImageSource {
    fn images(&self) -> Box<dyn Iterator<Item = anyhow::Result<ImageInfo>> + Send + '_> {
        *self
            .iteration_count
            .lock()
            .unwrap_or_else(PoisonError::into_inner) += 1;
        let yielded = Arc::clone(&self.yielded);
        Box::new(self.images.iter().enumerate().map(move |(index, image)| {
            yielded.fetch_add(1, Ordering::SeqCst);
            match &self.failure {
                Some((at, message)) if *at == index => Err(anyhow::anyhow!("{message}")),
                _ => Ok(image.clone()),
            }
        }))
    }

    fn count_hint(&self) -> Option<usize> {
        Some(self.images.len())
    }
}

/// Preprocessor producing tiny placeholder tensors.
///
/// Records every question it encodes. Zero-sized images are rejected the
/// way a real preprocessor rejects unusable input.
#[derive(Clone, Default)]
pub struct MockPreprocessor {
    questions: Arc<Mutex<Vec<String>>>,
}

impl MockPreprocessor {
    /// Creates a preprocessor with an empty question log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Questions encoded so far, in call order.
    #[must_use]
    pub fn questions(&self) -> Vec<String> {
        self.questions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Preprocessor for MockPreprocessor {
    fn encode(&self, image: &DynamicImage, question: &str) -> anyhow::Result<Encoding> {
        if image.width() == 0 || image.height() == 0 {
            anyhow::bail!("Cannot encode an empty image");
        }

        self.questions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(question.to_string());

        let device = Device::Cpu;
        let text = Tensor::zeros((1, 1), DType::U32, &device)?;
        Ok(Encoding {
            input_ids: text.clone(),
            token_type_ids: text.clone(),
            attention_mask: text,
            pixel_values: Tensor::zeros((1, 3, 1, 1), DType::F32, &device)?,
            pixel_mask: Tensor::ones((1, 1, 1), DType::U32, &device)?,
        })
    }
}

/// Answer model replaying scripted score vectors.
///
/// The n-th forward pass returns the n-th script entry, wrapping around
/// when the script runs out.
#[derive(Clone)]
pub struct MockAnswerModel {
    num_labels: usize,
    script: Arc<Vec<Vec<f32>>>,
    calls: Arc<AtomicUsize>,
}

impl MockAnswerModel {
    /// Creates a model that returns `scores` on every call.
    #[must_use]
    pub fn fixed(scores: Vec<f32>) -> Self {
        Self::scripted(scores.len(), vec![scores])
    }

    /// Creates a model scoring `num_labels` classes from a script.
    #[must_use]
    pub fn scripted(num_labels: usize, script: Vec<Vec<f32>>) -> Self {
        Self {
            num_labels,
            script: Arc::new(script),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of forward passes run.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl AnswerModel for MockAnswerModel {
    fn num_labels(&self) -> usize {
        self.num_labels
    }

    fn forward(&self, _encoding: &Encoding) -> anyhow::Result<Vec<f32>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.script.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.script[call % self.script.len()].clone())
    }
}

/// Model source building bundles from mocks, counting how often it loads.
///
/// Clones share their counters, so a test can keep one clone and hand the
/// other to a `ModelLoader`.
#[derive(Clone)]
pub struct MockModelSource {
    labels: Vec<String>,
    processor: MockPreprocessor,
    model: MockAnswerModel,
    failure: Option<String>,
    load_delay: Option<Duration>,
    loads: Arc<AtomicUsize>,
}

impl MockModelSource {
    /// Creates a source whose model always picks the first label.
    #[must_use]
    pub fn new(labels: &[&str]) -> Self {
        let mut scores = vec![0.0; labels.len()];
        if let Some(first) = scores.first_mut() {
            *first = 1.0;
        }
        Self::with_model(labels, MockAnswerModel::fixed(scores))
    }

    /// Creates a source whose model picks `answers[n]` on the n-th call.
    #[must_use]
    pub fn answering(labels: &[&str], answers: &[usize]) -> Self {
        let script = answers
            .iter()
            .map(|&winner| {
                (0..labels.len())
                    .map(|i| if i == winner { 1.0 } else { 0.0 })
                    .collect()
            })
            .collect();
        Self::with_model(labels, MockAnswerModel::scripted(labels.len(), script))
    }

    /// Creates a source around a custom answer model.
    #[must_use]
    pub fn with_model(labels: &[&str], model: MockAnswerModel) -> Self {
        Self {
            labels: labels.iter().map(ToString::to_string).collect(),
            processor: MockPreprocessor::new(),
            model,
            failure: None,
            load_delay: None,
            loads: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Makes every load fail with `message`.
    #[must_use]
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    /// Sleeps for `delay` inside every load.
    #[must_use]
    pub const fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = Some(delay);
        self
    }

    /// Number of times `load()` was called.
    #[must_use]
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Number of forward passes run by bundles from this source.
    #[must_use]
    pub fn forward_count(&self) -> usize {
        self.model.call_count()
    }

    /// Questions encoded by bundles from this source, in call order.
    #[must_use]
    pub fn questions(&self) -> Vec<String> {
        self.processor.questions()
    }
}

impl ModelSource for MockModelSource {
    fn name(&self) -> &str {
        "mock"
    }

    fn load(&self) -> anyhow::Result<ModelBundle> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.load_delay {
            std::thread::sleep(delay);
        }
        if let Some(message) = &self.failure {
            anyhow::bail!("{message}");
        }

        ModelBundle::new(
            Box::new(self.processor.clone()),
            Box::new(self.model.clone()),
            LabelVocabulary::new(self.labels.clone())?,
        )
    }
}

/// Mock implementation of `ResultOutput` for testing.
///
/// Captures answers for later assertions.
pub struct MockResultOutput {
    answers: Arc<Mutex<Vec<ImageAnswers>>>,
    flush_count: Arc<Mutex<usize>>,
}

impl MockResultOutput {
    /// Creates a new mock output.
    #[must_use]
    pub fn new() -> Self {
        Self {
            answers: Arc::new(Mutex::new(Vec::new())),
            flush_count: Arc::new(Mutex::new(0)),
        }
    }

    /// Returns all captured answer sets.
    #[must_use]
    pub fn answers(&self) -> Vec<ImageAnswers> {
        self.answers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns the number of times `flush()` was called.
    #[must_use]
    pub fn flush_count(&self) -> usize {
        *self
            .flush_count
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MockResultOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultOutput for MockResultOutput {
    fn write(&self, answers: &ImageAnswers) -> anyhow::Result<()> {
        self.answers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(answers.clone());
        Ok(())
    }

    fn flush(&self) -> anyhow::Result<()> {
        *self
            .flush_count
            .lock()
            .unwrap_or_else(PoisonError::into_inner) += 1;
        Ok(())
    }
}

/// Mock implementation of `ProgressSink` for testing.
///
/// Captures events for later assertions.
pub struct MockProgressSink {
    events: Arc<Mutex<Vec<ProgressEvent>>>,
}

impl MockProgressSink {
    /// Creates a new mock progress sink.
    #[must_use]
    pub fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Returns all captured events.
    #[must_use]
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns the number of `Started` events.
    #[must_use]
    pub fn started_count(&self) -> usize {
        self.count(|e| matches!(e, ProgressEvent::Started { .. }))
    }

    /// Returns the questions of all `Answered` events, in order.
    #[must_use]
    pub fn answered_questions(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ProgressEvent::Answered { question, .. } => Some(question),
                _ => None,
            })
            .collect()
    }

    /// Returns the number of `Completed` events.
    #[must_use]
    pub fn completed_count(&self) -> usize {
        self.count(|e| matches!(e, ProgressEvent::Completed { .. }))
    }

    /// Returns the processed count of the `Finished` event, if any.
    #[must_use]
    pub fn finished_count(&self) -> Option<usize> {
        self.events().iter().find_map(|e| match e {
            ProgressEvent::Finished { processed } => Some(*processed),
            _ => None,
        })
    }

    fn count(&self, predicate: impl Fn(&ProgressEvent) -> bool) -> usize {
        self.events().iter().filter(|e| predicate(e)).count()
    }
}

impl Default for MockProgressSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for MockProgressSink {
    fn on_event(&self, event: ProgressEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}
