//! Model loading: safetensors weights and the at-most-once model bundle cache.

use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use once_cell::sync::OnceCell;
use safetensors::SafeTensors;
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

use crate::domain::LabelVocabulary;
use crate::ports::{AnswerModel, ModelSource, Preprocessor};

/// A ready-to-use model, its preprocessor and its answer labels.
pub struct ModelBundle {
    processor: Box<dyn Preprocessor>,
    model: Box<dyn AnswerModel>,
    labels: LabelVocabulary,
}

impl ModelBundle {
    /// Pairs a model with its preprocessor and label vocabulary.
    ///
    /// # Errors
    ///
    /// Returns an error if the vocabulary does not cover exactly the classes
    /// the model scores.
    pub fn new(
        processor: Box<dyn Preprocessor>,
        model: Box<dyn AnswerModel>,
        labels: LabelVocabulary,
    ) -> Result<Self> {
        if labels.len() != model.num_labels() {
            anyhow::bail!(
                "Label vocabulary has {} entries but the model scores {} classes",
                labels.len(),
                model.num_labels()
            );
        }
        Ok(Self {
            processor,
            model,
            labels,
        })
    }

    /// The input preprocessor.
    #[must_use]
    pub fn processor(&self) -> &dyn Preprocessor {
        self.processor.as_ref()
    }

    /// The answer model.
    #[must_use]
    pub fn model(&self) -> &dyn AnswerModel {
        self.model.as_ref()
    }

    /// The answer label vocabulary.
    #[must_use]
    pub const fn labels(&self) -> &LabelVocabulary {
        &self.labels
    }
}

/// Loads a model bundle on first use and shares it afterwards.
///
/// Concurrent first calls block until one initialization finishes; the
/// source is never asked to load twice once a bundle exists.
pub struct ModelLoader {
    source: Box<dyn ModelSource>,
    bundle: OnceCell<ModelBundle>,
}

impl ModelLoader {
    /// Creates a loader. Nothing is loaded until `get()` is called.
    #[must_use]
    pub fn new(source: impl ModelSource + 'static) -> Self {
        Self {
            source: Box::new(source),
            bundle: OnceCell::new(),
        }
    }

    /// Gets the bundle, loading it if necessary.
    ///
    /// # Errors
    ///
    /// Returns an error if the source fails to load the model.
    pub fn get(&self) -> Result<&ModelBundle> {
        self.bundle.get_or_try_init(|| {
            debug!("Loading model bundle from {}", self.source.name());
            self.source
                .load()
                .with_context(|| format!("Failed to load model {}", self.source.name()))
        })
    }

    /// Returns true if the bundle has been loaded.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.bundle.get().is_some()
    }

    /// Name of the underlying model source.
    #[must_use]
    pub fn source_name(&self) -> &str {
        self.source.name()
    }
}

/// Reads a safetensors file into a `VarBuilder` holding every tensor on `device`.
///
/// # Errors
///
/// Returns an error if the file cannot be read, is not valid safetensors, or
/// holds a dtype Candle does not support.
pub fn load_safetensors(path: impl AsRef<Path>, device: &Device) -> Result<VarBuilder<'static>> {
    let path = path.as_ref();
    debug!("Loading safetensors from {}", path.display());

    let data = std::fs::read(path)
        .with_context(|| format!("Failed to read model file: {}", path.display()))?;
    let tensors = SafeTensors::deserialize(&data)
        .with_context(|| format!("Failed to parse safetensors: {}", path.display()))?;

    let tensor_map = tensors
        .tensors()
        .into_iter()
        .map(|(name, view)| {
            let dtype = candle_dtype(view.dtype())
                .with_context(|| format!("Tensor '{name}' in {}", path.display()))?;
            let tensor = Tensor::from_raw_buffer(view.data(), dtype, view.shape(), device)
                .with_context(|| format!("Failed to create tensor '{name}'"))?;
            Ok((name, tensor))
        })
        .collect::<Result<HashMap<String, Tensor>>>()?;

    debug!("Loaded {} tensors", tensor_map.len());
    Ok(VarBuilder::from_tensors(tensor_map, DType::F32, device))
}

fn candle_dtype(dtype: safetensors::Dtype) -> Result<DType> {
    use safetensors::Dtype as S;
    Ok(match dtype {
        S::F32 => DType::F32,
        S::F64 => DType::F64,
        S::F16 => DType::F16,
        S::BF16 => DType::BF16,
        S::I64 => DType::I64,
        S::U8 => DType::U8,
        S::U32 => DType::U32,
        other => anyhow::bail!("Unsupported dtype: {other:?}"),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::ports::Encoding;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::NamedTempFile;

    struct NoopProcessor;

    impl Preprocessor for NoopProcessor {
        fn encode(&self, _: &image::DynamicImage, _: &str) -> Result<Encoding> {
            anyhow::bail!("not used")
        }
    }

    struct FixedModel(usize);

    impl AnswerModel for FixedModel {
        fn num_labels(&self) -> usize {
            self.0
        }

        fn forward(&self, _: &Encoding) -> Result<Vec<f32>> {
            Ok(vec![0.0; self.0])
        }
    }

    fn labels(n: usize) -> LabelVocabulary {
        LabelVocabulary::new((0..n).map(|i| format!("label{i}")).collect()).unwrap()
    }

    struct CountingSource {
        loads: Arc<AtomicUsize>,
        fail: bool,
    }

    impl ModelSource for CountingSource {
        fn name(&self) -> &str {
            "counting"
        }

        fn load(&self) -> Result<ModelBundle> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("registry unreachable");
            }
            ModelBundle::new(Box::new(NoopProcessor), Box::new(FixedModel(2)), labels(2))
        }
    }

    fn counting_loader(fail: bool) -> (ModelLoader, Arc<AtomicUsize>) {
        let loads = Arc::new(AtomicUsize::new(0));
        let source = CountingSource {
            loads: Arc::clone(&loads),
            fail,
        };
        (ModelLoader::new(source), loads)
    }

    #[test]
    fn test_bundle_rejects_label_mismatch() {
        let result = ModelBundle::new(Box::new(NoopProcessor), Box::new(FixedModel(3)), labels(2));
        assert!(result.is_err());
    }

    #[test]
    fn test_loader_is_lazy() {
        let (loader, loads) = counting_loader(false);
        assert!(!loader.is_loaded());
        assert_eq!(loads.load(Ordering::SeqCst), 0);
        assert_eq!(loader.source_name(), "counting");
    }

    #[test]
    fn test_loader_loads_once() {
        let (loader, loads) = counting_loader(false);

        let first = loader.get().unwrap() as *const ModelBundle;
        let second = loader.get().unwrap() as *const ModelBundle;

        assert_eq!(first, second);
        assert!(loader.is_loaded());
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_loader_loads_once_across_threads() {
        let (loader, loads) = counting_loader(false);

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    let bundle = loader.get().unwrap();
                    assert_eq!(bundle.labels().len(), 2);
                });
            }
        });

        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_loader_propagates_failure() {
        let (loader, _) = counting_loader(true);
        let err = loader.get().err().expect("load should fail");
        assert!(format!("{err:#}").contains("registry unreachable"));
        assert!(!loader.is_loaded());
    }

    fn safetensors_file(dtype: safetensors::Dtype, bytes: &[u8]) -> NamedTempFile {
        use safetensors::serialize;
        use safetensors::tensor::TensorView;

        let tensor = TensorView::new(dtype, vec![2, 2], bytes).expect("valid tensor view");
        let tensors = HashMap::from([("weight".to_string(), tensor)]);
        let serialized = serialize(&tensors, &None).expect("serialize");

        let mut file = NamedTempFile::new().expect("temp file");
        file.write_all(&serialized).expect("write");
        file
    }

    #[test]
    fn test_load_safetensors() {
        let data: Vec<f32> = vec![1.0, 2.0, 3.0, 4.0];
        let file = safetensors_file(safetensors::Dtype::F32, bytemuck::cast_slice(&data));

        let vb = load_safetensors(file.path(), &Device::Cpu).unwrap();
        let weight = vb.get((2, 2), "weight").unwrap();
        let values: Vec<Vec<f32>> = weight.to_vec2().unwrap();
        assert_eq!(values, vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
    }

    #[test]
    fn test_load_safetensors_missing_file() {
        let result = load_safetensors("/nonexistent/path.safetensors", &Device::Cpu);
        assert!(result.is_err());
    }

    #[test]
    fn test_load_safetensors_unsupported_dtype() {
        let data: Vec<i32> = vec![1, 2, 3, 4];
        let file = safetensors_file(safetensors::Dtype::I32, bytemuck::cast_slice(&data));
        assert!(load_safetensors(file.path(), &Device::Cpu).is_err());
    }
}
