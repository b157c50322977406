//! Answer label vocabulary of a classification-style VQA model.

use std::collections::HashMap;

use anyhow::{Context, Result};

/// Immutable mapping from output class index to answer label.
///
/// Construction guarantees the mapping is total over `0..len()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelVocabulary {
    labels: Vec<String>,
}

impl LabelVocabulary {
    /// Creates a vocabulary from labels ordered by class index.
    ///
    /// # Errors
    ///
    /// Returns an error if `labels` is empty.
    pub fn new(labels: Vec<String>) -> Result<Self> {
        if labels.is_empty() {
            anyhow::bail!("Label vocabulary is empty");
        }
        Ok(Self { labels })
    }

    /// Builds a vocabulary from an `id2label` table keyed by stringified index,
    /// as found in model `config.json` files.
    ///
    /// # Errors
    ///
    /// Returns an error if a key is not an index, an index is out of range,
    /// or any index in `0..num_labels` has no label.
    pub fn from_id2label(id2label: &HashMap<String, String>, num_labels: usize) -> Result<Self> {
        let mut slots: Vec<Option<String>> = vec![None; num_labels];

        for (key, label) in id2label {
            let index: usize = key
                .parse()
                .with_context(|| format!("Invalid label index '{key}'"))?;
            let slot = slots.get_mut(index).with_context(|| {
                format!("Label index {index} out of range for {num_labels} classes")
            })?;
            *slot = Some(label.clone());
        }

        let labels = slots
            .into_iter()
            .enumerate()
            .map(|(index, label)| label.with_context(|| format!("No label for class {index}")))
            .collect::<Result<Vec<_>>>()?;

        Self::new(labels)
    }

    /// Returns the label for a class index.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    /// Number of classes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Always false; kept for API symmetry with `len`.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Returns true if `label` is one of the vocabulary's answers.
    #[must_use]
    pub fn contains(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }
}
