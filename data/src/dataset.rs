use std::sync::Arc;

use crate::{DataErr, Example, Result};

/// One split of a labeled image dataset held in memory.
///
/// Examples are never mutated once loaded.
#[derive(Debug, Clone)]
pub struct Dataset {
    examples: Vec<Example>,
    class_names: Arc<[String]>,
}

impl Dataset {
    /// Creates a new `Dataset`.
    ///
    /// # Arguments
    /// * `examples` - The labeled images.
    /// * `class_names` - The name of every class, indexed by label.
    ///
    /// # Returns
    /// A new `Dataset` or an error if a label has no class.
    pub fn new(examples: Vec<Example>, class_names: Arc<[String]>) -> Result<Self> {
        let num_classes = class_names.len();

        if let Some(example) = examples.iter().find(|e| e.label >= num_classes) {
            return Err(DataErr::LabelOutOfRange {
                label: example.label,
                num_classes,
            });
        }

        Ok(Self {
            examples,
            class_names,
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.examples.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    /// Returns the example at `idx`, `None` if out of bounds.
    #[inline]
    pub fn get(&self, idx: usize) -> Option<&Example> {
        self.examples.get(idx)
    }

    pub fn examples(&self) -> &[Example] {
        &self.examples
    }

    pub fn into_examples(self) -> Vec<Example> {
        self.examples
    }

    /// Keeps only the first `n` examples, handy for quick runs.
    pub fn take(mut self, n: usize) -> Self {
        self.examples.truncate(n);
        self
    }

    /// The label of every example, in order.
    pub fn labels(&self) -> Vec<usize> {
        self.examples.iter().map(|e| e.label).collect()
    }

    pub fn class_names(&self) -> &Arc<[String]> {
        &self.class_names
    }

    pub fn num_classes(&self) -> usize {
        self.class_names.len()
    }

    /// The name of the class `label`, `None` if out of range.
    pub fn class_name(&self, label: usize) -> Option<&str> {
        self.class_names.get(label).map(String::as_str)
    }
}
