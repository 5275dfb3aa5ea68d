use std::sync::Arc;

use super::{DatasetSource, Split};
use crate::{Dataset, Example, Result};

/// A source over examples that are already in memory.
#[derive(Debug, Clone)]
pub struct InMemorySource {
    train: Vec<Example>,
    test: Vec<Example>,
    class_names: Arc<[String]>,
}

impl InMemorySource {
    pub fn new(train: Vec<Example>, test: Vec<Example>, class_names: Arc<[String]>) -> Self {
        Self {
            train,
            test,
            class_names,
        }
    }
}

impl DatasetSource for InMemorySource {
    fn load(&self, split: Split) -> Result<Dataset> {
        let examples = match split {
            Split::Train => self.train.clone(),
            Split::Test => self.test.clone(),
        };

        Dataset::new(examples, self.class_names.clone())
    }

    fn class_names(&self) -> Arc<[String]> {
        self.class_names.clone()
    }
}
