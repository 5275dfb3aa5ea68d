use std::path::PathBuf;

use data::{ImageProcessor, Split};
use serde::{Deserialize, Serialize};

/// Where the examples come from and how they're preprocessed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    pub name: String,
    /// The directory holding the dataset files.
    pub root: PathBuf,
    pub train_split: Split,
    pub eval_split: Split,
    /// Keeps only the first examples of the train split.
    pub max_train_samples: Option<usize>,
    /// Keeps only the first examples of the evaluation split.
    pub max_eval_samples: Option<usize>,
    pub processor: ImageProcessor,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            name: "uoft-cs/cifar100".into(),
            root: PathBuf::from("data/cifar100"),
            train_split: Split::Train,
            eval_split: Split::Test,
            max_train_samples: None,
            max_eval_samples: None,
            processor: ImageProcessor::default(),
        }
    }
}
