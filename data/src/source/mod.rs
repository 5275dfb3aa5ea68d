mod cifar100;
mod memory;

use std::{fmt, path::Path, str::FromStr, sync::Arc};

use serde::{Deserialize, Serialize};

pub use cifar100::{CIFAR100_FINE_LABELS, Cifar100Source, RECORD_LEN, parse_records};
pub use memory::InMemorySource;

use crate::{DataErr, Dataset, Result};

/// A partition of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    Train,
    Test,
}

impl FromStr for Split {
    type Err = DataErr;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "train" => Ok(Self::Train),
            "test" => Ok(Self::Test),
            other => Err(DataErr::UnknownSplit(other.to_string())),
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Train => f.write_str("train"),
            Self::Test => f.write_str("test"),
        }
    }
}

/// Somewhere labeled images can be loaded from, split by split.
pub trait DatasetSource {
    /// Loads every example of `split`.
    fn load(&self, split: Split) -> Result<Dataset>;

    /// The name of every class, indexed by label.
    fn class_names(&self) -> Arc<[String]>;
}

/// Resolves a dataset by name.
///
/// # Arguments
/// * `name` - The name of the dataset, `cifar100` or `uoft-cs/cifar100`.
/// * `root` - The directory holding the dataset files.
///
/// # Returns
/// The source for the dataset or an error if the name is unknown.
pub fn load_dataset(name: &str, root: &Path) -> Result<Box<dyn DatasetSource>> {
    match name.to_ascii_lowercase().as_str() {
        "cifar100" | "cifar-100" | "uoft-cs/cifar100" => Ok(Box::new(Cifar100Source::new(root))),
        _ => Err(DataErr::UnknownDataset(name.to_string())),
    }
}
