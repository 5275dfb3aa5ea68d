mod adapter;
mod dataset;
mod hub;
mod model;
mod training;
mod validate;

use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

pub use adapter::AdapterConfig;
pub use dataset::DatasetConfig;
pub use hub::HubConfig;
pub use model::ModelConfig;
pub use training::{EvalStrategy, SaveStrategy, TrainingConfig};
pub use validate::validate;

use crate::Result;

/// Everything a fine-tuning run needs, usually read from a JSON file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub model: ModelConfig,
    pub adapter: AdapterConfig,
    pub dataset: DatasetConfig,
    pub training: TrainingConfig,
    pub hub: HubConfig,
}

impl RunConfig {
    /// Reads a run config from a JSON file, missing fields take their default.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn validate(&self) -> Result<()> {
        validate(self)
    }
}
