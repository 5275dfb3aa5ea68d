use std::path::PathBuf;

use machine_learning::arch::ViTConfig;
use serde::{Deserialize, Serialize};

/// The pretrained backbone to fine-tune.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// The name of the pretrained model, recorded in every saved adapter.
    pub name: String,
    /// A safetensors file with the backbone weights. The backbone is randomly initialized
    /// when missing.
    pub checkpoint: Option<PathBuf>,
    pub vit: ViTConfig,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: "google/vit-base-patch16-224-in21k".into(),
            checkpoint: None,
            vit: ViTConfig::default(),
        }
    }
}
