use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// When to evaluate during training.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvalStrategy {
    No,
    /// Every `eval_steps` optimization steps.
    Steps,
    #[default]
    Epoch,
}

/// When to save a checkpoint of the trainable parameters during training.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveStrategy {
    #[default]
    No,
    Epoch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub output_dir: PathBuf,
    pub eval_strategy: EvalStrategy,
    pub eval_steps: Option<usize>,
    pub save_strategy: SaveStrategy,
    pub learning_rate: f32,
    pub per_device_train_batch_size: usize,
    pub per_device_eval_batch_size: usize,
    pub num_train_epochs: usize,
    pub weight_decay: f32,
    pub warmup_steps: usize,
    /// Logs the mean train loss every this many steps, never when zero.
    pub logging_steps: usize,
    /// Preprocesses the whole dataset up front, dropping the raw images.
    pub remove_unused_columns: bool,
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("vit-adapterplus-cifar100"),
            eval_strategy: EvalStrategy::Epoch,
            eval_steps: None,
            save_strategy: SaveStrategy::No,
            learning_rate: 1e-3,
            per_device_train_batch_size: 32,
            per_device_eval_batch_size: 32,
            num_train_epochs: 3,
            weight_decay: 1e-4,
            warmup_steps: 0,
            logging_steps: 50,
            remove_unused_columns: false,
            seed: 42,
        }
    }
}
