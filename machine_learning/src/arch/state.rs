use std::{collections::BTreeMap, fmt};

use super::Param;

/// A named tensor detached from the model, the unit of checkpoints.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorData {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl TensorData {
    pub fn from_param(param: &Param) -> Self {
        Self {
            shape: param.shape().to_vec(),
            data: param.value().to_vec(),
        }
    }
}

/// The tensors of a model by parameter name, ordered by name.
pub type StateDict = BTreeMap<String, TensorData>;

/// The outcome of loading a `StateDict` into a model.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub loaded: Vec<String>,
    /// Model parameters without a tensor in the state dict.
    pub missing: Vec<String>,
    /// Tensors in the state dict that don't name any parameter.
    pub unexpected: Vec<String>,
    /// Parameters whose tensor had a different shape, left untouched.
    pub mismatched: Vec<String>,
}

/// The amount of trainable values against the total in a model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParamSummary {
    pub trainable: usize,
    pub total: usize,
}

impl ParamSummary {
    pub fn frozen(&self) -> usize {
        self.total - self.trainable
    }

    /// The percentage of trainable values, zero for an empty model.
    pub fn trainable_percent(&self) -> f64 {
        if self.total == 0 {
            return 0.;
        }

        100. * self.trainable as f64 / self.total as f64
    }
}

impl fmt::Display for ParamSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "trainable params: {} || all params: {} || trainable%: {:.4}",
            self.trainable,
            self.total,
            self.trainable_percent()
        )
    }
}
