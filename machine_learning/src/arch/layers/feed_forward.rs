use ndarray::{Array2, ArrayView2};

use super::Dense;
use crate::{
    Result,
    arch::{ParamVisitor, activations::Activation},
};

/// The position-wise feed forward network of an encoder block: `output(act(intermediate(x)))`.
#[derive(Debug, Clone)]
pub struct FeedForward {
    intermediate: Dense,
    activation: Activation,
    output: Dense,
}

impl FeedForward {
    pub fn new(intermediate: Dense, activation: Activation, output: Dense) -> Self {
        Self {
            intermediate,
            activation,
            output,
        }
    }

    pub fn set_trainable(&mut self, trainable: bool) {
        self.intermediate.set_trainable(trainable);
        self.output.set_trainable(trainable);
    }

    pub fn is_trainable(&self) -> bool {
        self.intermediate.is_trainable() || self.output.is_trainable()
    }

    pub fn forward(&mut self, x: ArrayView2<f32>) -> Result<Array2<f32>> {
        let z = self.intermediate.forward(x)?;
        let a = self.activation.forward(z.view());
        self.output.forward(a.view())
    }

    pub fn backward(&mut self, d: ArrayView2<f32>) -> Result<Array2<f32>> {
        let d = self.output.backward(d)?;
        let d = self.activation.backward(d)?;
        self.intermediate.backward(d.view())
    }

    pub fn visit_params(&mut self, prefix: &str, f: &mut ParamVisitor) -> Result<()> {
        self.intermediate
            .visit_params(&format!("{prefix}.intermediate.dense"), f)?;
        self.output.visit_params(&format!("{prefix}.output.dense"), f)
    }
}
