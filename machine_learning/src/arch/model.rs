use ndarray::{Array2, ArrayView2, ArrayView4};

use super::{LoadReport, Param, ParamSummary, ParamVisitor, StateDict, TensorData};
use crate::{MlErr, Result};

/// Whether a forward pass is part of training or not. Stochastic layers, like drop path,
/// are only active while training.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Train,
    Eval,
}

pub trait Model {
    /// Makes a forward pass through the model.
    ///
    /// # Arguments
    /// * `pixel_values` - A `(batch, channels, height, width)` tensor.
    /// * `mode` - Whether the pass is part of training.
    ///
    /// # Returns
    /// The `(batch, num_labels)` logits.
    fn forward(&mut self, pixel_values: ArrayView4<f32>, mode: Mode) -> Result<Array2<f32>>;

    /// Back propagates the gradient of the loss with respect to the logits of the last forward
    /// pass, accumulating into the gradient buffer of every trainable parameter.
    fn backward(&mut self, d_logits: ArrayView2<f32>) -> Result<()>;

    /// Walks over every parameter of the model in a fixed order together with its name.
    fn visit_params(&mut self, f: &mut ParamVisitor) -> Result<()>;

    /// Counts the trainable and total amount of values in the model.
    fn param_summary(&mut self) -> Result<ParamSummary> {
        let mut summary = ParamSummary::default();

        self.visit_params(&mut |_, param| {
            summary.total += param.len();
            if param.is_trainable() {
                summary.trainable += param.len();
            }
            Ok(())
        })?;

        Ok(summary)
    }

    /// Sets the gradient of every trainable parameter back to zero.
    fn zero_grad(&mut self) -> Result<()> {
        self.visit_params(&mut |_, param| {
            param.zero_grad();
            Ok(())
        })
    }

    /// Exports the model's tensors by name.
    ///
    /// # Arguments
    /// * `trainable_only` - Whether to skip frozen parameters.
    fn state_dict(&mut self, trainable_only: bool) -> Result<StateDict> {
        let mut state = StateDict::new();

        self.visit_params(&mut |name, param: &mut Param| {
            if !trainable_only || param.is_trainable() {
                state.insert(name.to_string(), TensorData::from_param(param));
            }
            Ok(())
        })?;

        Ok(state)
    }

    /// Copies the tensors in `state` into the parameters with the same name.
    ///
    /// Mismatching shapes are reported instead of failing so callers can decide what to keep.
    ///
    /// # Returns
    /// Which names were loaded, missing from `state`, unknown to the model or mismatched.
    fn load_state_dict(&mut self, state: &StateDict) -> Result<LoadReport> {
        let mut report = LoadReport::default();

        self.visit_params(&mut |name, param| {
            let Some(tensor) = state.get(name) else {
                report.missing.push(name.to_string());
                return Ok(());
            };

            match param.assign(name, &tensor.shape, &tensor.data) {
                Ok(()) => report.loaded.push(name.to_string()),
                Err(MlErr::ShapeMismatch { .. }) => report.mismatched.push(name.to_string()),
                Err(e) => return Err(e),
            }
            Ok(())
        })?;

        report.unexpected = state
            .keys()
            .filter(|name| !report.loaded.contains(*name) && !report.mismatched.contains(*name))
            .cloned()
            .collect();

        Ok(report)
    }
}

impl<M: Model + ?Sized> Model for &mut M {
    fn forward(&mut self, pixel_values: ArrayView4<f32>, mode: Mode) -> Result<Array2<f32>> {
        (**self).forward(pixel_values, mode)
    }

    fn backward(&mut self, d_logits: ArrayView2<f32>) -> Result<()> {
        (**self).backward(d_logits)
    }

    fn visit_params(&mut self, f: &mut ParamVisitor) -> Result<()> {
        (**self).visit_params(f)
    }
}
