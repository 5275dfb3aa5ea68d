use std::collections::BTreeMap;

use crate::{
    MlErr, Result,
    arch::{Model, Param, ParamSummary},
    optimization::{AdamW, Optimizer},
};

/// Owns one optimizer per trainable parameter of a model and applies them after every
/// backward pass.
///
/// The set of trainable parameters is fixed when the manager is built, parameters frozen at
/// that moment are never touched.
#[derive(Debug)]
pub struct ParamManager<O: Optimizer> {
    optimizers: BTreeMap<String, O>,
    summary: ParamSummary,
}

impl<O: Optimizer> ParamManager<O> {
    /// Creates a new `ParamManager`.
    ///
    /// # Arguments
    /// * `model` - The model whose trainable parameters will be optimized.
    /// * `make_optimizer` - Builds the optimizer of a trainable parameter given its name.
    ///
    /// # Returns
    /// A new `ParamManager` or an error if the model has no trainable parameters.
    pub fn new<M, F>(model: &mut M, mut make_optimizer: F) -> Result<Self>
    where
        M: Model + ?Sized,
        F: FnMut(&str, &Param) -> O,
    {
        let mut optimizers = BTreeMap::new();

        model.visit_params(&mut |name, param| {
            if param.is_trainable() {
                optimizers.insert(name.to_string(), make_optimizer(name, param));
            }
            Ok(())
        })?;

        if optimizers.is_empty() {
            return Err(MlErr::InvalidConfig(
                "the model has no trainable parameters".into(),
            ));
        }

        let summary = model.param_summary()?;
        Ok(Self {
            optimizers,
            summary,
        })
    }

    pub fn summary(&self) -> ParamSummary {
        self.summary
    }

    /// The names of the optimized parameters, in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.optimizers.keys().map(String::as_str)
    }

    /// Updates every trainable parameter of `model` with its accumulated gradient.
    ///
    /// # Arguments
    /// * `model` - The model this manager was built for.
    /// * `learning_rate` - The learning rate for this step.
    ///
    /// # Returns
    /// An error if `model` has a trainable parameter this manager doesn't know about.
    pub fn optimize<M>(&mut self, model: &mut M, learning_rate: f32) -> Result<()>
    where
        M: Model + ?Sized,
    {
        let optimizers = &mut self.optimizers;

        model.visit_params(&mut |name, param| {
            let (value, Some(grad)) = param.value_and_grad_mut() else {
                return Ok(());
            };

            let optimizer = optimizers
                .get_mut(name)
                .ok_or_else(|| MlErr::MissingParam(name.to_string()))?;

            optimizer.set_learning_rate(learning_rate);
            optimizer.update_params(value, grad)
        })
    }
}

impl ParamManager<AdamW> {
    /// Creates a `ParamManager` with an `AdamW` optimizer per parameter. Biases and layer norm
    /// weights get no weight decay.
    ///
    /// # Arguments
    /// * `model` - The model whose trainable parameters will be optimized.
    /// * `weight_decay` - The decoupled weight decay for the rest of the parameters.
    pub fn adam_w<M>(model: &mut M, weight_decay: f32) -> Result<Self>
    where
        M: Model + ?Sized,
    {
        Self::new(model, |name, param| {
            let decay = if decays(name) { weight_decay } else { 0. };
            AdamW::with_defaults(param.len(), 0., decay)
        })
    }
}

/// Whether the parameter named `name` takes weight decay.
pub fn decays(name: &str) -> bool {
    let is_norm = name.contains("layernorm") || name.contains("norm_after");
    !(name.ends_with(".bias") || is_norm)
}
