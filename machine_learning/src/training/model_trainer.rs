use log::debug;
use ndarray::{Array2, ArrayView4};

use super::ParamManager;
use crate::{
    Result,
    arch::{Mode, Model, loss::LossFn},
    optimization::{LinearSchedule, Optimizer},
};

/// A model `Trainer`. Contains the relevant components needed for training a model,
/// including the model itself.
pub struct ModelTrainer<M, O, L>
where
    M: Model,
    O: Optimizer,
    L: LossFn,
{
    model: M,
    params: ParamManager<O>,
    loss_fn: L,
    schedule: LinearSchedule,
    step: usize,
}

impl<M, O, L> ModelTrainer<M, O, L>
where
    M: Model,
    O: Optimizer,
    L: LossFn,
{
    /// Returns a new `ModelTrainer`.
    ///
    /// # Arguments
    /// * `model` - The model that will be trained.
    /// * `params` - The optimizers of the model's trainable parameters.
    /// * `loss_fn` - The loss function used to measure the difference between a model's output and the expected one.
    /// * `schedule` - The learning rate for every optimization step.
    pub fn new(model: M, params: ParamManager<O>, loss_fn: L, schedule: LinearSchedule) -> Self {
        Self {
            model,
            params,
            loss_fn,
            schedule,
            step: 0,
        }
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut M {
        &mut self.model
    }

    pub fn into_model(self) -> M {
        self.model
    }

    pub fn param_manager(&self) -> &ParamManager<O> {
        &self.params
    }

    /// The amount of optimization steps taken so far.
    pub fn step(&self) -> usize {
        self.step
    }

    /// The learning rate the next optimization step will use.
    pub fn learning_rate(&self) -> f32 {
        self.schedule.lr_at(self.step)
    }

    /// Makes one optimization step over a batch.
    ///
    /// # Arguments
    /// * `pixel_values` - A `(batch, channels, height, width)` tensor.
    /// * `labels` - One class label per image.
    ///
    /// # Returns
    /// The loss of the batch before the update.
    pub fn train_step(&mut self, pixel_values: ArrayView4<f32>, labels: &[usize]) -> Result<f32> {
        self.model.zero_grad()?;

        let logits = self.model.forward(pixel_values, Mode::Train)?;
        let (loss, d_logits) = self.loss_fn.loss_and_prime(logits.view(), labels)?;
        self.model.backward(d_logits.view())?;

        let lr = self.learning_rate();
        self.params.optimize(&mut self.model, lr)?;
        self.step += 1;

        debug!(step = self.step, loss = loss, lr = lr; "train step");
        Ok(loss)
    }

    /// Evaluates the model over a batch without updating it.
    ///
    /// # Returns
    /// The loss and the `(batch, num_labels)` logits.
    pub fn eval_step(
        &mut self,
        pixel_values: ArrayView4<f32>,
        labels: &[usize],
    ) -> Result<(f32, Array2<f32>)> {
        let logits = self.model.forward(pixel_values, Mode::Eval)?;
        let loss = self.loss_fn.loss(logits.view(), labels)?;
        Ok((loss, logits))
    }

    /// Runs the model in evaluation mode.
    pub fn predict(&mut self, pixel_values: ArrayView4<f32>) -> Result<Array2<f32>> {
        self.model.forward(pixel_values, Mode::Eval)
    }
}

#[cfg(test)]
mod tests {
    use ndarray::Array4;

    use super::*;
    use crate::{
        arch::{AdapterPlusConfig, VisionTransformer, ViTConfig, loss::CrossEntropy},
        optimization::GradientDescent,
    };

    fn trainer(lr: f32) -> ModelTrainer<VisionTransformer, GradientDescent, CrossEntropy> {
        let config = ViTConfig {
            image_size: 4,
            patch_size: 2,
            num_channels: 3,
            hidden_size: 4,
            num_hidden_layers: 1,
            num_attention_heads: 1,
            intermediate_size: 8,
            num_labels: 3,
            ..Default::default()
        };

        let mut model = VisionTransformer::new(config, 0).unwrap();
        let adapter = AdapterPlusConfig {
            stochastic_depth: 0.,
            ..Default::default()
        };
        model.add_adapter("a", &adapter).unwrap();
        model.train_adapter().unwrap();

        let params = ParamManager::new(&mut model, |_, _| GradientDescent::new(lr)).unwrap();
        ModelTrainer::new(model, params, CrossEntropy::new(), LinearSchedule::new(lr, 0, 1000))
    }

    fn batch() -> (Array4<f32>, Vec<usize>) {
        let x = Array4::from_shape_fn((3, 3, 4, 4), |(b, c, y, x)| {
            ((b * 48 + c * 16 + y * 4 + x) as f32 * 0.7).sin()
        });
        (x, vec![0, 1, 2])
    }

    #[test]
    fn loss_goes_down_on_a_fixed_batch() {
        let mut trainer = trainer(0.5);
        let (x, labels) = batch();

        let first = trainer.train_step(x.view(), &labels).unwrap();
        for _ in 0..30 {
            trainer.train_step(x.view(), &labels).unwrap();
        }
        let (last, _) = trainer.eval_step(x.view(), &labels).unwrap();

        assert!(last < first, "{last} >= {first}");
        assert_eq!(trainer.step(), 31);
    }

    #[test]
    fn frozen_params_do_not_change() {
        let mut trainer = trainer(0.5);
        let (x, labels) = batch();

        let before = trainer.model_mut().state_dict(false).unwrap();
        for _ in 0..3 {
            trainer.train_step(x.view(), &labels).unwrap();
        }
        let after = trainer.model_mut().state_dict(false).unwrap();

        let mut changed = 0;
        for (name, tensor) in &before {
            let trainable = name.contains(".adapters.") || name.starts_with("classifier.");
            if !trainable {
                assert_eq!(tensor, &after[name], "{name} changed");
            } else if tensor != &after[name] {
                changed += 1;
            }
        }

        assert!(changed > 0);
    }

    #[test]
    fn predict_shape() {
        let mut trainer = trainer(0.1);
        let (x, _) = batch();

        assert_eq!(trainer.predict(x.view()).unwrap().dim(), (3, 3));
    }
}
