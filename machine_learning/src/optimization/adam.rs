use super::Optimizer;
use crate::{MlErr, Result};

/// Adam with decoupled weight decay (AdamW).
///
/// The decay shrinks the parameters directly, `p -= lr * weight_decay * p`, instead of being
/// added to the gradient.
#[derive(Debug, Clone)]
pub struct AdamW {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    beta1_t: f32,
    beta2_t: f32,
    epsilon: f32,
    weight_decay: f32,
    v: Box<[f32]>,
    s: Box<[f32]>,
}

impl AdamW {
    /// Creates a new `AdamW` optimizer.
    ///
    /// # Arguments
    /// * `len` - The amount of parameters this instance should hold.
    /// * `learning_rate` - The small coefficient that modulates the amount of training per update.
    /// * `beta1`, `beta2`, `epsilon` - Hyperparameters to the optimization algorithm.
    /// * `weight_decay` - The decoupled weight decay coefficient.
    ///
    /// # Returns
    /// A new `AdamW` instance.
    pub fn new(
        len: usize,
        learning_rate: f32,
        beta1: f32,
        beta2: f32,
        epsilon: f32,
        weight_decay: f32,
    ) -> Self {
        Self {
            learning_rate,
            beta1,
            beta2,
            beta1_t: 1.,
            beta2_t: 1.,
            epsilon,
            weight_decay,
            v: vec![0.; len].into_boxed_slice(),
            s: vec![0.; len].into_boxed_slice(),
        }
    }

    /// Creates a new `AdamW` optimizer with β1 0.9, β2 0.999 and ε 1e-8.
    pub fn with_defaults(len: usize, learning_rate: f32, weight_decay: f32) -> Self {
        Self::new(len, learning_rate, 0.9, 0.999, 1e-8, weight_decay)
    }

    pub fn weight_decay(&self) -> f32 {
        self.weight_decay
    }
}

impl Optimizer for AdamW {
    fn update_params(&mut self, params: &mut [f32], grad: &[f32]) -> Result<()> {
        if grad.len() != params.len() || params.len() != self.v.len() {
            return Err(MlErr::SizeMismatch {
                what: "gradient",
                got: grad.len(),
                expected: self.v.len(),
            });
        }

        let Self {
            learning_rate: lr,
            beta1: b1,
            beta2: b2,
            epsilon: eps,
            weight_decay: wd,
            ..
        } = *self;

        self.beta1_t *= b1;
        self.beta2_t *= b2;

        let bc1 = 1. - self.beta1_t;
        let bc2 = 1. - self.beta2_t;
        let step_size = lr / bc1;
        let bc2_sqrt = bc2.sqrt();

        params
            .iter_mut()
            .zip(grad)
            .zip(self.v.iter_mut())
            .zip(self.s.iter_mut())
            .for_each(|(((p, g), v), s)| {
                *p -= lr * wd * *p;
                *v = b1 * *v + (1. - b1) * g;
                *s = b2 * *s + (1. - b2) * g.powi(2);
                *p -= step_size * *v / (s.sqrt() / bc2_sqrt + eps);
            });

        Ok(())
    }

    fn set_learning_rate(&mut self, learning_rate: f32) {
        self.learning_rate = learning_rate;
    }
}
