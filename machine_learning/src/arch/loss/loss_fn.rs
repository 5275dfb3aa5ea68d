use ndarray::{Array2, ArrayView2};

use crate::Result;

/// A loss over a batch of `(batch, num_labels)` logits and integer class labels.
pub trait LossFn {
    fn loss(&self, logits: ArrayView2<f32>, labels: &[usize]) -> Result<f32>;

    /// The gradient of the loss with respect to the logits.
    fn loss_prime(&self, logits: ArrayView2<f32>, labels: &[usize]) -> Result<Array2<f32>>;

    /// Computes both the loss and its gradient in one go.
    fn loss_and_prime(
        &self,
        logits: ArrayView2<f32>,
        labels: &[usize],
    ) -> Result<(f32, Array2<f32>)> {
        Ok((
            self.loss(logits, labels)?,
            self.loss_prime(logits, labels)?,
        ))
    }
}
