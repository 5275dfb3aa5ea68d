use ndarray::{Array2, ArrayView2};

use super::LossFn;
use crate::{MlErr, Result, arch::layers::softmax_rows};

/// Softmax cross entropy over integer labels, averaged over the batch.
#[derive(Debug, Default, Clone, Copy)]
pub struct CrossEntropy;

impl CrossEntropy {
    /// Returns a new `CrossEntropy`.
    pub fn new() -> Self {
        Self
    }

    fn probs(&self, logits: ArrayView2<f32>, labels: &[usize]) -> Result<Array2<f32>> {
        let (rows, num_labels) = logits.dim();

        if rows == 0 {
            return Err(MlErr::EmptyInput("cross entropy"));
        }

        if rows != labels.len() {
            return Err(MlErr::SizeMismatch {
                what: "cross entropy labels",
                got: labels.len(),
                expected: rows,
            });
        }

        if let Some(&label) = labels.iter().find(|&&label| label >= num_labels) {
            return Err(MlErr::LabelOutOfRange { label, num_labels });
        }

        let mut probs = logits.to_owned();
        softmax_rows(&mut probs);
        Ok(probs)
    }
}

impl LossFn for CrossEntropy {
    fn loss(&self, logits: ArrayView2<f32>, labels: &[usize]) -> Result<f32> {
        let probs = self.probs(logits, labels)?;

        let total: f32 = labels
            .iter()
            .enumerate()
            .map(|(i, &label)| -probs[[i, label]].max(f32::MIN_POSITIVE).ln())
            .sum();

        Ok(total / labels.len() as f32)
    }

    fn loss_prime(&self, logits: ArrayView2<f32>, labels: &[usize]) -> Result<Array2<f32>> {
        let mut d = self.probs(logits, labels)?;

        for (i, &label) in labels.iter().enumerate() {
            d[[i, label]] -= 1.;
        }

        Ok(d / labels.len() as f32)
    }

    fn loss_and_prime(
        &self,
        logits: ArrayView2<f32>,
        labels: &[usize],
    ) -> Result<(f32, Array2<f32>)> {
        let mut d = self.probs(logits, labels)?;
        let n = labels.len() as f32;
        let mut total = 0.;

        for (i, &label) in labels.iter().enumerate() {
            total -= d[[i, label]].max(f32::MIN_POSITIVE).ln();
            d[[i, label]] -= 1.;
        }

        Ok((total / n, d / n))
    }
}
