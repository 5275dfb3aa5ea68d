use ndarray::{Array1, ArrayView1, ArrayView2};

use crate::{MlErr, Result};

/// The index of the highest score, the lowest index wins ties.
///
/// NaN counts as higher than any number, so the first NaN wins.
///
/// # Returns
/// `None` if `scores` is empty.
pub fn argmax(scores: ArrayView1<f32>) -> Option<usize> {
    scores
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (i, &score)| match best {
            Some((_, max)) if max.is_nan() || score <= max => best,
            _ => Some((i, score)),
        })
        .map(|(i, _)| i)
}

/// Turns a row of scores into probabilities.
pub fn softmax(scores: ArrayView1<f32>) -> Array1<f32> {
    let max = scores.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
    let exp = scores.mapv(|v| (v - max).exp());
    let sum = exp.sum();
    exp / sum
}

/// The fraction of rows whose highest score is at the index of their label.
///
/// # Arguments
/// * `scores` - A `(rows, num_labels)` matrix of logits or probabilities.
/// * `labels` - One label per row.
///
/// # Returns
/// The accuracy in `[0, 1]` or an error if the input is empty or the sizes don't match.
pub fn accuracy(scores: ArrayView2<f32>, labels: &[usize]) -> Result<f32> {
    let mut acc = Accuracy::default();
    acc.update(scores, labels)?;
    acc.compute().ok_or(MlErr::EmptyInput("accuracy"))
}

/// Accumulates correct predictions over many batches, so the accuracy of a whole evaluation
/// set can be computed batch by batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Accuracy {
    correct: usize,
    total: usize,
}

impl Accuracy {
    /// Adds a batch of predictions.
    ///
    /// # Arguments
    /// * `scores` - A `(rows, num_labels)` matrix of logits or probabilities.
    /// * `labels` - One label per row.
    ///
    /// # Returns
    /// The amount of correct predictions in this batch, or an error if the sizes don't match.
    pub fn update(&mut self, scores: ArrayView2<f32>, labels: &[usize]) -> Result<usize> {
        if scores.nrows() != labels.len() {
            return Err(MlErr::SizeMismatch {
                what: "accuracy labels",
                got: labels.len(),
                expected: scores.nrows(),
            });
        }

        let correct = scores
            .rows()
            .into_iter()
            .zip(labels)
            .filter(|(row, label)| argmax(row.view()) == Some(**label))
            .count();

        self.correct += correct;
        self.total += labels.len();
        Ok(correct)
    }

    pub fn correct(&self) -> usize {
        self.correct
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// The accuracy so far, `None` if nothing was added yet.
    pub fn compute(&self) -> Option<f32> {
        (self.total > 0).then(|| self.correct as f32 / self.total as f32)
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
