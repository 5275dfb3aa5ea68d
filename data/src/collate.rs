use std::{borrow::Borrow, sync::Arc};

use ndarray::{Array4, Axis};

use crate::{Batch, DataErr, Example, ImageProcessor, ProcessedExample, Result};

/// Stacks processed examples into batches.
///
/// Holds the image processor the examples went through, shared with whoever preprocesses
/// them.
#[derive(Debug, Clone)]
pub struct Collator {
    processor: Arc<ImageProcessor>,
}

impl Collator {
    pub fn new(processor: Arc<ImageProcessor>) -> Self {
        Self { processor }
    }

    pub fn processor(&self) -> &Arc<ImageProcessor> {
        &self.processor
    }

    /// Stacks `examples` along a new leading axis, keeping their order.
    ///
    /// # Arguments
    /// * `examples` - Processed examples, all with the same `(channels, height, width)` shape.
    ///
    /// # Returns
    /// The batch, or an error if `examples` is empty or an example has a different shape than
    /// the first one.
    pub fn collate<E>(&self, examples: &[E]) -> Result<Batch>
    where
        E: Borrow<ProcessedExample>,
    {
        let first: &ProcessedExample = examples.first().ok_or(DataErr::EmptyBatch)?.borrow();
        let (c, h, w) = first.pixel_values.dim();

        let mut pixel_values = Array4::zeros((examples.len(), c, h, w));
        let mut labels = Vec::with_capacity(examples.len());

        for (index, (example, mut slot)) in examples
            .iter()
            .map(<E as Borrow<ProcessedExample>>::borrow)
            .zip(pixel_values.axis_iter_mut(Axis(0)))
            .enumerate()
        {
            if example.pixel_values.dim() != (c, h, w) {
                return Err(DataErr::ShapeMismatch {
                    index,
                    got: example.pixel_values.shape().to_vec(),
                    expected: vec![c, h, w],
                });
            }

            slot.assign(&example.pixel_values);
            labels.push(example.label);
        }

        Ok(Batch {
            pixel_values,
            labels,
        })
    }

    /// Preprocesses raw examples with the shared processor and collates them.
    pub fn collate_raw<E>(&self, examples: &[E]) -> Result<Batch>
    where
        E: Borrow<Example> + Sync,
    {
        let processed = self.processor.process_batch(examples);
        self.collate(&processed)
    }
}
