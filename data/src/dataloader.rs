use std::sync::Arc;

use log::info;
use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};

use crate::{Batch, Collator, DataErr, Dataset, Example, ProcessedExample, Result};

/// How a loader keeps its examples between epochs.
#[derive(Debug, Clone)]
pub enum Records {
    /// Raw images, preprocessed every time they're batched.
    Lazy(Vec<Example>),
    /// Images preprocessed once up front.
    Eager(Vec<ProcessedExample>),
}

impl Records {
    #[inline]
    pub fn len(&self) -> usize {
        match self {
            Self::Lazy(examples) => examples.len(),
            Self::Eager(examples) => examples.len(),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Produces collated batches from a dataset, one epoch per call to `batches`.
#[derive(Debug)]
pub struct DataLoader {
    records: Records,
    collator: Collator,
    class_names: Arc<[String]>,
    batch_size: usize,
    order: Vec<usize>,
    rng: Option<StdRng>,
}

impl DataLoader {
    /// Creates a new `DataLoader`.
    ///
    /// # Arguments
    /// * `dataset` - The examples to batch.
    /// * `collator` - Stacks examples into batches, its processor preprocesses them.
    /// * `batch_size` - The amount of examples in every batch but maybe the last one.
    /// * `eager` - Whether to preprocess every image now instead of once per epoch.
    ///
    /// # Returns
    /// A new `DataLoader` or an error if `batch_size` is zero.
    pub fn new(
        dataset: Dataset,
        collator: Collator,
        batch_size: usize,
        eager: bool,
    ) -> Result<Self> {
        if batch_size == 0 {
            return Err(DataErr::InvalidConfig("batch_size must be positive".into()));
        }

        let class_names = dataset.class_names().clone();
        let examples = dataset.into_examples();

        let records = if eager {
            info!("preprocessing {} examples up front", examples.len());
            Records::Eager(collator.processor().process_batch(&examples))
        } else {
            Records::Lazy(examples)
        };

        let order = (0..records.len()).collect();

        Ok(Self {
            records,
            collator,
            class_names,
            batch_size,
            order,
            rng: None,
        })
    }

    /// Shuffles the examples at the start of every epoch with a generator seeded by `seed`.
    pub fn with_shuffle(mut self, seed: u64) -> Self {
        self.rng = Some(StdRng::seed_from_u64(seed));
        self
    }

    /// The amount of examples.
    #[inline]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[inline]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// The amount of batches in an epoch, counting a smaller last one.
    pub fn num_batches(&self) -> usize {
        self.len().div_ceil(self.batch_size)
    }

    pub fn class_names(&self) -> &Arc<[String]> {
        &self.class_names
    }

    pub fn records(&self) -> &Records {
        &self.records
    }

    /// Starts a new epoch.
    ///
    /// # Returns
    /// An iterator over the epoch's batches, in a new order if shuffling is on.
    pub fn batches(&mut self) -> Batches<'_> {
        if let Some(rng) = self.rng.as_mut() {
            self.order.shuffle(rng);
        }

        Batches {
            loader: self,
            cursor: 0,
        }
    }

    fn batch(&self, idxs: &[usize]) -> Result<Batch> {
        match &self.records {
            Records::Lazy(examples) => {
                let examples: Vec<&Example> = idxs.iter().map(|&i| &examples[i]).collect();
                self.collator.collate_raw(&examples)
            }
            Records::Eager(examples) => {
                let examples: Vec<&ProcessedExample> =
                    idxs.iter().map(|&i| &examples[i]).collect();
                self.collator.collate(&examples)
            }
        }
    }
}

/// The batches of a single epoch.
pub struct Batches<'a> {
    loader: &'a DataLoader,
    cursor: usize,
}

impl Iterator for Batches<'_> {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        let order = &self.loader.order;
        if self.cursor >= order.len() {
            return None;
        }

        let end = (self.cursor + self.loader.batch_size).min(order.len());
        let idxs = &order[self.cursor..end];
        self.cursor = end;

        Some(self.loader.batch(idxs))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = (self.loader.order.len() - self.cursor).div_ceil(self.loader.batch_size);
        (left, Some(left))
    }
}

impl ExactSizeIterator for Batches<'_> {}

#[cfg(test)]
mod tests {
    use image::{Rgb, RgbImage};

    use super::*;
    use crate::ImageProcessor;

    fn dataset(n: usize) -> Dataset {
        let examples = (0..n)
            .map(|i| Example::new(RgbImage::from_pixel(8, 8, Rgb([i as u8, 0, 0])), i))
            .collect();
        let names = (0..n).map(|i| format!("class_{i}")).collect();

        Dataset::new(examples, names).unwrap()
    }

    fn collator() -> Collator {
        Collator::new(Arc::new(ImageProcessor::with_size(4)))
    }

    fn epoch_labels(loader: &mut DataLoader) -> Vec<Vec<usize>> {
        loader
            .batches()
            .map(|batch| batch.unwrap().labels)
            .collect()
    }

    #[test]
    fn batches_in_order_with_smaller_last_batch() {
        let mut loader = DataLoader::new(dataset(7), collator(), 3, false).unwrap();

        assert_eq!(loader.num_batches(), 3);
        assert_eq!(loader.batches().len(), 3);
        assert_eq!(
            epoch_labels(&mut loader),
            vec![vec![0, 1, 2], vec![3, 4, 5], vec![6]]
        );

        let batch = loader.batches().next().unwrap().unwrap();
        assert_eq!(batch.pixel_values.dim(), (3, 3, 4, 4));
    }

    #[test]
    fn eager_and_lazy_batches_match() {
        let mut lazy = DataLoader::new(dataset(5), collator(), 2, false).unwrap();
        let mut eager = DataLoader::new(dataset(5), collator(), 2, true).unwrap();

        assert!(matches!(eager.records(), Records::Eager(_)));
        for (l, e) in lazy.batches().zip(eager.batches()) {
            assert_eq!(l.unwrap(), e.unwrap());
        }
    }

    #[test]
    fn shuffle_is_seeded_and_changes_per_epoch() {
        let mut a = DataLoader::new(dataset(20), collator(), 4, true)
            .unwrap()
            .with_shuffle(7);
        let mut b = DataLoader::new(dataset(20), collator(), 4, true)
            .unwrap()
            .with_shuffle(7);

        let first = epoch_labels(&mut a);
        let second = epoch_labels(&mut a);
        assert_eq!(first, epoch_labels(&mut b));
        assert_ne!(first, second);

        let mut seen: Vec<usize> = first.into_iter().flatten().collect();
        seen.sort();
        assert_eq!(seen, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn zero_batch_size() {
        assert!(matches!(
            DataLoader::new(dataset(2), collator(), 0, false),
            Err(DataErr::InvalidConfig(_))
        ));
    }

    #[test]
    fn empty_dataset_has_no_batches() {
        let mut loader = DataLoader::new(dataset(0), collator(), 4, false).unwrap();

        assert!(loader.is_empty());
        assert_eq!(loader.num_batches(), 0);
        assert!(loader.batches().next().is_none());
    }
}
