mod collate;
mod dataloader;
mod dataset;
pub mod error;
mod example;
mod preprocess;
pub mod source;

pub use collate::Collator;
pub use dataloader::{Batches, DataLoader, Records};
pub use dataset::Dataset;
pub use error::{DataErr, Result};
pub use example::{Batch, Example, ProcessedExample};
pub use preprocess::{ImageProcessor, Resample, Size, open_image};
pub use source::{DatasetSource, Split, load_dataset};
