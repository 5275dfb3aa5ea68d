use image::RgbImage;
use ndarray::{Array3, Array4};

/// A labeled RGB image as it comes out of a dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct Example {
    pub image: RgbImage,
    pub label: usize,
}

impl Example {
    pub fn new(image: RgbImage, label: usize) -> Self {
        Self { image, label }
    }
}

/// An example whose image was turned into a `(channels, height, width)` tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedExample {
    pub pixel_values: Array3<f32>,
    pub label: usize,
}

/// A group of processed examples stacked along a leading batch axis.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// A `(batch, channels, height, width)` tensor.
    pub pixel_values: Array4<f32>,
    pub labels: Vec<usize>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}
