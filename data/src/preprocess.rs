use std::{borrow::Borrow, borrow::Cow, path::Path};

use image::{
    RgbImage,
    imageops::{self, FilterType},
};
use ndarray::Array3;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{DataErr, Example, ProcessedExample, Result};

/// The resampling filter used when resizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resample {
    Nearest,
    #[default]
    Bilinear,
    Bicubic,
    Lanczos,
}

impl From<Resample> for FilterType {
    fn from(value: Resample) -> Self {
        match value {
            Resample::Nearest => FilterType::Nearest,
            Resample::Bilinear => FilterType::Triangle,
            Resample::Bicubic => FilterType::CatmullRom,
            Resample::Lanczos => FilterType::Lanczos3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Size {
    pub height: usize,
    pub width: usize,
}

impl Default for Size {
    fn default() -> Self {
        Self {
            height: 224,
            width: 224,
        }
    }
}

/// Turns RGB images into the normalized channel-first tensors a ViT expects: resize, then
/// rescale, then normalize per channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageProcessor {
    pub do_resize: bool,
    pub size: Size,
    pub resample: Resample,
    pub do_rescale: bool,
    pub rescale_factor: f32,
    pub do_normalize: bool,
    pub image_mean: [f32; 3],
    pub image_std: [f32; 3],
}

impl Default for ImageProcessor {
    fn default() -> Self {
        Self {
            do_resize: true,
            size: Size::default(),
            resample: Resample::Bilinear,
            do_rescale: true,
            rescale_factor: 1. / 255.,
            do_normalize: true,
            image_mean: [0.5; 3],
            image_std: [0.5; 3],
        }
    }
}

impl ImageProcessor {
    /// A default processor producing `size`×`size` images.
    pub fn with_size(size: usize) -> Self {
        Self {
            size: Size {
                height: size,
                width: size,
            },
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.size.height == 0 || self.size.width == 0 {
            return Err(DataErr::InvalidConfig(format!(
                "the image size must be positive, got {}x{}",
                self.size.height, self.size.width
            )));
        }

        if self.do_normalize && self.image_std.contains(&0.) {
            return Err(DataErr::InvalidConfig(
                "image_std can't have zeros when normalizing".into(),
            ));
        }

        Ok(())
    }

    /// Preprocesses a single image.
    ///
    /// # Arguments
    /// * `image` - An RGB image of any resolution.
    ///
    /// # Returns
    /// A `(3, height, width)` tensor, `size` when resizing is on, the image's own otherwise.
    pub fn process(&self, image: &RgbImage) -> Array3<f32> {
        let (width, height) = (self.size.width as u32, self.size.height as u32);

        let image = if self.do_resize && image.dimensions() != (width, height) {
            Cow::Owned(imageops::resize(image, width, height, self.resample.into()))
        } else {
            Cow::Borrowed(image)
        };

        let (w, h) = image.dimensions();
        let scale = if self.do_rescale { self.rescale_factor } else { 1. };

        Array3::from_shape_fn((3, h as usize, w as usize), |(c, y, x)| {
            let v = image.get_pixel(x as u32, y as u32)[c] as f32 * scale;

            if self.do_normalize {
                (v - self.image_mean[c]) / self.image_std[c]
            } else {
                v
            }
        })
    }

    /// Preprocesses an example, the label is carried over unchanged.
    pub fn preprocess(&self, example: &Example) -> ProcessedExample {
        ProcessedExample {
            pixel_values: self.process(&example.image),
            label: example.label,
        }
    }

    /// Preprocesses many examples in parallel, keeping their order.
    pub fn process_batch<E>(&self, examples: &[E]) -> Vec<ProcessedExample>
    where
        E: Borrow<Example> + Sync,
    {
        examples
            .par_iter()
            .map(|example| self.preprocess(example.borrow()))
            .collect()
    }
}

/// Decodes an image file into RGB.
pub fn open_image(path: impl AsRef<Path>) -> Result<RgbImage> {
    Ok(image::open(path)?.to_rgb8())
}
