use ndarray::{Axis, linalg, prelude::*};

use crate::{
    MlErr, Result,
    arch::{Param, ParamVisitor, ViTConfig},
    initialization::ParamGen,
};

/// Turns images into token sequences: non-overlapping patches are projected to the hidden
/// size, a CLS token is prepended and position embeddings are added.
///
/// The embeddings belong to the frozen backbone, there's no backward pass through them.
#[derive(Debug, Clone)]
pub struct Embeddings {
    image_size: usize,
    patch_size: usize,
    num_channels: usize,
    hidden_size: usize,
    cls_token: Param,
    position_embeddings: Param,
    // (hidden, channels, patch, patch), the layout of a strided convolution kernel.
    projection_weight: Param,
    projection_bias: Param,
}

impl Embeddings {
    /// Creates new `Embeddings`.
    ///
    /// # Arguments
    /// * `config` - The model's configuration.
    /// * `weight_gen` - The generator for the CLS token, position embeddings and projection.
    /// * `bias_gen` - The generator for the projection's bias.
    pub fn init<W, B>(config: &ViTConfig, weight_gen: &mut W, bias_gen: &mut B) -> Result<Self>
    where
        W: ParamGen + ?Sized,
        B: ParamGen + ?Sized,
    {
        let d = config.hidden_size;
        let (c, p) = (config.num_channels, config.patch_size);

        Ok(Self {
            image_size: config.image_size,
            patch_size: p,
            num_channels: c,
            hidden_size: d,
            cls_token: Param::generate(&[1, 1, d], weight_gen)?,
            position_embeddings: Param::generate(&[1, config.tokens(), d], weight_gen)?,
            projection_weight: Param::generate(&[d, c, p, p], weight_gen)?,
            projection_bias: Param::generate(&[d], bias_gen)?,
        })
    }

    fn grid(&self) -> usize {
        self.image_size / self.patch_size
    }

    /// The sequence length produced per image.
    pub fn tokens(&self) -> usize {
        self.grid().pow(2) + 1
    }

    /// Embeds a batch of images.
    ///
    /// # Arguments
    /// * `pixel_values` - A `(batch, channels, height, width)` tensor.
    ///
    /// # Returns
    /// A `(batch * tokens, hidden)` matrix, the first row of every sequence is the CLS token.
    pub fn forward(&self, pixel_values: ArrayView4<f32>) -> Result<Array2<f32>> {
        let (c, s) = (self.num_channels, self.image_size);
        let (batch, channels, height, width) = pixel_values.dim();

        if (channels, height, width) != (c, s, s) {
            return Err(MlErr::ShapeMismatch {
                what: "pixel values".into(),
                got: pixel_values.shape().to_vec(),
                expected: vec![batch, c, s, s],
            });
        }

        let (p, grid, d) = (self.patch_size, self.grid(), self.hidden_size);
        let num_patches = grid * grid;
        let patch_dim = c * p * p;

        let patches = Array2::from_shape_fn((batch * num_patches, patch_dim), |(row, col)| {
            let (b, patch) = (row / num_patches, row % num_patches);
            let (py, px) = (patch / grid, patch % grid);
            let (ch, ky, kx) = (col / (p * p), (col / p) % p, col % p);
            pixel_values[[b, ch, py * p + ky, px * p + kx]]
        });

        let w = self.projection_weight.view2(d, patch_dim)?;
        let mut projected = Array2::zeros((batch * num_patches, d));
        linalg::general_mat_mul(1.0, &patches, &w.t(), 0.0, &mut projected);
        projected += &self.projection_bias.view1()?;

        let tokens = self.tokens();
        let cls = self.cls_token.view1()?;
        let positions = self.position_embeddings.view2(tokens, d)?;

        let mut x = Array2::zeros((batch * tokens, d));
        for (b, mut sequence) in x.axis_chunks_iter_mut(Axis(0), tokens).enumerate() {
            sequence.row_mut(0).assign(&cls);
            sequence
                .slice_mut(s![1.., ..])
                .assign(&projected.slice(s![b * num_patches..(b + 1) * num_patches, ..]));
            sequence += &positions;
        }

        Ok(x)
    }

    pub fn visit_params(&mut self, prefix: &str, f: &mut ParamVisitor) -> Result<()> {
        f(&format!("{prefix}.cls_token"), &mut self.cls_token)?;
        f(
            &format!("{prefix}.position_embeddings"),
            &mut self.position_embeddings,
        )?;
        f(
            &format!("{prefix}.patch_embeddings.projection.weight"),
            &mut self.projection_weight,
        )?;
        f(
            &format!("{prefix}.patch_embeddings.projection.bias"),
            &mut self.projection_bias,
        )
    }
}
