use std::{cell::RefCell, rc::Rc};

use ndarray::{Axis, prelude::*};
use rand::Rng;

use super::Dense;
use crate::{
    MlErr, Result,
    arch::{
        AdapterPlusConfig, InitWeights, Mode, Param, ParamVisitor, Scaling,
        activations::Activation,
    },
    initialization::{ConstParamGen, RandParamGen},
};

/// An AdapterPlus bottleneck adapter: `h + drop_path(s ⊙ up(act(down(h))))`.
///
/// Every parameter of the adapter is trainable.
#[derive(Debug, Clone)]
pub struct BottleneckAdapter {
    down: Dense,
    activation: Activation,
    up: Dense,
    scale: Scale,
    drop_prob: f32,

    // Forward metadata
    u: Option<Array2<f32>>,
    keep: Option<Array1<f32>>,
}

#[derive(Debug, Clone)]
enum Scale {
    Channel(Param),
    Learned(Param),
    Constant(f32),
}

impl BottleneckAdapter {
    /// Creates a new `BottleneckAdapter`.
    ///
    /// # Arguments
    /// * `hidden_size` - The width of the residual stream.
    /// * `config` - The adapter's configuration.
    /// * `rng` - The random number generator used for initialization.
    ///
    /// # Returns
    /// A new `BottleneckAdapter` or an error if the configuration is invalid.
    pub fn new<R: Rng>(
        hidden_size: usize,
        config: &AdapterPlusConfig,
        rng: Rc<RefCell<R>>,
    ) -> Result<Self> {
        config.validate()?;

        let d = hidden_size;
        let r = config.bottleneck_size(d);

        let (mut down, mut up) = match config.init_weights {
            InitWeights::Houlsby | InitWeights::Bert => {
                let std_dev = match config.init_weights {
                    InitWeights::Houlsby => 1e-2,
                    _ => 2e-2,
                };

                let mut down_gen = RandParamGen::normal(rng.clone(), d * r, 0., std_dev)?;
                let mut up_gen = RandParamGen::normal(rng, r * d, 0., std_dev)?;

                (
                    Dense::init((d, r), &mut down_gen, &mut ConstParamGen::zeros(r))?,
                    Dense::init((r, d), &mut up_gen, &mut ConstParamGen::zeros(d))?,
                )
            }
            InitWeights::Lora => {
                let mut down_gen = RandParamGen::kaiming_uniform(rng, d * r, d)?;

                (
                    Dense::init((d, r), &mut down_gen, &mut ConstParamGen::zeros(r))?,
                    Dense::init(
                        (r, d),
                        &mut ConstParamGen::zeros(r * d),
                        &mut ConstParamGen::zeros(d),
                    )?,
                )
            }
        };

        down.set_trainable(true);
        up.set_trainable(true);

        let scale = match config.scaling {
            Scaling::Channel => Scale::Channel(
                Param::generate(&[d], &mut ConstParamGen::ones(d))?.trainable(),
            ),
            Scaling::Learned => {
                Scale::Learned(Param::generate(&[1], &mut ConstParamGen::ones(1))?.trainable())
            }
            Scaling::Constant(value) => Scale::Constant(value),
        };

        Ok(Self {
            down,
            activation: Activation::new(config.non_linearity),
            up,
            scale,
            drop_prob: config.stochastic_depth,
            u: None,
            keep: None,
        })
    }

    /// Makes a forward pass through the adapter.
    ///
    /// # Arguments
    /// * `h` - The `(batch * tokens, hidden)` output of the feed forward network.
    /// * `tokens` - The sequence length, drop path acts on whole sequences.
    /// * `mode` - Drop path is only active while training.
    /// * `rng` - The random number generator for drop path.
    pub fn forward<R: Rng>(
        &mut self,
        h: ArrayView2<f32>,
        tokens: usize,
        mode: Mode,
        rng: &mut R,
    ) -> Result<Array2<f32>> {
        if tokens == 0 || h.nrows() % tokens != 0 {
            return Err(MlErr::SizeMismatch {
                what: "adapter rows",
                got: h.nrows(),
                expected: tokens,
            });
        }

        let z = self.down.forward(h)?;
        let a = self.activation.forward(z.view());
        let u = self.up.forward(a.view())?;

        let mut out = self.scale(u.view())?;

        let sequences = h.nrows() / tokens;
        let keep = match mode {
            Mode::Train if self.drop_prob > 0. => {
                let p = self.drop_prob;
                let mut keep = Array2::<f32>::zeros((sequences, tokens));
                for mut sequence in keep.outer_iter_mut() {
                    let value = if rng.random::<f32>() < p { 0. } else { 1. / (1. - p) };
                    sequence.fill(value);
                }
                keep.into_shape_with_order(sequences * tokens)?
            }
            _ => Array1::ones(sequences * tokens),
        };

        out *= &keep.view().insert_axis(Axis(1));
        out += &h;

        self.u = Some(u);
        self.keep = Some(keep);
        Ok(out)
    }

    pub fn backward(&mut self, d: ArrayView2<f32>) -> Result<Array2<f32>> {
        let u = self.u.as_ref().ok_or(MlErr::NotForwarded("adapter"))?;
        let keep = self.keep.as_ref().ok_or(MlErr::NotForwarded("adapter"))?;

        let d_out = &d * &keep.view().insert_axis(Axis(1));

        let d_u = match &mut self.scale {
            Scale::Channel(s) => {
                if let Some(mut ds) = s.grad_view1_mut()? {
                    ds += &(&d_out * u).sum_axis(Axis(0));
                }
                d_out * &s.view1()?
            }
            Scale::Learned(s) => {
                if let Some(mut ds) = s.grad_view1_mut()? {
                    ds[0] += (&d_out * u).sum();
                }
                d_out * s.value()[0]
            }
            Scale::Constant(value) => d_out * *value,
        };

        let d_a = self.up.backward(d_u.view())?;
        let d_z = self.activation.backward(d_a)?;
        let d_h = self.down.backward(d_z.view())?;

        Ok(d_h + &d)
    }

    pub fn visit_params(&mut self, prefix: &str, f: &mut ParamVisitor) -> Result<()> {
        self.down
            .visit_params(&format!("{prefix}.adapter_down.0"), f)?;
        self.up.visit_params(&format!("{prefix}.adapter_up"), f)?;

        match &mut self.scale {
            Scale::Channel(s) | Scale::Learned(s) => f(&format!("{prefix}.scaling"), s),
            Scale::Constant(_) => Ok(()),
        }
    }

    fn scale(&self, u: ArrayView2<f32>) -> Result<Array2<f32>> {
        let out = match &self.scale {
            Scale::Channel(s) => &u * &s.view1()?,
            Scale::Learned(s) => &u * s.value()[0],
            Scale::Constant(value) => &u * *value,
        };

        Ok(out)
    }
}
