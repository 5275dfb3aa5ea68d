use std::{cell::RefCell, rc::Rc};

use ndarray::{Array2, ArrayView2};
use rand::Rng;

use crate::{
    Result,
    arch::{
        AdapterPlusConfig, Mode, ParamVisitor, ViTConfig,
        activations::Activation,
        layers::{BottleneckAdapter, Dense, FeedForward, LayerNorm, MultiHeadAttention},
    },
    initialization::{ConstParamGen, RandParamGen},
};

/// A pre-norm transformer encoder block with an optional bottleneck adapter after its feed
/// forward network.
///
/// ```text
/// x1 = x + attention(layernorm_before(x))
/// f  = feed_forward(layernorm_after(x1))
/// y  = x1 + adapter(f)
/// ```
#[derive(Debug, Clone)]
pub struct EncoderBlock {
    layernorm_before: LayerNorm,
    attention: MultiHeadAttention,
    layernorm_after: LayerNorm,
    feed_forward: FeedForward,
    adapter: Option<AdapterSlot>,
}

#[derive(Debug, Clone)]
struct AdapterSlot {
    name: String,
    adapter: BottleneckAdapter,
    norm_after: Option<LayerNorm>,
}

impl EncoderBlock {
    /// Creates a new frozen `EncoderBlock`, weights are drawn from
    /// `N(0, initializer_range)` and biases start at zero.
    ///
    /// # Arguments
    /// * `config` - The model's configuration.
    /// * `rng` - The random number generator used for initialization.
    pub fn init<R: Rng>(config: &ViTConfig, rng: Rc<RefCell<R>>) -> Result<Self> {
        let d = config.hidden_size;
        let i = config.intermediate_size;
        let std_dev = config.initializer_range;

        let dense = |dim: (usize, usize)| -> Result<Dense> {
            let mut weight_gen = RandParamGen::normal(rng.clone(), dim.0 * dim.1, 0., std_dev)?;
            Dense::init(dim, &mut weight_gen, &mut ConstParamGen::zeros(dim.1))
        };

        let attention = MultiHeadAttention::new(
            config.num_attention_heads,
            dense((d, d))?,
            dense((d, d))?,
            dense((d, d))?,
            dense((d, d))?,
        )?;

        let feed_forward = FeedForward::new(
            dense((d, i))?,
            Activation::new(config.hidden_act),
            dense((i, d))?,
        );

        Ok(Self {
            layernorm_before: LayerNorm::new(d, config.layer_norm_eps)?,
            attention,
            layernorm_after: LayerNorm::new(d, config.layer_norm_eps)?,
            feed_forward,
            adapter: None,
        })
    }

    /// Attaches a bottleneck adapter, replacing the current one if any.
    ///
    /// # Arguments
    /// * `name` - The name of the adapter, part of its parameter names.
    /// * `hidden_size` - The width of the residual stream.
    /// * `config` - The adapter's configuration.
    /// * `eps` - The epsilon of the optional layer norm after the adapter.
    /// * `rng` - The random number generator used for initialization.
    pub fn add_adapter<R: Rng>(
        &mut self,
        name: &str,
        hidden_size: usize,
        config: &AdapterPlusConfig,
        eps: f32,
        rng: Rc<RefCell<R>>,
    ) -> Result<()> {
        let adapter = BottleneckAdapter::new(hidden_size, config, rng)?;

        let norm_after = if config.original_ln_after {
            let mut norm = LayerNorm::new(hidden_size, eps)?;
            norm.set_trainable(true);
            Some(norm)
        } else {
            None
        };

        self.adapter = Some(AdapterSlot {
            name: name.to_string(),
            adapter,
            norm_after,
        });

        Ok(())
    }

    /// Freezes the pretrained parts of the block, adapters stay trainable.
    pub fn freeze(&mut self) {
        self.layernorm_before.set_trainable(false);
        self.attention.set_trainable(false);
        self.layernorm_after.set_trainable(false);
        self.feed_forward.set_trainable(false);
    }

    pub fn has_adapter(&self) -> bool {
        self.adapter.is_some()
    }

    pub fn is_trainable(&self) -> bool {
        self.adapter.is_some()
            || self.layernorm_before.is_trainable()
            || self.attention.is_trainable()
            || self.layernorm_after.is_trainable()
            || self.feed_forward.is_trainable()
    }

    /// Makes a forward pass through the block.
    ///
    /// # Arguments
    /// * `x` - The `(batch * tokens, hidden)` residual stream.
    /// * `tokens` - The sequence length.
    /// * `mode` - Whether the pass is part of training.
    /// * `rng` - The random number generator for the adapter's drop path.
    pub fn forward<R: Rng>(
        &mut self,
        x: ArrayView2<f32>,
        tokens: usize,
        mode: Mode,
        rng: &mut R,
    ) -> Result<Array2<f32>> {
        let h = self.layernorm_before.forward(x)?;
        let x1 = self.attention.forward(h.view(), tokens)? + x;

        let h = self.layernorm_after.forward(x1.view())?;
        let f = self.feed_forward.forward(h.view())?;

        let Some(slot) = &mut self.adapter else {
            return Ok(f + x1);
        };

        let y = slot.adapter.forward(f.view(), tokens, mode, rng)? + x1;
        match &mut slot.norm_after {
            Some(norm) => norm.forward(y.view()),
            None => Ok(y),
        }
    }

    pub fn backward(&mut self, d: ArrayView2<f32>) -> Result<Array2<f32>> {
        let (d_x1, d_f) = match &mut self.adapter {
            Some(slot) => {
                let d_y = match &mut slot.norm_after {
                    Some(norm) => norm.backward(d)?,
                    None => d.to_owned(),
                };
                let d_f = slot.adapter.backward(d_y.view())?;
                (d_y, d_f)
            }
            None => (d.to_owned(), d.to_owned()),
        };

        let d_h = self.feed_forward.backward(d_f.view())?;
        let d_x1 = d_x1 + self.layernorm_after.backward(d_h.view())?;

        let d_h = self.attention.backward(d_x1.view())?;
        Ok(self.layernorm_before.backward(d_h.view())? + d_x1)
    }

    pub fn visit_params(&mut self, prefix: &str, f: &mut ParamVisitor) -> Result<()> {
        self.attention
            .visit_params(&format!("{prefix}.attention"), f)?;
        self.feed_forward.visit_params(prefix, f)?;
        self.layernorm_before
            .visit_params(&format!("{prefix}.layernorm_before"), f)?;
        self.layernorm_after
            .visit_params(&format!("{prefix}.layernorm_after"), f)?;

        if let Some(slot) = &mut self.adapter {
            let prefix = format!("{prefix}.output.adapters.{}", slot.name);
            slot.adapter.visit_params(&prefix, f)?;

            if let Some(norm) = &mut slot.norm_after {
                norm.visit_params(&format!("{prefix}.adapter_norm_after"), f)?;
            }
        }

        Ok(())
    }
}
