use serde::{Deserialize, Serialize};

use super::activations::ActFn;
use crate::{MlErr, Result};

/// The shape of a Vision Transformer. The defaults describe ViT-Base/16 at 224×224 with a
/// 100 class head.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViTConfig {
    pub image_size: usize,
    pub patch_size: usize,
    pub num_channels: usize,
    pub hidden_size: usize,
    pub num_hidden_layers: usize,
    pub num_attention_heads: usize,
    pub intermediate_size: usize,
    pub hidden_act: ActFn,
    pub layer_norm_eps: f32,
    pub initializer_range: f32,
    pub num_labels: usize,
}

impl Default for ViTConfig {
    fn default() -> Self {
        Self {
            image_size: 224,
            patch_size: 16,
            num_channels: 3,
            hidden_size: 768,
            num_hidden_layers: 12,
            num_attention_heads: 12,
            intermediate_size: 3072,
            hidden_act: ActFn::Gelu,
            layer_norm_eps: 1e-12,
            initializer_range: 0.02,
            num_labels: 100,
        }
    }
}

impl ViTConfig {
    /// Checks the config describes a buildable model.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("image_size", self.image_size),
            ("patch_size", self.patch_size),
            ("num_channels", self.num_channels),
            ("hidden_size", self.hidden_size),
            ("num_attention_heads", self.num_attention_heads),
            ("intermediate_size", self.intermediate_size),
            ("num_labels", self.num_labels),
        ];

        if let Some((name, _)) = positive.iter().find(|(_, v)| *v == 0) {
            return Err(MlErr::InvalidConfig(format!("{name} must be greater than 0")));
        }

        if self.image_size % self.patch_size != 0 {
            return Err(MlErr::InvalidConfig(format!(
                "image_size ({}) is not divisible by patch_size ({})",
                self.image_size, self.patch_size
            )));
        }

        if self.hidden_size % self.num_attention_heads != 0 {
            return Err(MlErr::InvalidConfig(format!(
                "hidden_size ({}) is not divisible by num_attention_heads ({})",
                self.hidden_size, self.num_attention_heads
            )));
        }

        Ok(())
    }

    /// The amount of patches an image is split into.
    pub fn num_patches(&self) -> usize {
        (self.image_size / self.patch_size).pow(2)
    }

    /// The sequence length, patches plus the CLS token.
    pub fn tokens(&self) -> usize {
        self.num_patches() + 1
    }

    /// The length of a flattened patch.
    pub fn patch_dim(&self) -> usize {
        self.num_channels * self.patch_size * self.patch_size
    }
}

/// How the output of an adapter is scaled before being added to the residual stream.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scaling {
    /// A learned scale per hidden channel.
    #[default]
    Channel,
    /// A single learned scale.
    Learned,
    /// A fixed scale.
    Constant(f32),
}

/// How the adapter projections are initialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitWeights {
    /// Weights from `N(0, 1e-2)`, zero biases.
    #[default]
    Houlsby,
    /// Weights from `N(0, 0.02)`, zero biases.
    Bert,
    /// Kaiming uniform down projection, zero up projection, so the adapter starts as identity.
    Lora,
}

/// Configuration of an AdapterPlus bottleneck adapter, attached after the feed forward
/// network of every encoder block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterPlusConfig {
    pub reduction_factor: f32,
    pub non_linearity: ActFn,
    pub scaling: Scaling,
    /// Adds a trainable layer norm after the adapter's residual connection.
    pub original_ln_after: bool,
    /// Drop-path probability applied per sample to the adapter branch while training.
    pub stochastic_depth: f32,
    pub init_weights: InitWeights,
}

impl Default for AdapterPlusConfig {
    fn default() -> Self {
        Self {
            reduction_factor: 96.,
            non_linearity: ActFn::Gelu,
            scaling: Scaling::Channel,
            original_ln_after: false,
            stochastic_depth: 0.1,
            init_weights: InitWeights::Houlsby,
        }
    }
}

impl AdapterPlusConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.reduction_factor >= 1.) {
            return Err(MlErr::InvalidConfig(format!(
                "reduction_factor must be at least 1, got {}",
                self.reduction_factor
            )));
        }

        if !(0. ..1.).contains(&self.stochastic_depth) {
            return Err(MlErr::InvalidConfig(format!(
                "stochastic_depth must be in [0, 1), got {}",
                self.stochastic_depth
            )));
        }

        Ok(())
    }

    /// The width of the bottleneck for a model of `hidden_size`, never below one.
    pub fn bottleneck_size(&self, hidden_size: usize) -> usize {
        ((hidden_size as f32 / self.reduction_factor) as usize).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vit_base_defaults() {
        let config = ViTConfig::default();

        config.validate().unwrap();
        assert_eq!(config.num_patches(), 196);
        assert_eq!(config.tokens(), 197);
        assert_eq!(config.patch_dim(), 768);
    }

    #[test]
    fn patch_must_divide_image() {
        let config = ViTConfig {
            image_size: 30,
            patch_size: 16,
            ..Default::default()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn bottleneck_size() {
        let config = AdapterPlusConfig::default();

        assert_eq!(config.bottleneck_size(768), 8);
        assert_eq!(config.bottleneck_size(16), 1);
    }

    #[test]
    fn adapter_config_from_partial_json() {
        let config: AdapterPlusConfig =
            serde_json::from_str(r#"{ "original_ln_after": true, "scaling": { "constant": 2.0 } }"#)
                .unwrap();

        assert!(config.original_ln_after);
        assert_eq!(config.scaling, Scaling::Constant(2.));
        assert_eq!(config.reduction_factor, 96.);
    }

    #[test]
    fn invalid_stochastic_depth() {
        let config = AdapterPlusConfig {
            stochastic_depth: 1.,
            ..Default::default()
        };

        assert!(config.validate().is_err());
    }
}
