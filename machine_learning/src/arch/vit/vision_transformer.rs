use std::{cell::RefCell, rc::Rc};

use log::{info, warn};
use ndarray::{Axis, prelude::*};
use rand::{SeedableRng, rngs::StdRng};

use super::EncoderBlock;
use crate::{
    MlErr, Result,
    arch::{
        AdapterPlusConfig, LoadReport, Mode, Model, ParamVisitor, StateDict, ViTConfig,
        layers::{Dense, Embeddings, LayerNorm},
    },
    initialization::{ConstParamGen, RandParamGen},
};

const HEAD_PREFIX: &str = "classifier.";

/// A Vision Transformer image classifier: patch embeddings, a stack of encoder blocks, a final
/// layer norm over the CLS token and a linear classification head.
///
/// Every parameter starts frozen. `train_adapter` makes the adapters and the head trainable.
#[derive(Debug)]
pub struct VisionTransformer {
    config: ViTConfig,
    embeddings: Embeddings,
    layers: Vec<EncoderBlock>,
    layernorm: LayerNorm,
    classifier: Dense,
    adapter: Option<(String, AdapterPlusConfig)>,
    rng: Rc<RefCell<StdRng>>,

    // Forward metadata
    forwarded: Option<(usize, usize)>,
}

impl VisionTransformer {
    /// Creates a new randomly initialized `VisionTransformer`.
    ///
    /// # Arguments
    /// * `config` - The shape of the model.
    /// * `seed` - The seed for initialization and drop path.
    ///
    /// # Returns
    /// A new `VisionTransformer` or an error if the config is invalid.
    pub fn new(config: ViTConfig, seed: u64) -> Result<Self> {
        config.validate()?;

        let rng = Rc::new(RefCell::new(StdRng::seed_from_u64(seed)));
        let std_dev = config.initializer_range;

        let embeddings = Embeddings::init(
            &config,
            &mut RandParamGen::normal(rng.clone(), usize::MAX, 0., std_dev)?,
            &mut ConstParamGen::zeros(usize::MAX),
        )?;

        let layers = (0..config.num_hidden_layers)
            .map(|_| EncoderBlock::init(&config, rng.clone()))
            .collect::<Result<_>>()?;

        let layernorm = LayerNorm::new(config.hidden_size, config.layer_norm_eps)?;
        let classifier = Self::new_head(&config, rng.clone())?;

        Ok(Self {
            config,
            embeddings,
            layers,
            layernorm,
            classifier,
            adapter: None,
            rng,
            forwarded: None,
        })
    }

    fn new_head(config: &ViTConfig, rng: Rc<RefCell<StdRng>>) -> Result<Dense> {
        let (d, n) = (config.hidden_size, config.num_labels);
        let mut weight_gen = RandParamGen::normal(rng, d * n, 0., config.initializer_range)?;
        Dense::init((d, n), &mut weight_gen, &mut ConstParamGen::zeros(n))
    }

    pub fn config(&self) -> &ViTConfig {
        &self.config
    }

    /// The name and configuration of the attached adapter, if any.
    pub fn adapter(&self) -> Option<(&str, &AdapterPlusConfig)> {
        self.adapter
            .as_ref()
            .map(|(name, config)| (name.as_str(), config))
    }

    /// Attaches a bottleneck adapter after the feed forward network of every encoder block.
    ///
    /// # Arguments
    /// * `name` - The name of the adapter, part of its parameter names.
    /// * `config` - The adapter's configuration.
    pub fn add_adapter(&mut self, name: &str, config: &AdapterPlusConfig) -> Result<()> {
        if name.is_empty() || name.contains('.') {
            return Err(MlErr::InvalidConfig(format!(
                "invalid adapter name {name:?}"
            )));
        }

        let (d, eps) = (self.config.hidden_size, self.config.layer_norm_eps);
        for layer in &mut self.layers {
            layer.add_adapter(name, d, config, eps, self.rng.clone())?;
        }

        info!(
            adapter = name,
            bottleneck = config.bottleneck_size(d);
            "added adapter to {} encoder blocks", self.layers.len()
        );

        self.adapter = Some((name.to_string(), config.clone()));
        Ok(())
    }

    /// Freezes the backbone, leaving the adapter and the classification head trainable.
    ///
    /// # Returns
    /// An error if no adapter was added.
    pub fn train_adapter(&mut self) -> Result<()> {
        if self.adapter.is_none() {
            return Err(MlErr::InvalidConfig(
                "there's no adapter to train, add one first".into(),
            ));
        }

        for layer in &mut self.layers {
            layer.freeze();
        }
        self.layernorm.set_trainable(false);
        self.classifier.set_trainable(true);

        Ok(())
    }

    /// Loads pretrained backbone weights.
    ///
    /// Names may come with or without the `vit.` prefix, pooler weights are ignored and a
    /// classification head of a different shape is skipped, leaving the fresh head in place.
    ///
    /// # Returns
    /// The load report or an error if a backbone tensor has the wrong shape.
    pub fn load_pretrained(&mut self, state: &StateDict) -> Result<LoadReport> {
        let state: StateDict = state
            .iter()
            .filter(|(name, _)| !name.starts_with("pooler.") && !name.starts_with("vit.pooler."))
            .map(|(name, tensor)| {
                let name = if name.starts_with("vit.") || name.starts_with(HEAD_PREFIX) {
                    name.clone()
                } else {
                    format!("vit.{name}")
                };
                (name, tensor.clone())
            })
            .collect();

        let report = self.load_state_dict(&state)?;

        if let Some(name) = report
            .mismatched
            .iter()
            .find(|name| !name.starts_with(HEAD_PREFIX))
        {
            let expected = self.shape_of(name)?;
            return Err(MlErr::ShapeMismatch {
                what: name.clone(),
                got: state[name].shape.clone(),
                expected,
            });
        }

        if report.mismatched.iter().any(|name| name.starts_with(HEAD_PREFIX)) {
            warn!(
                num_labels = self.config.num_labels;
                "pretrained classifier has a different shape, keeping a freshly initialized head"
            );
        }

        Ok(report)
    }

    fn shape_of(&mut self, target: &str) -> Result<Vec<usize>> {
        let mut shape = None;

        self.visit_params(&mut |name, param| {
            if name == target {
                shape = Some(param.shape().to_vec());
            }
            Ok(())
        })?;

        shape.ok_or_else(|| MlErr::MissingParam(target.to_string()))
    }

    fn lowest_trainable_layer(&self) -> Option<usize> {
        self.layers.iter().position(EncoderBlock::is_trainable)
    }
}

impl Model for VisionTransformer {
    fn forward(&mut self, pixel_values: ArrayView4<f32>, mode: Mode) -> Result<Array2<f32>> {
        let batch = pixel_values.len_of(Axis(0));
        if batch == 0 {
            return Err(MlErr::EmptyInput("a forward pass"));
        }

        let tokens = self.embeddings.tokens();
        let mut x = self.embeddings.forward(pixel_values)?;

        {
            let mut rng = self.rng.borrow_mut();
            for layer in &mut self.layers {
                x = layer.forward(x.view(), tokens, mode, &mut *rng)?;
            }
        }

        let cls_rows: Vec<usize> = (0..batch).map(|b| b * tokens).collect();
        let cls = x.select(Axis(0), &cls_rows);

        let h = self.layernorm.forward(cls.view())?;
        let logits = self.classifier.forward(h.view())?;

        self.forwarded = Some((batch, tokens));
        Ok(logits)
    }

    fn backward(&mut self, d_logits: ArrayView2<f32>) -> Result<()> {
        let (batch, tokens) = self.forwarded.ok_or(MlErr::NotForwarded("vision transformer"))?;

        if d_logits.dim() != (batch, self.config.num_labels) {
            return Err(MlErr::ShapeMismatch {
                what: "logits gradient".into(),
                got: d_logits.shape().to_vec(),
                expected: vec![batch, self.config.num_labels],
            });
        }

        let d_h = self.classifier.backward(d_logits)?;

        let Some(lowest) = self.lowest_trainable_layer() else {
            if self.layernorm.is_trainable() {
                self.layernorm.backward(d_h.view())?;
            }
            return Ok(());
        };

        let d_cls = self.layernorm.backward(d_h.view())?;

        let mut d_x = Array2::zeros((batch * tokens, self.config.hidden_size));
        for (b, row) in d_cls.outer_iter().enumerate() {
            d_x.row_mut(b * tokens).assign(&row);
        }

        for layer in self.layers[lowest..].iter_mut().rev() {
            d_x = layer.backward(d_x.view())?;
        }

        Ok(())
    }

    fn visit_params(&mut self, f: &mut ParamVisitor) -> Result<()> {
        self.embeddings.visit_params("vit.embeddings", f)?;

        for (i, layer) in self.layers.iter_mut().enumerate() {
            layer.visit_params(&format!("vit.encoder.layer.{i}"), f)?;
        }

        self.layernorm.visit_params("vit.layernorm", f)?;
        self.classifier.visit_params("classifier", f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::TensorData;

    fn config() -> ViTConfig {
        ViTConfig {
            image_size: 8,
            patch_size: 4,
            num_channels: 3,
            hidden_size: 8,
            num_hidden_layers: 2,
            num_attention_heads: 2,
            intermediate_size: 16,
            num_labels: 5,
            ..Default::default()
        }
    }

    fn pixels(batch: usize) -> Array4<f32> {
        Array4::from_shape_fn((batch, 3, 8, 8), |(b, c, y, x)| {
            ((b * 192 + c * 64 + y * 8 + x) as f32 * 0.13).sin()
        })
    }

    #[test]
    fn logits_shape() {
        let mut model = VisionTransformer::new(config(), 0).unwrap();
        let logits = model.forward(pixels(3).view(), Mode::Eval).unwrap();

        assert_eq!(logits.dim(), (3, 5));
    }

    #[test]
    fn same_seed_same_model() {
        let mut a = VisionTransformer::new(config(), 42).unwrap();
        let mut b = VisionTransformer::new(config(), 42).unwrap();

        assert_eq!(a.state_dict(false).unwrap(), b.state_dict(false).unwrap());
    }

    #[test]
    fn train_adapter_requires_an_adapter() {
        let mut model = VisionTransformer::new(config(), 0).unwrap();
        assert!(model.train_adapter().is_err());
    }

    #[test]
    fn only_adapter_and_head_are_trainable() {
        let mut model = VisionTransformer::new(config(), 0).unwrap();
        model
            .add_adapter("cifar100", &AdapterPlusConfig::default())
            .unwrap();
        model.train_adapter().unwrap();

        let trainable = model.state_dict(true).unwrap();
        assert!(!trainable.is_empty());
        for name in trainable.keys() {
            assert!(
                name.contains(".adapters.cifar100.") || name.starts_with("classifier."),
                "{name} should be frozen"
            );
        }

        let summary = model.param_summary().unwrap();
        assert!(summary.trainable < summary.total);
    }

    #[test]
    fn backward_accumulates_into_trainable_params_only() {
        let mut model = VisionTransformer::new(config(), 1).unwrap();
        model
            .add_adapter("a", &AdapterPlusConfig::default())
            .unwrap();
        model.train_adapter().unwrap();

        let logits = model.forward(pixels(2).view(), Mode::Train).unwrap();
        model.backward(logits.view()).unwrap();

        let mut head_grad = 0.;
        model
            .visit_params(&mut |name, p| {
                match p.grad() {
                    Some(grad) if name.starts_with("classifier.") => {
                        head_grad += grad.iter().map(|g| g.abs()).sum::<f32>()
                    }
                    Some(_) => assert!(name.contains(".adapters.a.")),
                    None => assert!(!name.contains(".adapters.")),
                }
                Ok(())
            })
            .unwrap();

        assert!(head_grad > 0.);
    }

    #[test]
    fn backward_before_forward() {
        let mut model = VisionTransformer::new(config(), 0).unwrap();
        let d = Array2::zeros((1, 5));

        assert!(matches!(
            model.backward(d.view()),
            Err(MlErr::NotForwarded(_))
        ));
    }

    #[test]
    fn load_pretrained_normalizes_names() {
        let mut source = VisionTransformer::new(config(), 7).unwrap();
        let full = source.state_dict(false).unwrap();

        // Checkpoints without the `vit.` prefix, with a pooler and a 1000 class head.
        let mut state: StateDict = full
            .iter()
            .filter(|(name, _)| !name.starts_with("classifier."))
            .map(|(name, t)| (name.trim_start_matches("vit.").to_string(), t.clone()))
            .collect();
        state.insert(
            "pooler.dense.bias".into(),
            TensorData {
                shape: vec![8],
                data: vec![0.; 8],
            },
        );
        state.insert(
            "classifier.weight".into(),
            TensorData {
                shape: vec![1000, 8],
                data: vec![0.; 8000],
            },
        );

        let mut target = VisionTransformer::new(config(), 8).unwrap();
        let report = target.load_pretrained(&state).unwrap();

        assert_eq!(report.mismatched, vec!["classifier.weight".to_string()]);
        assert!(report.unexpected.is_empty());
        assert_eq!(report.missing, vec!["classifier.bias".to_string()]);

        let loaded = target.state_dict(false).unwrap();
        let name = "vit.encoder.layer.1.attention.attention.key.weight";
        assert_eq!(loaded[name], full[name]);
        assert_ne!(loaded["classifier.weight"], full["classifier.weight"]);
    }

    #[test]
    fn load_pretrained_rejects_backbone_mismatch() {
        let mut model = VisionTransformer::new(config(), 0).unwrap();
        let mut state = StateDict::new();
        state.insert(
            "embeddings.cls_token".into(),
            TensorData {
                shape: vec![1, 1, 4],
                data: vec![0.; 4],
            },
        );

        assert!(matches!(
            model.load_pretrained(&state),
            Err(MlErr::ShapeMismatch { .. })
        ));
    }
}
