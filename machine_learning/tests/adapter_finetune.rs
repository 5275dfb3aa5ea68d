use machine_learning::{
    arch::{AdapterPlusConfig, Mode, Model, ViTConfig, VisionTransformer, loss::CrossEntropy},
    metrics::accuracy,
    optimization::LinearSchedule,
    training::{ModelTrainer, ParamManager},
};
use ndarray::{Array4, s};

fn tiny_config() -> ViTConfig {
    ViTConfig {
        image_size: 8,
        patch_size: 4,
        num_channels: 3,
        hidden_size: 16,
        num_hidden_layers: 2,
        num_attention_heads: 2,
        intermediate_size: 32,
        initializer_range: 0.2,
        num_labels: 2,
        ..Default::default()
    }
}

fn adapter_config() -> AdapterPlusConfig {
    AdapterPlusConfig {
        reduction_factor: 4.,
        stochastic_depth: 0.,
        ..Default::default()
    }
}

/// Bright images are class 1, dark images are class 0.
fn bright_vs_dark(n: usize) -> (Array4<f32>, Vec<usize>) {
    let mut x = Array4::zeros((n, 3, 8, 8));
    let mut labels = Vec::with_capacity(n);

    for i in 0..n {
        let label = i % 2;
        let base = if label == 1 { 0.8 } else { -0.8 };
        x.slice_mut(s![i, .., .., ..])
            .mapv_inplace(|_: f32| base + 0.05 * ((i * 7) as f32).sin());
        labels.push(label);
    }

    (x, labels)
}

fn adapter_model(seed: u64) -> VisionTransformer {
    let mut model = VisionTransformer::new(tiny_config(), seed).unwrap();
    model.add_adapter("cifar100", &adapter_config()).unwrap();
    model.train_adapter().unwrap();
    model
}

#[test]
fn adapter_training_learns_and_keeps_backbone_frozen() {
    let mut model = adapter_model(3);
    let backbone_before: Vec<_> = model
        .state_dict(false)
        .unwrap()
        .into_iter()
        .filter(|(name, _)| !name.contains(".adapters.") && !name.starts_with("classifier."))
        .collect();

    let params = ParamManager::adam_w(&mut model, 0.01).unwrap();
    let summary = params.summary();
    assert!(summary.trainable > 0 && summary.trainable < summary.total);

    let mut trainer = ModelTrainer::new(
        model,
        params,
        CrossEntropy::new(),
        LinearSchedule::new(1e-2, 5, 200),
    );

    let (x, labels) = bright_vs_dark(8);
    for _ in 0..100 {
        trainer.train_step(x.view(), &labels).unwrap();
    }

    let logits = trainer.predict(x.view()).unwrap();
    assert_eq!(accuracy(logits.view(), &labels).unwrap(), 1.);

    let mut model = trainer.into_model();
    let after = model.state_dict(false).unwrap();
    for (name, tensor) in backbone_before {
        assert_eq!(after[&name], tensor, "{name} changed");
    }
}

#[test]
fn trainable_state_reloads_to_identical_predictions() {
    let mut trained = adapter_model(1);
    let params = ParamManager::adam_w(&mut trained, 0.).unwrap();
    let mut trainer = ModelTrainer::new(
        trained,
        params,
        CrossEntropy::new(),
        LinearSchedule::new(1e-2, 0, 10),
    );

    let (x, labels) = bright_vs_dark(4);
    for _ in 0..5 {
        trainer.train_step(x.view(), &labels).unwrap();
    }
    let mut trained = trainer.into_model();

    let backbone = trained.state_dict(false).unwrap();
    let adapter = trained.state_dict(true).unwrap();

    // Same backbone, fresh adapter and head, then the trained adapter on top.
    let mut reloaded = adapter_model(99);
    reloaded.load_state_dict(&backbone).unwrap();
    let report = reloaded.load_state_dict(&adapter).unwrap();
    assert!(report.mismatched.is_empty());
    assert!(report.unexpected.is_empty());

    let expected = trained.forward(x.view(), Mode::Eval).unwrap();
    let got = reloaded.forward(x.view(), Mode::Eval).unwrap();
    assert_eq!(expected, got);
}
