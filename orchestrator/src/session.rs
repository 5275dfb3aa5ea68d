use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use data::{Collator, DataLoader, Dataset, DatasetSource, ImageProcessor, Split, load_dataset};
use image::RgbImage;
use log::{info, warn};
use machine_learning::{
    MlErr,
    arch::{
        LoadReport, Mode, Model, StateDict, VisionTransformer,
        loss::{CrossEntropy, LossFn},
    },
    metrics::{self, Accuracy},
    optimization::LinearSchedule,
    training::{ModelTrainer, ParamManager},
};
use ndarray::Axis;

use crate::{
    OrchestratorError, Result,
    checkpoint::{self, AdapterManifest},
    configs::{EvalStrategy, RunConfig, SaveStrategy},
    hub,
};

/// The outcome of running the model over a whole split.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvalReport {
    /// The mean loss per example.
    pub loss: f32,
    pub accuracy: f32,
    pub samples: usize,
}

/// Something worth reporting that happened while training.
#[derive(Debug, Clone, PartialEq)]
pub enum TrainingEvent {
    /// The mean train loss since the previous log.
    Log {
        step: usize,
        epoch: f32,
        loss: f32,
        learning_rate: f32,
    },
    Eval {
        step: usize,
        epoch: f32,
        report: EvalReport,
    },
    Checkpoint {
        step: usize,
        path: PathBuf,
    },
    EpochEnd {
        epoch: usize,
        mean_loss: f32,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainReport {
    pub global_step: usize,
    /// The mean train loss over every step.
    pub train_loss: f32,
    /// The last evaluation, if any.
    pub eval: Option<EvalReport>,
    /// Where the final adapter was saved.
    pub adapter_dir: PathBuf,
    /// Where the adapter was pushed, if it was.
    pub hub_dir: Option<PathBuf>,
    pub events: Vec<TrainingEvent>,
}

/// The class an image was predicted to be.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub class_id: usize,
    pub label: String,
    /// The softmax probability of the class.
    pub score: f32,
}

/// A model with its adapter together with everything needed to train it, evaluate it and
/// run it over new images.
pub struct Session {
    config: RunConfig,
    source: Box<dyn DatasetSource>,
    model: VisionTransformer,
    processor: Arc<ImageProcessor>,
    class_names: Arc<[String]>,
}

impl Session {
    /// Creates a new `Session` over the dataset named in `config`.
    ///
    /// # Returns
    /// A new `Session` or an error if the config is invalid or the model can't be built.
    pub fn new(config: RunConfig) -> Result<Self> {
        let source = load_dataset(&config.dataset.name, &config.dataset.root)?;
        Self::with_source(config, source)
    }

    /// Creates a new `Session`.
    ///
    /// # Arguments
    /// * `config` - The run configuration.
    /// * `source` - Where to load the examples from, instead of the dataset named in `config`.
    ///
    /// # Returns
    /// A new `Session` or an error if the config is invalid or the model can't be built.
    pub fn with_source(config: RunConfig, source: Box<dyn DatasetSource>) -> Result<Self> {
        config.validate()?;

        let class_names = source.class_names();
        if class_names.len() != config.model.vit.num_labels {
            return Err(OrchestratorError::InvalidConfig(format!(
                "{} has {} classes but the model has {} labels",
                config.dataset.name,
                class_names.len(),
                config.model.vit.num_labels
            )));
        }

        let model = build_model(&config)?;
        let processor = Arc::new(config.dataset.processor.clone());

        Ok(Self {
            config,
            source,
            model,
            processor,
            class_names,
        })
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn model(&self) -> &VisionTransformer {
        &self.model
    }

    pub fn class_names(&self) -> &Arc<[String]> {
        &self.class_names
    }

    /// Fine-tunes the adapter and the classification head over the train split.
    ///
    /// Evaluates, logs and saves checkpoints as the training config says, saves the final
    /// adapter to `output_dir/adapter` and pushes it to the hub when enabled.
    pub fn train(&mut self) -> Result<TrainReport> {
        let training = self.config.training.clone();
        let collator = Collator::new(self.processor.clone());

        let train = self.load_split(
            self.config.dataset.train_split,
            self.config.dataset.max_train_samples,
        )?;
        let eval = match training.eval_strategy {
            EvalStrategy::No => None,
            _ => Some(self.load_split(
                self.config.dataset.eval_split,
                self.config.dataset.max_eval_samples,
            )?),
        };

        if train.is_empty() {
            return Err(MlErr::EmptyInput("the train split").into());
        }
        if eval.as_ref().is_some_and(Dataset::is_empty) {
            return Err(MlErr::EmptyInput("the evaluation split").into());
        }

        let mut train_loader = DataLoader::new(
            train,
            collator.clone(),
            training.per_device_train_batch_size,
            training.remove_unused_columns,
        )?
        .with_shuffle(training.seed);

        let mut eval_loader = eval
            .map(|eval| {
                DataLoader::new(
                    eval,
                    collator,
                    training.per_device_eval_batch_size,
                    training.remove_unused_columns,
                )
            })
            .transpose()?;

        let steps_per_epoch = train_loader.num_batches();
        let total_steps = steps_per_epoch * training.num_train_epochs;
        let schedule =
            LinearSchedule::new(training.learning_rate, training.warmup_steps, total_steps);

        let params = ParamManager::adam_w(&mut self.model, training.weight_decay)?;
        info!("{}", params.summary());
        info!(
            "training for {} epochs, {steps_per_epoch} steps each, {total_steps} steps in total",
            training.num_train_epochs
        );

        let manifest = self.manifest();
        let mut trainer = ModelTrainer::new(&mut self.model, params, CrossEntropy::new(), schedule);

        let mut events = Vec::new();
        let mut last_eval = None;
        let mut total_loss = 0.;
        let (mut logged_loss, mut logged_steps) = (0., 0);

        for epoch in 0..training.num_train_epochs {
            let mut epoch_loss = 0.;
            let mut epoch_steps = 0;

            for batch in train_loader.batches() {
                let batch = batch?;
                let learning_rate = trainer.learning_rate();
                let loss = trainer.train_step(batch.pixel_values.view(), &batch.labels)?;
                let step = trainer.step();
                let progress = step as f32 / steps_per_epoch as f32;

                total_loss += loss;
                epoch_loss += loss;
                epoch_steps += 1;
                logged_loss += loss;
                logged_steps += 1;

                if training.logging_steps > 0 && step % training.logging_steps == 0 {
                    let loss = logged_loss / logged_steps as f32;
                    info!(
                        "step {step} (epoch {progress:.2}): loss {loss:.4}, lr {learning_rate:.3e}"
                    );
                    events.push(TrainingEvent::Log {
                        step,
                        epoch: progress,
                        loss,
                        learning_rate,
                    });
                    (logged_loss, logged_steps) = (0., 0);
                }

                let eval_now = training.eval_strategy == EvalStrategy::Steps
                    && training.eval_steps.is_some_and(|n| step % n == 0);

                if let (true, Some(loader)) = (eval_now, eval_loader.as_mut()) {
                    let report = evaluate_model(trainer.model_mut(), loader)?;
                    events.push(TrainingEvent::Eval {
                        step,
                        epoch: progress,
                        report,
                    });
                    last_eval = Some(report);
                }
            }

            let step = trainer.step();
            let mean_loss = epoch_loss / epoch_steps.max(1) as f32;
            info!("epoch {} done: mean loss {mean_loss:.4}", epoch + 1);
            events.push(TrainingEvent::EpochEnd {
                epoch: epoch + 1,
                mean_loss,
            });

            if let (EvalStrategy::Epoch, Some(loader)) =
                (training.eval_strategy, eval_loader.as_mut())
            {
                let report = evaluate_model(trainer.model_mut(), loader)?;
                events.push(TrainingEvent::Eval {
                    step,
                    epoch: (epoch + 1) as f32,
                    report,
                });
                last_eval = Some(report);
            }

            if training.save_strategy == SaveStrategy::Epoch {
                let dir = training.output_dir.join(format!("checkpoint-{step}"));
                let state = trainer.model_mut().state_dict(true)?;
                let path = checkpoint::save_adapter(&dir, &manifest, &state)?;
                events.push(TrainingEvent::Checkpoint { step, path });
            }
        }

        let global_step = trainer.step();
        drop(trainer);

        let adapter_dir = training.output_dir.join("adapter");
        self.save_adapter(&adapter_dir)?;

        let hub_dir = if self.config.hub.push_to_hub {
            Some(self.push_to_hub(last_eval.map(|eval| eval.accuracy))?)
        } else {
            None
        };

        Ok(TrainReport {
            global_step,
            train_loss: total_loss / global_step.max(1) as f32,
            eval: last_eval,
            adapter_dir,
            hub_dir,
            events,
        })
    }

    /// Measures the loss and accuracy of the model over the evaluation split.
    pub fn evaluate(&mut self) -> Result<EvalReport> {
        let eval = self.load_split(
            self.config.dataset.eval_split,
            self.config.dataset.max_eval_samples,
        )?;

        let mut loader = DataLoader::new(
            eval,
            Collator::new(self.processor.clone()),
            self.config.training.per_device_eval_batch_size,
            self.config.training.remove_unused_columns,
        )?;

        evaluate_model(&mut self.model, &mut loader)
    }

    /// Classifies a single image of any size.
    ///
    /// # Returns
    /// The most likely class with its probability.
    pub fn predict(&mut self, image: &RgbImage) -> Result<Prediction> {
        let pixel_values = self.processor.process(image).insert_axis(Axis(0));
        let logits = self.model.forward(pixel_values.view(), Mode::Eval)?;
        let scores = logits.row(0);

        let class_id = metrics::argmax(scores).ok_or(MlErr::EmptyInput("a prediction"))?;
        let score = metrics::softmax(scores)[class_id];
        let label = self
            .class_names
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| class_id.to_string());

        info!("predicted {label} ({class_id}) with probability {score:.4}");
        Ok(Prediction {
            class_id,
            label,
            score,
        })
    }

    /// Describes the session's adapter as it is saved.
    pub fn manifest(&self) -> AdapterManifest {
        AdapterManifest {
            base_model: self.config.model.name.clone(),
            adapter_name: self.config.adapter.name.clone(),
            dataset: self.config.dataset.name.clone(),
            num_labels: self.config.model.vit.num_labels,
            config: self.config.adapter.config.clone(),
        }
    }

    /// Saves the adapter and the classification head into `dir`.
    pub fn save_adapter(&mut self, dir: impl AsRef<Path>) -> Result<PathBuf> {
        let state = self.model.state_dict(true)?;
        checkpoint::save_adapter(dir, &self.manifest(), &state)
    }

    /// Replaces the adapter and the classification head with the ones saved in `dir`.
    pub fn load_adapter(&mut self, dir: impl AsRef<Path>) -> Result<LoadReport> {
        let (manifest, state) = checkpoint::load_adapter(dir)?;
        self.attach(&manifest, &state)
    }

    /// Publishes the adapter to the hub in the config.
    ///
    /// # Arguments
    /// * `accuracy` - The evaluation accuracy to put in the model card, if known.
    pub fn push_to_hub(&mut self, accuracy: Option<f32>) -> Result<PathBuf> {
        let repo_id = self.config.hub.repo_id.clone().ok_or_else(|| {
            OrchestratorError::InvalidConfig("pushing to the hub needs a repo_id".into())
        })?;

        let state = self.model.state_dict(true)?;
        hub::push_adapter(
            &self.config.hub.hub_dir,
            &repo_id,
            &self.manifest(),
            &state,
            accuracy,
        )
    }

    /// Replaces the adapter and the classification head with the ones in the hub.
    pub fn pull_from_hub(&mut self, repo_id: &str) -> Result<LoadReport> {
        let (manifest, state) = hub::pull_adapter(&self.config.hub.hub_dir, repo_id)?;
        self.attach(&manifest, &state)
    }

    fn attach(&mut self, manifest: &AdapterManifest, state: &StateDict) -> Result<LoadReport> {
        let ours = self.manifest();
        if manifest.adapter_name != ours.adapter_name
            || manifest.config != ours.config
            || manifest.num_labels != ours.num_labels
        {
            return Err(OrchestratorError::Checkpoint(format!(
                "adapter {} ({} labels) doesn't fit the session's adapter {} ({} labels)",
                manifest.adapter_name, manifest.num_labels, ours.adapter_name, ours.num_labels
            )));
        }

        if manifest.base_model != ours.base_model {
            warn!(
                "adapter was trained on {} but the session's backbone is {}",
                manifest.base_model, ours.base_model
            );
        }

        let trainable = self.model.state_dict(true)?;
        if let Some(name) = state.keys().find(|name| !trainable.contains_key(*name)) {
            return Err(OrchestratorError::Checkpoint(format!(
                "saved tensor {name} isn't part of the adapter or the head"
            )));
        }

        let report = self.model.load_state_dict(state)?;
        if let Some(name) = report.mismatched.first().or(report.unexpected.first()) {
            return Err(OrchestratorError::Checkpoint(format!(
                "saved tensor {name} doesn't fit the model"
            )));
        }

        info!("attached adapter {}, {} tensors", manifest.adapter_name, report.loaded.len());
        Ok(report)
    }

    fn load_split(&self, split: Split, limit: Option<usize>) -> Result<Dataset> {
        let dataset = self.source.load(split)?;

        let dataset = match limit {
            Some(n) => dataset.take(n),
            None => dataset,
        };

        info!("using {} examples of the {split} split", dataset.len());
        Ok(dataset)
    }
}

/// Builds the backbone, from the checkpoint when there is one, and attaches a trainable adapter.
fn build_model(config: &RunConfig) -> Result<VisionTransformer> {
    let mut model = VisionTransformer::new(config.model.vit.clone(), config.training.seed)?;

    match &config.model.checkpoint {
        Some(path) => {
            let state = checkpoint::read_safetensors(path)?;
            let report = model.load_pretrained(&state)?;

            info!(
                "loaded {} pretrained tensors of {} from {}",
                report.loaded.len(),
                config.model.name,
                path.display()
            );
            if !report.missing.is_empty() {
                warn!(
                    "{} parameters have no pretrained tensor, e.g. {}",
                    report.missing.len(),
                    report.missing[0]
                );
            }
        }
        None => warn!(
            "no checkpoint for {}, the backbone is randomly initialized",
            config.model.name
        ),
    }

    model.add_adapter(&config.adapter.name, &config.adapter.config)?;
    model.train_adapter()?;
    Ok(model)
}

/// Runs `model` over every batch of `loader` in evaluation mode.
fn evaluate_model<M: Model>(model: &mut M, loader: &mut DataLoader) -> Result<EvalReport> {
    let loss_fn = CrossEntropy::new();
    let mut accuracy = Accuracy::default();
    let mut total_loss = 0.;

    for batch in loader.batches() {
        let batch = batch?;
        let logits = model.forward(batch.pixel_values.view(), Mode::Eval)?;

        total_loss += loss_fn.loss(logits.view(), &batch.labels)? * batch.len() as f32;
        accuracy.update(logits.view(), &batch.labels)?;
    }

    let samples = accuracy.total();
    let accuracy = accuracy
        .compute()
        .ok_or(MlErr::EmptyInput("an evaluation"))?;
    let loss = total_loss / samples as f32;

    info!("eval over {samples} examples: loss {loss:.4}, accuracy {accuracy:.4}");
    Ok(EvalReport {
        loss,
        accuracy,
        samples,
    })
}

#[cfg(test)]
mod tests {
    use data::{Example, source::InMemorySource};
    use image::Rgb;
    use machine_learning::arch::ViTConfig;

    use super::*;

    fn config(output: &Path) -> RunConfig {
        let mut config = RunConfig::default();
        config.model.vit = ViTConfig {
            image_size: 8,
            patch_size: 4,
            hidden_size: 8,
            num_hidden_layers: 1,
            num_attention_heads: 2,
            intermediate_size: 16,
            num_labels: 3,
            ..Default::default()
        };
        config.adapter.config.reduction_factor = 4.;
        config.dataset.processor = ImageProcessor::with_size(8);
        config.training.output_dir = output.to_path_buf();
        config.training.per_device_train_batch_size = 2;
        config.training.per_device_eval_batch_size = 4;
        config.training.num_train_epochs = 2;
        config.training.logging_steps = 1;
        config
    }

    fn source(n: usize) -> Box<dyn DatasetSource> {
        let examples: Vec<_> = (0..n)
            .map(|i| Example::new(RgbImage::from_pixel(16, 16, Rgb([(i * 20) as u8, 0, 0])), i % 3))
            .collect();
        let names = ["red", "green", "blue"].map(String::from);

        Box::new(InMemorySource::new(
            examples.clone(),
            examples,
            Arc::from(names.as_slice()),
        ))
    }

    #[test]
    fn labels_must_match_classes() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.model.vit.num_labels = 100;

        assert!(matches!(
            Session::with_source(config, source(3)),
            Err(OrchestratorError::InvalidConfig(_))
        ));
    }

    #[test]
    fn train_emits_events_and_saves_adapter() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.training.save_strategy = SaveStrategy::Epoch;
        let mut session = Session::with_source(config, source(5)).unwrap();

        let report = session.train().unwrap();

        // 5 examples in batches of 2 make 3 steps per epoch.
        assert_eq!(report.global_step, 6);
        let logs = report
            .events
            .iter()
            .filter(|e| matches!(e, TrainingEvent::Log { .. }))
            .count();
        let evals = report
            .events
            .iter()
            .filter(|e| matches!(e, TrainingEvent::Eval { .. }))
            .count();
        assert_eq!(logs, 6);
        assert_eq!(evals, 2);
        assert!(report.events.contains(&TrainingEvent::Checkpoint {
            step: 3,
            path: dir.path().join("checkpoint-3").join(checkpoint::ADAPTER_WEIGHTS),
        }));
        assert_eq!(report.eval.map(|e| e.samples), Some(5));
        assert!(report.adapter_dir.join(checkpoint::ADAPTER_CONFIG).exists());
        assert!(report.hub_dir.is_none());
    }

    #[test]
    fn eval_by_steps() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.training.eval_strategy = EvalStrategy::Steps;
        config.training.eval_steps = Some(2);
        config.dataset.max_eval_samples = Some(2);
        let mut session = Session::with_source(config, source(4)).unwrap();

        let report = session.train().unwrap();

        let eval_steps: Vec<_> = report
            .events
            .iter()
            .filter_map(|e| match e {
                TrainingEvent::Eval { step, report, .. } => Some((*step, report.samples)),
                _ => None,
            })
            .collect();
        assert_eq!(eval_steps, vec![(2, 2), (4, 2)]);
    }

    #[test]
    fn predict_returns_a_known_class() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::with_source(config(dir.path()), source(3)).unwrap();

        let prediction = session
            .predict(&RgbImage::from_pixel(40, 30, Rgb([10, 200, 30])))
            .unwrap();

        assert!(prediction.class_id < 3);
        assert_eq!(prediction.label, session.class_names()[prediction.class_id]);
        assert!(prediction.score > 0. && prediction.score <= 1.);
    }

    #[test]
    fn empty_eval_split() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.dataset.max_eval_samples = Some(0);
        let mut session = Session::with_source(config, source(3)).unwrap();

        assert!(matches!(
            session.evaluate(),
            Err(OrchestratorError::Ml(MlErr::EmptyInput(_)))
        ));
    }

    #[test]
    fn empty_eval_split_stops_before_training() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.dataset.max_eval_samples = Some(0);
        let mut session = Session::with_source(config, source(3)).unwrap();
        let before = session.model.state_dict(true).unwrap();

        assert!(matches!(
            session.train(),
            Err(OrchestratorError::Ml(MlErr::EmptyInput(_)))
        ));
        assert_eq!(session.model.state_dict(true).unwrap(), before);
        assert!(!dir.path().join("adapter").exists());
    }

    #[test]
    fn empty_eval_split_is_fine_without_evaluation() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.dataset.max_eval_samples = Some(0);
        config.training.eval_strategy = EvalStrategy::No;
        config.training.num_train_epochs = 1;
        let mut session = Session::with_source(config, source(3)).unwrap();

        let report = session.train().unwrap();
        assert_eq!(report.eval, None);
        assert!(report.adapter_dir.join(checkpoint::ADAPTER_WEIGHTS).exists());
    }

    #[test]
    fn adapter_carrying_backbone_tensors_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::with_source(config(dir.path()), source(3)).unwrap();

        let backbone = session.model.state_dict(false).unwrap();
        let (name, tensor) = backbone
            .iter()
            .find(|(name, _)| name.starts_with("vit.embeddings."))
            .unwrap();
        let mut tampered = session.model.state_dict(true).unwrap();
        let mut overwrite = tensor.clone();
        overwrite.data.iter_mut().for_each(|v| *v += 1.);
        tampered.insert(name.clone(), overwrite);
        checkpoint::save_adapter(dir.path().join("a"), &session.manifest(), &tampered).unwrap();

        assert!(matches!(
            session.load_adapter(dir.path().join("a")),
            Err(OrchestratorError::Checkpoint(_))
        ));
        assert_eq!(session.model.state_dict(false).unwrap(), backbone);
    }

    #[test]
    fn adapter_of_another_shape_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::with_source(config(dir.path()), source(3)).unwrap();
        session.save_adapter(dir.path().join("a")).unwrap();

        let mut other = config(dir.path());
        other.adapter.config.reduction_factor = 2.;
        let mut other = Session::with_source(other, source(3)).unwrap();

        assert!(matches!(
            other.load_adapter(dir.path().join("a")),
            Err(OrchestratorError::Checkpoint(_))
        ));
    }
}
