use super::{EvalStrategy, RunConfig};
use crate::{OrchestratorError, Result};

/// Checks a run config before any work starts.
///
/// # Returns
/// An `InvalidConfig` error describing the first problem found.
pub fn validate(config: &RunConfig) -> Result<()> {
    config
        .model
        .vit
        .validate()
        .and_then(|_| config.adapter.config.validate())
        .map_err(|e| OrchestratorError::InvalidConfig(e.to_string()))?;

    config
        .dataset
        .processor
        .validate()
        .map_err(|e| OrchestratorError::InvalidConfig(e.to_string()))?;

    validate_model(config)?;
    validate_training(config)?;
    validate_hub(config)
}

fn validate_model(config: &RunConfig) -> Result<()> {
    let vit = &config.model.vit;
    let size = config.dataset.processor.size;

    // The processed images must be what the patch embedding expects.
    if size.height != vit.image_size || size.width != vit.image_size {
        return Err(invalid(format!(
            "the processor makes {}x{} images but the model expects {}x{}",
            size.height, size.width, vit.image_size, vit.image_size
        )));
    }

    if vit.num_channels != 3 {
        return Err(invalid(format!(
            "the model must take rgb images, got {} channels",
            vit.num_channels
        )));
    }

    let name = &config.adapter.name;
    if name.is_empty() || name.contains('.') {
        return Err(invalid(format!(
            "adapter name {name:?} must be non empty and without dots"
        )));
    }

    Ok(())
}

fn validate_training(config: &RunConfig) -> Result<()> {
    let training = &config.training;

    if training.per_device_train_batch_size == 0 || training.per_device_eval_batch_size == 0 {
        return Err(invalid("batch sizes must be greater than 0"));
    }

    if training.num_train_epochs == 0 {
        return Err(invalid("num_train_epochs must be greater than 0"));
    }

    if !(training.learning_rate > 0.) {
        return Err(invalid(format!(
            "learning_rate must be positive, got {}",
            training.learning_rate
        )));
    }

    if training.weight_decay < 0. {
        return Err(invalid(format!(
            "weight_decay can't be negative, got {}",
            training.weight_decay
        )));
    }

    if training.eval_strategy == EvalStrategy::Steps && !matches!(training.eval_steps, Some(n) if n > 0)
    {
        return Err(invalid(
            "eval_steps must be set and greater than 0 when evaluating by steps",
        ));
    }

    Ok(())
}

fn validate_hub(config: &RunConfig) -> Result<()> {
    if config.hub.push_to_hub && config.hub.repo_id.is_none() {
        return Err(invalid("push_to_hub needs a repo_id"));
    }

    Ok(())
}

fn invalid(msg: impl Into<String>) -> OrchestratorError {
    OrchestratorError::InvalidConfig(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_invalid(config: &RunConfig) {
        assert!(matches!(
            validate(config),
            Err(OrchestratorError::InvalidConfig(_))
        ));
    }

    #[test]
    fn defaults_are_valid() {
        assert!(validate(&RunConfig::default()).is_ok());
    }

    #[test]
    fn processor_size_must_match_model() {
        let mut config = RunConfig::default();
        config.dataset.processor.size.width = 32;
        assert_invalid(&config);
    }

    #[test]
    fn eval_steps_needed_by_steps_strategy() {
        let mut config = RunConfig::default();
        config.training.eval_strategy = EvalStrategy::Steps;
        assert_invalid(&config);

        config.training.eval_steps = Some(100);
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn zero_batch_size_and_epochs() {
        let mut config = RunConfig::default();
        config.training.per_device_eval_batch_size = 0;
        assert_invalid(&config);

        let mut config = RunConfig::default();
        config.training.num_train_epochs = 0;
        assert_invalid(&config);
    }

    #[test]
    fn push_needs_repo() {
        let mut config = RunConfig::default();
        config.hub.push_to_hub = true;
        assert_invalid(&config);

        config.hub.repo_id = Some("me/vit-adapterplus-cifar100".into());
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn dotted_adapter_name() {
        let mut config = RunConfig::default();
        config.adapter.name = "cifar.100".into();
        assert_invalid(&config);
    }

    #[test]
    fn bad_adapter_config() {
        let mut config = RunConfig::default();
        config.adapter.config.stochastic_depth = 1.;
        assert_invalid(&config);
    }
}
