pub mod checkpoint;
pub mod configs;
pub mod error;
pub mod hub;
mod session;

use std::path::Path;

use configs::RunConfig;

pub use error::{OrchestratorError, Result};
pub use session::{EvalReport, Prediction, Session, TrainReport, TrainingEvent};

/// Fine-tunes an adapter as described by a run config file.
///
/// # Returns
/// The session holding the trained model together with the training report.
///
/// # Errors
/// Returns an `OrchestratorError` if the config is invalid or any step of the run fails.
pub fn train(config_path: impl AsRef<Path>) -> Result<(Session, TrainReport)> {
    log::info!("reading config from {}", config_path.as_ref().display());
    let config = RunConfig::load(config_path)?;

    log::info!(
        "fine-tuning {} with adapter {} on {}",
        config.model.name,
        config.adapter.name,
        config.dataset.name
    );
    let mut session = Session::new(config)?;
    let report = session.train()?;
    Ok((session, report))
}
