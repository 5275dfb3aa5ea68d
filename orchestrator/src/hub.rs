//! A local model hub: a directory holding one folder per repository, each with the files of a
//! single adapter and a model card.

use std::{
    fs,
    path::{Path, PathBuf},
};

use log::info;
use machine_learning::arch::StateDict;

use crate::{
    OrchestratorError, Result,
    checkpoint::{self, AdapterManifest},
};

pub const MODEL_CARD: &str = "README.md";

/// Resolves the folder of `repo_id` inside the hub.
///
/// # Returns
/// The folder or an error if `repo_id` isn't of the form `owner/name`.
pub fn repo_dir(hub_dir: &Path, repo_id: &str) -> Result<PathBuf> {
    let parts: Vec<_> = repo_id.split('/').collect();

    let valid = |part: &&str| {
        !part.is_empty()
            && *part != "."
            && *part != ".."
            && part
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    };

    match parts.as_slice() {
        [owner, name] if valid(owner) && valid(name) => Ok(hub_dir.join(owner).join(name)),
        _ => Err(OrchestratorError::InvalidConfig(format!(
            "repo_id {repo_id:?} must look like owner/name"
        ))),
    }
}

/// Publishes an adapter to the hub, replacing any previous version of the repository.
///
/// # Arguments
/// * `hub_dir` - The root of the hub.
/// * `repo_id` - The repository, as `owner/name`.
/// * `manifest` - Describes the adapter.
/// * `state` - The adapter and head tensors.
/// * `accuracy` - The evaluation accuracy to put in the model card, if known.
///
/// # Returns
/// The folder of the repository.
pub fn push_adapter(
    hub_dir: &Path,
    repo_id: &str,
    manifest: &AdapterManifest,
    state: &StateDict,
    accuracy: Option<f32>,
) -> Result<PathBuf> {
    let dir = repo_dir(hub_dir, repo_id)?;

    checkpoint::save_adapter(&dir, manifest, state)?;
    fs::write(dir.join(MODEL_CARD), model_card(repo_id, manifest, accuracy))?;

    info!("pushed adapter to {repo_id} at {}", dir.display());
    Ok(dir)
}

/// Fetches an adapter previously pushed to the hub.
pub fn pull_adapter(hub_dir: &Path, repo_id: &str) -> Result<(AdapterManifest, StateDict)> {
    let dir = repo_dir(hub_dir, repo_id)?;

    if !dir.is_dir() {
        return Err(OrchestratorError::Checkpoint(format!(
            "{repo_id} isn't in the hub at {}",
            hub_dir.display()
        )));
    }

    checkpoint::load_adapter(dir)
}

fn model_card(repo_id: &str, manifest: &AdapterManifest, accuracy: Option<f32>) -> String {
    let mut card = format!(
        "---\n\
         base_model: {base}\n\
         datasets:\n\
         - {dataset}\n\
         tags:\n\
         - adapterplus\n\
         - image-classification\n\
         - vit\n\
         ---\n\n\
         # {repo_id}\n\n\
         AdapterPlus adapter `{name}` for `{base}`, fine-tuned on the {dataset} dataset \
         with {labels} classes.\n",
        base = manifest.base_model,
        dataset = manifest.dataset,
        name = manifest.adapter_name,
        labels = manifest.num_labels,
    );

    if let Some(accuracy) = accuracy {
        card.push_str(&format!("\nEvaluation accuracy: {accuracy:.4}\n"));
    }

    card
}
