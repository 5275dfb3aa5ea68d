use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use bytemuck::Pod;
use half::{bf16, f16};
use log::{debug, info};
use machine_learning::arch::{AdapterPlusConfig, StateDict, TensorData};
use safetensors::{Dtype, SafeTensors, tensor::TensorView};
use serde::{Deserialize, Serialize};

use crate::{OrchestratorError, Result};

pub const ADAPTER_WEIGHTS: &str = "adapter_model.safetensors";
pub const ADAPTER_CONFIG: &str = "adapter_config.json";

/// What is saved next to the adapter's tensors, enough to attach them to a fresh model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterManifest {
    pub base_model: String,
    pub adapter_name: String,
    /// The dataset the adapter was trained on.
    pub dataset: String,
    pub num_labels: usize,
    pub config: AdapterPlusConfig,
}

/// Reads every tensor of a safetensors file as `f32`.
///
/// # Arguments
/// * `path` - A safetensors file with `F32`, `F16` or `BF16` tensors.
///
/// # Returns
/// The tensors by name or an error if the file can't be read or holds another dtype.
pub fn read_safetensors(path: impl AsRef<Path>) -> Result<StateDict> {
    let path = path.as_ref();
    let bytes = fs::read(path)?;
    let tensors = SafeTensors::deserialize(&bytes)?;

    let state = tensors
        .tensors()
        .into_iter()
        .map(|(name, view)| {
            let data = match view.dtype() {
                Dtype::F32 => cast_to_vec::<f32>(view.data()),
                Dtype::F16 => cast_to_vec::<f16>(view.data())
                    .into_iter()
                    .map(f16::to_f32)
                    .collect(),
                Dtype::BF16 => cast_to_vec::<bf16>(view.data())
                    .into_iter()
                    .map(bf16::to_f32)
                    .collect(),
                dtype => {
                    return Err(OrchestratorError::Checkpoint(format!(
                        "{name} in {} has unsupported dtype {dtype:?}",
                        path.display()
                    )));
                }
            };

            let tensor = TensorData {
                shape: view.shape().to_vec(),
                data,
            };
            Ok((name, tensor))
        })
        .collect::<Result<StateDict>>()?;

    debug!("read {} tensors from {}", state.len(), path.display());
    Ok(state)
}

/// Writes `state` as a safetensors file of `F32` tensors.
pub fn write_safetensors(path: impl AsRef<Path>, state: &StateDict) -> Result<()> {
    let views = state
        .iter()
        .map(|(name, tensor)| {
            let bytes: &[u8] = bytemuck::cast_slice(&tensor.data);
            let view = TensorView::new(Dtype::F32, tensor.shape.clone(), bytes)?;
            Ok((name.as_str(), view))
        })
        .collect::<Result<Vec<_>>>()?;

    let metadata = Some(HashMap::from([("format".to_string(), "pt".to_string())]));
    safetensors::serialize_to_file(views, &metadata, path.as_ref())?;
    Ok(())
}

/// Saves an adapter into `dir`, creating it if needed.
///
/// # Arguments
/// * `dir` - Where to write the weights and the manifest.
/// * `manifest` - Describes the adapter.
/// * `state` - The adapter and head tensors.
///
/// # Returns
/// The path of the saved weights.
pub fn save_adapter(
    dir: impl AsRef<Path>,
    manifest: &AdapterManifest,
    state: &StateDict,
) -> Result<PathBuf> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)?;

    let weights = dir.join(ADAPTER_WEIGHTS);
    write_safetensors(&weights, state)?;
    fs::write(
        dir.join(ADAPTER_CONFIG),
        serde_json::to_string_pretty(manifest)?,
    )?;

    info!(
        adapter = manifest.adapter_name.as_str(), tensors = state.len();
        "saved adapter to {}",
        dir.display()
    );
    Ok(weights)
}

/// Loads an adapter saved with `save_adapter`.
pub fn load_adapter(dir: impl AsRef<Path>) -> Result<(AdapterManifest, StateDict)> {
    let dir = dir.as_ref();

    let config = dir.join(ADAPTER_CONFIG);
    if !config.exists() {
        return Err(OrchestratorError::Checkpoint(format!(
            "{} has no {ADAPTER_CONFIG}",
            dir.display()
        )));
    }

    let manifest = serde_json::from_str(&fs::read_to_string(config)?)?;
    let state = read_safetensors(dir.join(ADAPTER_WEIGHTS))?;
    Ok((manifest, state))
}

/// Copies little endian `bytes` into an owned, correctly aligned buffer.
fn cast_to_vec<T: Pod + Default>(bytes: &[u8]) -> Vec<T> {
    let mut out = vec![T::default(); bytes.len() / size_of::<T>()];
    bytemuck::cast_slice_mut::<T, u8>(&mut out).copy_from_slice(bytes);
    out
}
