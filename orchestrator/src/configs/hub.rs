use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Where trained adapters are published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Pushes the adapter once training is done.
    pub push_to_hub: bool,
    /// The local hub, one directory per repository.
    pub hub_dir: PathBuf,
    /// The repository, as `owner/name`.
    pub repo_id: Option<String>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            push_to_hub: false,
            hub_dir: PathBuf::from("hub"),
            repo_id: None,
        }
    }
}
