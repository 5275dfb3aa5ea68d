use machine_learning::arch::AdapterPlusConfig;
use serde::{Deserialize, Serialize};

/// The adapter attached to the backbone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// The name the adapter's parameters live under.
    pub name: String,
    #[serde(flatten)]
    pub config: AdapterPlusConfig,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            name: "cifar100".into(),
            config: AdapterPlusConfig::default(),
        }
    }
}
