use std::{error::Error, fmt, io};

use data::DataErr;
use machine_learning::MlErr;
use safetensors::SafeTensorError;

/// The result type used in the entire orchestrator.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// All errors that can occur in the orchestrator.
#[derive(Debug)]
pub enum OrchestratorError {
    /// Invalid configuration, caught before any work starts.
    InvalidConfig(String),
    /// A checkpoint or adapter directory doesn't hold what's expected.
    Checkpoint(String),
    Data(DataErr),
    Ml(MlErr),
    Json(serde_json::Error),
    SafeTensors(SafeTensorError),
    /// An underlying I/O error not covered by the above variants.
    Io(io::Error),
}

impl fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            Self::Checkpoint(msg) => write!(f, "checkpoint error: {msg}"),
            Self::Data(e) => write!(f, "data error: {e}"),
            Self::Ml(e) => write!(f, "model error: {e}"),
            Self::Json(e) => write!(f, "json error: {e}"),
            Self::SafeTensors(e) => write!(f, "safetensors error: {e}"),
            Self::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl Error for OrchestratorError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Data(e) => Some(e),
            Self::Ml(e) => Some(e),
            Self::Json(e) => Some(e),
            Self::SafeTensors(e) => Some(e),
            Self::Io(e) => Some(e),
            Self::InvalidConfig(_) | Self::Checkpoint(_) => None,
        }
    }
}

impl From<io::Error> for OrchestratorError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<DataErr> for OrchestratorError {
    fn from(e: DataErr) -> Self {
        Self::Data(e)
    }
}

impl From<MlErr> for OrchestratorError {
    fn from(e: MlErr) -> Self {
        Self::Ml(e)
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

impl From<SafeTensorError> for OrchestratorError {
    fn from(e: SafeTensorError) -> Self {
        Self::SafeTensors(e)
    }
}
