pub mod activations;
mod config;
pub mod layers;
pub mod loss;
mod model;
mod param;
mod state;
mod vit;

pub use config::{AdapterPlusConfig, InitWeights, Scaling, ViTConfig};
pub use model::{Mode, Model};
pub use param::{Param, ParamVisitor};
pub use state::{LoadReport, ParamSummary, StateDict, TensorData};
pub use vit::{EncoderBlock, VisionTransformer};
