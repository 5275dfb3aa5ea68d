mod model_trainer;
mod param_manager;

pub use model_trainer::ModelTrainer;
pub use param_manager::{ParamManager, decays};
