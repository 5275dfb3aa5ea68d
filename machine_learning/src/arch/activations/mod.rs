mod act_fn;
mod activation;

pub use act_fn::ActFn;
pub use activation::Activation;
