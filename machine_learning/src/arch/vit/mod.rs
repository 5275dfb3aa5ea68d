mod block;
mod vision_transformer;

pub use block::EncoderBlock;
pub use vision_transformer::VisionTransformer;
