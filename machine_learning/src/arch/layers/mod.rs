mod adapter;
mod attention;
mod dense;
mod embeddings;
mod feed_forward;
mod layer_norm;

pub use adapter::BottleneckAdapter;
pub use attention::{MultiHeadAttention, softmax_rows};
pub use dense::Dense;
pub use embeddings::Embeddings;
pub use feed_forward::FeedForward;
pub use layer_norm::LayerNorm;
