//! Embedding generation for tool discovery

pub mod fallback;
pub mod provider;

pub use fallback::{fallback_embedding, l2_normalize, FALLBACK_DIMENSIONS};
pub use provider::{dimensions_for_model, Embedder, EmbeddingService, FALLBACK_MODEL};
