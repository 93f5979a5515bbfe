//! Resilient vector storage for tool embeddings

pub mod backend;
pub mod connection;
pub mod index;
pub mod memory;
pub mod postgres;
pub mod retry;
pub mod store;

pub use backend::{
    cosine_similarity, Connector, IndexConfiguration, IndexSpec, IndexStrategy, NewEmbedding,
    ScoredRecord, SimilarityQuery, ToolEmbeddingRecord, VectorBackend, METADATA_BACKEND_KEY, NO_THRESHOLD,
    TOOL_ENTITY_KIND, VECTOR_INDEX_NAME,
};
pub use connection::{connector_for, ConnectionHealth, StorageManager, WriteSession};
pub use index::{VectorIndexManager, EXTENDED_CEILING, STANDARD_CEILING};
pub use memory::{MemoryBackend, MemoryCapabilities, MemoryConnector};
pub use postgres::{PostgresBackend, PostgresConnector};
pub use retry::{
    should_retry_error, with_retry, OnRetry, RetryClassifier, RetryExecutor, RetryPolicy,
};
pub use store::{StoreStats, ToolEmbeddingStore};
