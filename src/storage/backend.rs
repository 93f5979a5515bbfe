//! Vector backend abstraction
//!
//! A [`VectorBackend`] owns exactly one logical collection of embedding
//! records with a single vector column whose declared width and index are
//! mutable at runtime. [`Connector`] produces backends for the
//! [`StorageManager`](crate::storage::StorageManager).

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Entity kind used for tool records
pub const TOOL_ENTITY_KIND: &str = "tool";

/// Name of the single vector index maintained on the embedding column
pub const VECTOR_INDEX_NAME: &str = "idx_vector_embeddings_embedding";

/// Metadata field holding the name of the backend that hosts a tool
pub const METADATA_BACKEND_KEY: &str = "serverName";

/// Similarity sentinel that disables thresholding
pub const NO_THRESHOLD: f64 = -1.0;

/// A stored embedding record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolEmbeddingRecord {
    pub id: String,
    pub entity_kind: String,
    pub entity_key: String,
    pub text_content: String,
    pub embedding: Vec<f32>,
    pub dimensions: usize,
    pub model: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Write payload for an upsert keyed by `(entity_kind, entity_key)`
#[derive(Debug, Clone)]
pub struct NewEmbedding {
    pub entity_kind: String,
    pub entity_key: String,
    pub text_content: String,
    pub embedding: Vec<f32>,
    pub model: String,
    pub metadata: serde_json::Value,
}

impl NewEmbedding {
    pub fn dimensions(&self) -> usize {
        self.embedding.len()
    }
}

/// Similarity query parameters
#[derive(Debug, Clone)]
pub struct SimilarityQuery {
    pub vector: Vec<f32>,
    pub limit: usize,
    /// Minimum similarity; [`NO_THRESHOLD`] disables the filter
    pub min_similarity: f64,
    pub entity_kinds: Vec<String>,
    /// Restrict to records whose metadata names one of these backends
    pub backends: Option<Vec<String>>,
    /// Active index strategy, so backends can phrase the distance the way the index expects
    pub strategy: IndexStrategy,
}

/// A record with its similarity (`1 - cosine distance`) to the query
#[derive(Debug, Clone)]
pub struct ScoredRecord {
    pub record: ToolEmbeddingRecord,
    pub similarity: f64,
}

/// Index strategy for the vector column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IndexStrategy {
    /// Unindexed linear scan
    None,
    /// List-partitioned cosine index (legacy fallback)
    FlatCosine,
    /// Graph-based cosine index
    GraphCosine,
    /// Graph-based cosine index over a half-precision cast
    GraphCosineHalfPrecision,
}

impl IndexStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexStrategy::None => "none",
            IndexStrategy::FlatCosine => "flat-cosine",
            IndexStrategy::GraphCosine => "graph-cosine",
            IndexStrategy::GraphCosineHalfPrecision => "graph-cosine-half-precision",
        }
    }
}

impl fmt::Display for IndexStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requested index definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: String,
    pub strategy: IndexStrategy,
    pub dimensions: usize,
}

/// Active dimensionality and the index built for it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexConfiguration {
    pub active_dimensions: usize,
    pub index_strategy: IndexStrategy,
}

/// Storage operations the vector layer needs from a backing store
#[async_trait]
pub trait VectorBackend: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &str;

    /// Trivial liveness check
    async fn ping(&self) -> Result<()>;

    /// Declared width of the vector column, `None` when not yet configured
    async fn column_dimensions(&self) -> Result<Option<usize>>;

    /// `dimensions` field of any stored record
    async fn sample_record_dimensions(&self) -> Result<Option<usize>>;

    /// Delete every record whose `dimensions` differs from `keep`; returns the count removed
    async fn delete_mismatched_dimensions(&self, keep: usize) -> Result<u64>;

    /// Change the declared width of the vector column
    async fn set_column_dimensions(&self, dimensions: usize) -> Result<()>;

    /// Drop the named index; a missing index is not an error
    async fn drop_index(&self, name: &str) -> Result<()>;

    /// Build an index
    async fn create_index(&self, spec: &IndexSpec) -> Result<()>;

    /// Strategy of the named index, `None` when it does not exist
    async fn index_strategy(&self, name: &str) -> Result<Option<IndexStrategy>>;

    /// Insert or replace the record keyed by `(entity_kind, entity_key)`
    async fn upsert(&self, record: &NewEmbedding) -> Result<ToolEmbeddingRecord>;

    /// Records ranked by cosine similarity descending
    async fn similarity_search(&self, query: &SimilarityQuery) -> Result<Vec<ScoredRecord>>;

    /// Delete records of `entity_kind` whose key starts with `prefix`
    async fn delete_by_key_prefix(&self, entity_kind: &str, prefix: &str) -> Result<u64>;

    /// Delete a single record
    async fn delete_by_entity(&self, entity_kind: &str, entity_key: &str) -> Result<u64>;

    /// Number of stored records
    async fn count(&self) -> Result<u64>;

    /// Release underlying connections
    async fn close(&self);
}

/// Factory for backend connections
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a connection, preparing the schema if required
    async fn connect(&self) -> Result<Arc<dyn VectorBackend>>;
}

/// Cosine similarity of two equal-length vectors; zero vectors score 0
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| (*x as f64) * (*y as f64)).sum();
    let norm_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-9);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-9);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_strategy_serialization() {
        let json = serde_json::to_string(&IndexStrategy::GraphCosineHalfPrecision).unwrap();
        assert_eq!(json, "\"graph-cosine-half-precision\"");
        assert_eq!(IndexStrategy::FlatCosine.to_string(), "flat-cosine");
    }
}
