//! In-process vector backend
//!
//! Used when no database is configured and by the test suite. It enforces the
//! same column-width rules as pgvector and can simulate missing index support
//! and connection outages.

use crate::error::{HubError, Result};
use crate::storage::backend::{
    cosine_similarity, Connector, IndexSpec, IndexStrategy, NewEmbedding, ScoredRecord,
    SimilarityQuery, ToolEmbeddingRecord, VectorBackend, METADATA_BACKEND_KEY, NO_THRESHOLD,
};
use crate::storage::index::STANDARD_CEILING;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Which index kinds the simulated store can build
#[derive(Debug, Clone, Copy)]
pub struct MemoryCapabilities {
    pub graph_index: bool,
    pub flat_index: bool,
    pub half_precision: bool,
}

impl Default for MemoryCapabilities {
    fn default() -> Self {
        Self {
            graph_index: true,
            flat_index: true,
            half_precision: true,
        }
    }
}

#[derive(Default)]
struct MemoryState {
    records: HashMap<(String, String), ToolEmbeddingRecord>,
    column_dimensions: Option<usize>,
    indexes: HashMap<String, IndexSpec>,
}

/// In-memory implementation of [`VectorBackend`]
pub struct MemoryBackend {
    state: RwLock<MemoryState>,
    capabilities: MemoryCapabilities,
    offline: AtomicBool,
    index_builds: AtomicU32,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new(MemoryCapabilities::default())
    }
}

impl MemoryBackend {
    pub fn new(capabilities: MemoryCapabilities) -> Self {
        Self {
            state: RwLock::new(MemoryState::default()),
            capabilities,
            offline: AtomicBool::new(false),
            index_builds: AtomicU32::new(0),
        }
    }

    /// Simulate the store going away (or coming back)
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn is_offline(&self) -> bool {
        self.offline.load(Ordering::SeqCst)
    }

    /// Currently defined index with the given name
    pub async fn index(&self, name: &str) -> Option<IndexSpec> {
        self.state.read().await.indexes.get(name).cloned()
    }

    /// Number of indexes built so far
    pub fn index_builds(&self) -> u32 {
        self.index_builds.load(Ordering::SeqCst)
    }

    /// Stored record for `(kind, key)`
    pub async fn record(&self, kind: &str, key: &str) -> Option<ToolEmbeddingRecord> {
        self.state
            .read()
            .await
            .records
            .get(&(kind.to_string(), key.to_string()))
            .cloned()
    }

    /// Insert a record bypassing width checks, for seeding mixed-dimension states
    pub async fn insert_raw(&self, record: ToolEmbeddingRecord) {
        let mut state = self.state.write().await;
        state
            .records
            .insert((record.entity_kind.clone(), record.entity_key.clone()), record);
    }

    /// Declare the column width directly, as a pre-existing schema would
    pub async fn declare_column(&self, dimensions: Option<usize>) {
        self.state.write().await.column_dimensions = dimensions;
    }

    fn check_online(&self) -> Result<()> {
        if self.is_offline() {
            return Err(HubError::storage_with_code(
                "connection refused by in-memory store",
                "ECONNREFUSED",
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl VectorBackend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    async fn ping(&self) -> Result<()> {
        self.check_online()
    }

    async fn column_dimensions(&self) -> Result<Option<usize>> {
        self.check_online()?;
        Ok(self.state.read().await.column_dimensions)
    }

    async fn sample_record_dimensions(&self) -> Result<Option<usize>> {
        self.check_online()?;
        Ok(self
            .state
            .read()
            .await
            .records
            .values()
            .next()
            .map(|r| r.dimensions))
    }

    async fn delete_mismatched_dimensions(&self, keep: usize) -> Result<u64> {
        self.check_online()?;
        let mut state = self.state.write().await;
        let before = state.records.len();
        state.records.retain(|_, r| r.dimensions == keep);
        Ok((before - state.records.len()) as u64)
    }

    async fn set_column_dimensions(&self, dimensions: usize) -> Result<()> {
        self.check_online()?;
        let mut state = self.state.write().await;
        if let Some(bad) = state.records.values().find(|r| r.dimensions != dimensions) {
            return Err(HubError::storage_with_code(
                format!(
                    "expected {} dimensions, not {} (record {})",
                    dimensions, bad.dimensions, bad.entity_key
                ),
                "22000",
            ));
        }
        if state.column_dimensions != Some(dimensions) && dimensions > STANDARD_CEILING {
            // Changing the type rebuilds dependent indexes at the new width
            if let Some(spec) = state.indexes.values().find(|i| {
                matches!(i.strategy, IndexStrategy::GraphCosine | IndexStrategy::FlatCosine)
            }) {
                let method = match spec.strategy {
                    IndexStrategy::FlatCosine => "ivfflat",
                    _ => "hnsw",
                };
                return Err(HubError::storage_with_code(
                    format!(
                        "column cannot have more than {} dimensions for {} index",
                        STANDARD_CEILING, method
                    ),
                    "54000",
                ));
            }
        }
        state.column_dimensions = Some(dimensions);
        Ok(())
    }

    async fn drop_index(&self, name: &str) -> Result<()> {
        self.check_online()?;
        self.state.write().await.indexes.remove(name);
        Ok(())
    }

    async fn create_index(&self, spec: &IndexSpec) -> Result<()> {
        self.check_online()?;
        let supported = match spec.strategy {
            IndexStrategy::None => true,
            IndexStrategy::GraphCosine => self.capabilities.graph_index,
            IndexStrategy::FlatCosine => self.capabilities.flat_index,
            IndexStrategy::GraphCosineHalfPrecision => {
                self.capabilities.graph_index && self.capabilities.half_precision
            }
        };
        if !supported {
            return Err(HubError::storage_with_code(
                format!("access method for {} is not available", spec.strategy),
                "42704",
            ));
        }

        let mut state = self.state.write().await;
        if state.indexes.contains_key(&spec.name) {
            return Err(HubError::storage_with_code(
                format!("relation \"{}\" already exists", spec.name),
                "42P07",
            ));
        }
        state.indexes.insert(spec.name.clone(), spec.clone());
        self.index_builds.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn index_strategy(&self, name: &str) -> Result<Option<IndexStrategy>> {
        self.check_online()?;
        Ok(self.state.read().await.indexes.get(name).map(|spec| spec.strategy))
    }

    async fn upsert(&self, record: &NewEmbedding) -> Result<ToolEmbeddingRecord> {
        self.check_online()?;
        let mut state = self.state.write().await;
        if let Some(width) = state.column_dimensions {
            if width != record.dimensions() {
                return Err(HubError::storage_with_code(
                    format!("expected {} dimensions, not {}", width, record.dimensions()),
                    "22000",
                ));
            }
        }

        let now = Utc::now();
        let key = (record.entity_kind.clone(), record.entity_key.clone());
        let (id, created_at) = match state.records.get(&key) {
            Some(existing) => (existing.id.clone(), existing.created_at),
            None => (uuid::Uuid::new_v4().to_string(), now),
        };
        let stored = ToolEmbeddingRecord {
            id,
            entity_kind: record.entity_kind.clone(),
            entity_key: record.entity_key.clone(),
            text_content: record.text_content.clone(),
            embedding: record.embedding.clone(),
            dimensions: record.dimensions(),
            model: record.model.clone(),
            metadata: record.metadata.clone(),
            created_at,
            updated_at: now,
        };
        state.records.insert(key, stored.clone());
        Ok(stored)
    }

    async fn similarity_search(&self, query: &SimilarityQuery) -> Result<Vec<ScoredRecord>> {
        self.check_online()?;
        let state = self.state.read().await;
        let mut scored: Vec<ScoredRecord> = state
            .records
            .values()
            .filter(|r| query.entity_kinds.iter().any(|k| k == &r.entity_kind))
            .filter(|r| r.dimensions == query.vector.len())
            .filter(|r| match &query.backends {
                Some(allowed) => r
                    .metadata
                    .get(METADATA_BACKEND_KEY)
                    .and_then(|v| v.as_str())
                    .is_some_and(|name| allowed.iter().any(|a| a == name)),
                None => true,
            })
            .map(|r| ScoredRecord {
                similarity: cosine_similarity(&query.vector, &r.embedding),
                record: r.clone(),
            })
            .filter(|s| query.min_similarity <= NO_THRESHOLD || s.similarity >= query.min_similarity)
            .collect();

        scored.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(query.limit);
        debug!(results = scored.len(), "In-memory similarity search complete");
        Ok(scored)
    }

    async fn delete_by_key_prefix(&self, entity_kind: &str, prefix: &str) -> Result<u64> {
        self.check_online()?;
        let mut state = self.state.write().await;
        let before = state.records.len();
        state
            .records
            .retain(|(kind, key), _| !(kind == entity_kind && key.starts_with(prefix)));
        Ok((before - state.records.len()) as u64)
    }

    async fn delete_by_entity(&self, entity_kind: &str, entity_key: &str) -> Result<u64> {
        self.check_online()?;
        let removed = self
            .state
            .write()
            .await
            .records
            .remove(&(entity_kind.to_string(), entity_key.to_string()));
        Ok(removed.map_or(0, |_| 1))
    }

    async fn count(&self) -> Result<u64> {
        self.check_online()?;
        Ok(self.state.read().await.records.len() as u64)
    }

    async fn close(&self) {}
}

/// Connector handing out a shared [`MemoryBackend`]
pub struct MemoryConnector {
    backend: Arc<MemoryBackend>,
    connects: AtomicU32,
}

impl MemoryConnector {
    pub fn new(backend: Arc<MemoryBackend>) -> Self {
        Self {
            backend,
            connects: AtomicU32::new(0),
        }
    }

    pub fn backend(&self) -> Arc<MemoryBackend> {
        Arc::clone(&self.backend)
    }

    /// Number of successful connects so far
    pub fn connect_count(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> Result<Arc<dyn VectorBackend>> {
        self.backend.check_online()?;
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(self.backend.clone() as Arc<dyn VectorBackend>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::backend::TOOL_ENTITY_KIND;
    use serde_json::json;

    fn new_embedding(key: &str, vector: Vec<f32>) -> NewEmbedding {
        NewEmbedding {
            entity_kind: TOOL_ENTITY_KIND.to_string(),
            entity_key: key.to_string(),
            text_content: key.to_string(),
            embedding: vector,
            model: "test".to_string(),
            metadata: json!({}),
        }
    }

    #[tokio::test]
    async fn test_upsert_preserves_identity() {
        let backend = MemoryBackend::default();
        let first = backend.upsert(&new_embedding("a:one", vec![1.0, 0.0])).await.unwrap();
        let second = backend.upsert(&new_embedding("a:one", vec![0.0, 1.0])).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(backend.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_width_is_enforced() {
        let backend = MemoryBackend::default();
        backend.declare_column(Some(3)).await;
        let err = backend.upsert(&new_embedding("a:one", vec![1.0, 0.0])).await.unwrap_err();
        assert_eq!(err.code().as_deref(), Some("22000"));
    }

    #[tokio::test]
    async fn test_widening_under_graph_index_is_refused() {
        let backend = MemoryBackend::default();
        backend.set_column_dimensions(1536).await.unwrap();
        backend
            .create_index(&IndexSpec {
                name: "idx".to_string(),
                strategy: IndexStrategy::GraphCosine,
                dimensions: 1536,
            })
            .await
            .unwrap();

        let err = backend.set_column_dimensions(3072).await.unwrap_err();
        assert_eq!(err.code().as_deref(), Some("54000"));
        assert!(err.to_string().contains("hnsw"));
        assert_eq!(backend.column_dimensions().await.unwrap(), Some(1536));

        // Widths under the ceiling rebuild fine, as does any width once dropped
        backend.set_column_dimensions(768).await.unwrap();
        backend.drop_index("idx").await.unwrap();
        backend.set_column_dimensions(3072).await.unwrap();
        assert_eq!(backend.index_strategy("idx").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_offline_backend_reports_refused() {
        let backend = MemoryBackend::default();
        backend.set_offline(true);
        let err = backend.ping().await.unwrap_err();
        assert_eq!(err.code().as_deref(), Some("ECONNREFUSED"));
    }

    #[tokio::test]
    async fn test_prefix_delete_is_scoped_to_kind() {
        let backend = MemoryBackend::default();
        backend.upsert(&new_embedding("alpha:one", vec![1.0])).await.unwrap();
        backend.upsert(&new_embedding("alpha:two", vec![1.0])).await.unwrap();
        backend.upsert(&new_embedding("beta:one", vec![1.0])).await.unwrap();

        let removed = backend.delete_by_key_prefix(TOOL_ENTITY_KIND, "alpha:").await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(backend.count().await.unwrap(), 1);
        assert_eq!(backend.delete_by_key_prefix("prompt", "beta:").await.unwrap(), 0);
    }
}
