//! Tool embedding store
//!
//! CRUD and similarity queries over embedding records. Every write goes
//! through the storage manager's write session so a dimensionality
//! migration never interleaves with a write of another width.

use crate::error::{HubError, Result};
use crate::storage::backend::{
    IndexConfiguration, IndexStrategy, NewEmbedding, ScoredRecord, SimilarityQuery,
    ToolEmbeddingRecord,
};
use crate::storage::connection::StorageManager;
use crate::storage::index::VectorIndexManager;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Store summary reported by the `health` command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub records: u64,
    pub active_dimensions: Option<usize>,
    pub index_strategy: Option<IndexStrategy>,
}

pub struct ToolEmbeddingStore {
    storage: Arc<StorageManager>,
    index: VectorIndexManager,
    active: RwLock<Option<IndexConfiguration>>,
}

impl ToolEmbeddingStore {
    pub fn new(storage: Arc<StorageManager>) -> Self {
        Self::with_index_manager(storage, VectorIndexManager::default())
    }

    pub fn with_index_manager(storage: Arc<StorageManager>, index: VectorIndexManager) -> Self {
        Self {
            storage,
            index,
            active: RwLock::new(None),
        }
    }

    pub fn storage(&self) -> &Arc<StorageManager> {
        &self.storage
    }

    /// Index configuration established by this process, if any write happened yet
    pub async fn active_configuration(&self) -> Option<IndexConfiguration> {
        self.active.read().await.clone()
    }

    /// Write or replace the record keyed by `(entity_kind, entity_key)`.
    ///
    /// Reconciles the column width first when `vector` differs from the last
    /// known dimensionality.
    pub async fn upsert(
        &self,
        entity_kind: &str,
        entity_key: &str,
        text_content: &str,
        vector: Vec<f32>,
        metadata: serde_json::Value,
        model: &str,
    ) -> Result<ToolEmbeddingRecord> {
        if vector.is_empty() {
            return Err(HubError::validation("Embedding vector must not be empty"));
        }
        if entity_key.trim().is_empty() {
            return Err(HubError::validation("Entity key must not be empty"));
        }

        let session = self.storage.write_session().await?;
        let backend = session.backend();
        let retry = self.storage.retry_executor();
        let needed = vector.len();

        let known = self.active.read().await.as_ref().map(|c| c.active_dimensions);
        if known != Some(needed) {
            let changed = retry
                .execute("reconcile_dimensions", || {
                    self.index.reconcile_dimensions(backend.as_ref(), needed)
                })
                .await?;
            // Width already matched a pre-existing column; keep its index
            let config = match changed {
                Some(config) => config,
                None => self.index.adopt_or_build(backend.as_ref(), needed).await,
            };
            *self.active.write().await = Some(config);
        }

        let record = NewEmbedding {
            entity_kind: entity_kind.to_string(),
            entity_key: entity_key.to_string(),
            text_content: text_content.to_string(),
            embedding: vector,
            model: model.to_string(),
            metadata,
        };
        let record = &record;
        let stored = retry
            .execute("upsert_embedding", || backend.upsert(record))
            .await?;
        debug!(entity_key, dimensions = stored.dimensions, "Stored embedding");
        Ok(stored)
    }

    /// Records of `entity_kinds` ranked by cosine similarity.
    ///
    /// Pass [`NO_THRESHOLD`](crate::storage::NO_THRESHOLD) as `min_similarity`
    /// to list everything.
    pub async fn similarity_search(
        &self,
        vector: &[f32],
        limit: usize,
        min_similarity: f64,
        entity_kinds: &[&str],
    ) -> Result<Vec<ScoredRecord>> {
        self.similarity_search_in(vector, limit, min_similarity, entity_kinds, None)
            .await
    }

    /// Like [`similarity_search`](Self::similarity_search), restricted to
    /// records hosted by one of `backends` when given
    pub async fn similarity_search_in(
        &self,
        vector: &[f32],
        limit: usize,
        min_similarity: f64,
        entity_kinds: &[&str],
        backends: Option<&[String]>,
    ) -> Result<Vec<ScoredRecord>> {
        if vector.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        if backends.is_some_and(|b| b.is_empty()) {
            return Ok(Vec::new());
        }

        let strategy = self
            .active
            .read()
            .await
            .as_ref()
            .filter(|c| c.active_dimensions == vector.len())
            .map_or(IndexStrategy::None, |c| c.index_strategy);

        let query = SimilarityQuery {
            vector: vector.to_vec(),
            limit,
            min_similarity,
            entity_kinds: entity_kinds.iter().map(|k| k.to_string()).collect(),
            backends: backends.map(<[String]>::to_vec),
            strategy,
        };
        let query = &query;
        self.storage
            .run("similarity_search", |backend| async move {
                backend.similarity_search(query).await
            })
            .await
    }

    /// Delete every record of `entity_kind` whose key starts with `prefix`
    pub async fn delete_by_key_prefix(&self, entity_kind: &str, prefix: &str) -> Result<u64> {
        if prefix.is_empty() {
            return Err(HubError::validation("Key prefix must not be empty"));
        }
        let session = self.storage.write_session().await?;
        let backend = session.backend();
        self.storage
            .retry_executor()
            .execute("delete_by_key_prefix", || {
                backend.delete_by_key_prefix(entity_kind, prefix)
            })
            .await
    }

    pub async fn delete_by_entity(&self, entity_kind: &str, entity_key: &str) -> Result<u64> {
        let session = self.storage.write_session().await?;
        let backend = session.backend();
        self.storage
            .retry_executor()
            .execute("delete_by_entity", || {
                backend.delete_by_entity(entity_kind, entity_key)
            })
            .await
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        let records = self
            .storage
            .run("count_embeddings", |backend| async move { backend.count().await })
            .await?;
        let active = self.active_configuration().await;
        let active_dimensions = match &active {
            Some(config) => Some(config.active_dimensions),
            None => {
                let backend = self.storage.initialize().await?;
                self.index.current_dimensions(backend.as_ref()).await?
            }
        };
        Ok(StoreStats {
            records,
            active_dimensions,
            index_strategy: active.map(|c| c.index_strategy),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::storage::backend::{VectorBackend, NO_THRESHOLD, TOOL_ENTITY_KIND, VECTOR_INDEX_NAME};
    use crate::storage::memory::{MemoryBackend, MemoryConnector};
    use serde_json::json;

    fn store_with(backend: Arc<MemoryBackend>) -> ToolEmbeddingStore {
        let config = StorageConfig {
            health_check_enabled: false,
            retry_delay_ms: 1,
            max_retry_delay_ms: 2,
            ..StorageConfig::default()
        };
        let manager = StorageManager::new(Arc::new(MemoryConnector::new(backend)), config);
        ToolEmbeddingStore::new(manager)
    }

    async fn put(store: &ToolEmbeddingStore, key: &str, vector: Vec<f32>) {
        store
            .upsert(TOOL_ENTITY_KIND, key, key, vector, json!({"key": key}), "test-model")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_upsert_configures_column_on_first_write() {
        let backend = Arc::new(MemoryBackend::default());
        let store = store_with(backend.clone());
        put(&store, "fs:read", vec![1.0, 0.0, 0.0]).await;

        let config = store.active_configuration().await.unwrap();
        assert_eq!(config.active_dimensions, 3);
        assert_eq!(config.index_strategy, IndexStrategy::GraphCosine);
        assert_eq!(backend.column_dimensions().await.unwrap(), Some(3));
        assert!(backend.index(VECTOR_INDEX_NAME).await.is_some());
    }

    #[tokio::test]
    async fn test_restart_reuses_existing_index() {
        let backend = Arc::new(MemoryBackend::default());
        put(&store_with(backend.clone()), "fs:read", vec![0.5; 3000]).await;
        assert_eq!(backend.index_builds(), 1);

        // A fresh process sees the matching column and keeps the index as built
        let restarted = store_with(backend.clone());
        put(&restarted, "fs:write", vec![0.25; 3000]).await;
        assert_eq!(backend.index_builds(), 1);
        let config = restarted.active_configuration().await.unwrap();
        assert_eq!(config.active_dimensions, 3000);
        assert_eq!(config.index_strategy, IndexStrategy::GraphCosineHalfPrecision);
        assert_eq!(backend.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_upsert_replaces_by_key() {
        let backend = Arc::new(MemoryBackend::default());
        let store = store_with(backend.clone());
        put(&store, "fs:read", vec![1.0, 0.0]).await;
        let first = backend.record(TOOL_ENTITY_KIND, "fs:read").await.unwrap();
        put(&store, "fs:read", vec![0.0, 1.0]).await;
        let second = backend.record(TOOL_ENTITY_KIND, "fs:read").await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.embedding, vec![0.0, 1.0]);
        assert_eq!(backend.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_new_dimensionality_drops_mismatched_records() {
        let backend = Arc::new(MemoryBackend::default());
        let store = store_with(backend.clone());
        put(&store, "a:one", vec![0.1; 4]).await;
        put(&store, "a:two", vec![0.2; 4]).await;

        put(&store, "b:three", vec![0.3; 8]).await;

        assert_eq!(backend.count().await.unwrap(), 1);
        assert!(backend.record(TOOL_ENTITY_KIND, "b:three").await.is_some());
        assert_eq!(backend.column_dimensions().await.unwrap(), Some(8));
        assert_eq!(store.active_configuration().await.unwrap().active_dimensions, 8);
    }

    #[tokio::test]
    async fn test_similarity_search_ranks_and_thresholds() {
        let backend = Arc::new(MemoryBackend::default());
        let store = store_with(backend);
        put(&store, "a:exact", vec![1.0, 0.0]).await;
        put(&store, "a:close", vec![0.9, 0.1]).await;
        put(&store, "a:far", vec![0.0, 1.0]).await;

        let hits = store
            .similarity_search(&[1.0, 0.0], 10, 0.5, &[TOOL_ENTITY_KIND])
            .await
            .unwrap();
        let keys: Vec<_> = hits.iter().map(|h| h.record.entity_key.as_str()).collect();
        assert_eq!(keys, vec!["a:exact", "a:close"]);

        let everything = store
            .similarity_search(&[1.0, 0.0], 10, NO_THRESHOLD, &[TOOL_ENTITY_KIND])
            .await
            .unwrap();
        assert_eq!(everything.len(), 3);

        let limited = store
            .similarity_search(&[1.0, 0.0], 1, NO_THRESHOLD, &[TOOL_ENTITY_KIND])
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);

        let other_kind = store
            .similarity_search(&[1.0, 0.0], 10, NO_THRESHOLD, &["prompt"])
            .await
            .unwrap();
        assert!(other_kind.is_empty());
    }

    #[tokio::test]
    async fn test_similarity_search_backend_scope() {
        let backend = Arc::new(MemoryBackend::default());
        let store = store_with(backend);
        for (key, server) in [("fs:read", "fs"), ("git:log", "git")] {
            store
                .upsert(TOOL_ENTITY_KIND, key, key, vec![1.0, 0.0], json!({"serverName": server}), "m")
                .await
                .unwrap();
        }

        let scoped = store
            .similarity_search_in(&[1.0, 0.0], 10, NO_THRESHOLD, &[TOOL_ENTITY_KIND], Some(&["git".to_string()]))
            .await
            .unwrap();
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].record.entity_key, "git:log");

        let none = store
            .similarity_search_in(&[1.0, 0.0], 10, NO_THRESHOLD, &[TOOL_ENTITY_KIND], Some(&[]))
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_deletes() {
        let backend = Arc::new(MemoryBackend::default());
        let store = store_with(backend.clone());
        put(&store, "fs:read", vec![1.0, 0.0]).await;
        put(&store, "fs:write", vec![1.0, 0.0]).await;
        put(&store, "git:log", vec![1.0, 0.0]).await;

        assert_eq!(store.delete_by_key_prefix(TOOL_ENTITY_KIND, "fs:").await.unwrap(), 2);
        assert_eq!(store.delete_by_entity(TOOL_ENTITY_KIND, "git:log").await.unwrap(), 1);
        assert_eq!(store.delete_by_entity(TOOL_ENTITY_KIND, "git:log").await.unwrap(), 0);
        assert!(store.delete_by_key_prefix(TOOL_ENTITY_KIND, "").await.is_err());
    }

    #[tokio::test]
    async fn test_rejects_empty_vector() {
        let store = store_with(Arc::new(MemoryBackend::default()));
        let err = store
            .upsert(TOOL_ENTITY_KIND, "a:b", "text", Vec::new(), json!({}), "m")
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_stats() {
        let backend = Arc::new(MemoryBackend::default());
        let store = store_with(backend);
        let empty = store.stats().await.unwrap();
        assert_eq!(empty.records, 0);
        assert_eq!(empty.active_dimensions, None);

        put(&store, "fs:read", vec![1.0, 0.0, 0.0]).await;
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.records, 1);
        assert_eq!(stats.active_dimensions, Some(3));
        assert_eq!(stats.index_strategy, Some(IndexStrategy::GraphCosine));
    }
}
