//! Vector index management
//!
//! Keeps the width of the vector column and its index in step with the
//! dimensionality the embedding provider is currently producing.

use crate::error::Result;
use crate::storage::backend::{
    IndexConfiguration, IndexSpec, IndexStrategy, VectorBackend, VECTOR_INDEX_NAME,
};
use tracing::{debug, info, warn};

/// Widest vector the standard vector type can index
pub const STANDARD_CEILING: usize = 2000;

/// Widest vector indexable through a half-precision cast
pub const EXTENDED_CEILING: usize = 4000;

const MODEL_ALTERNATIVES: &str =
    "text-embedding-3-small (1536), text-embedding-ada-002 (1536) or bge-m3 (1024)";

/// Strategies to try, in order, for a dimensionality
pub fn candidate_strategies(dimensions: usize) -> &'static [IndexStrategy] {
    if dimensions <= STANDARD_CEILING {
        &[IndexStrategy::GraphCosine, IndexStrategy::FlatCosine]
    } else if dimensions <= EXTENDED_CEILING {
        &[IndexStrategy::GraphCosineHalfPrecision]
    } else {
        &[]
    }
}

/// Chooses and builds the index for the active dimensionality
#[derive(Debug, Clone)]
pub struct VectorIndexManager {
    index_name: String,
}

impl Default for VectorIndexManager {
    fn default() -> Self {
        Self::new(VECTOR_INDEX_NAME)
    }
}

impl VectorIndexManager {
    pub fn new(index_name: impl Into<String>) -> Self {
        Self {
            index_name: index_name.into(),
        }
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    /// Build the best index the store supports for `dimensions`.
    ///
    /// Never fails on index problems; every tier degrades to
    /// [`IndexStrategy::None`] with a warning.
    pub async fn ensure_index(
        &self,
        backend: &dyn VectorBackend,
        dimensions: usize,
    ) -> IndexConfiguration {
        if let Err(e) = backend.drop_index(&self.index_name).await {
            debug!(index = %self.index_name, error = %e, "Ignoring failure to drop existing index");
        }

        let candidates = candidate_strategies(dimensions);
        if candidates.is_empty() {
            warn!(
                dimensions,
                "Embedding dimensions {} exceed the {} dimension limit for vector indexes \
                 ({} without half precision). Search will use a linear scan. Consider {} \
                 or reducing dimensionality.",
                dimensions,
                EXTENDED_CEILING,
                STANDARD_CEILING,
                MODEL_ALTERNATIVES
            );
            return self.configuration(dimensions, IndexStrategy::None);
        }

        for strategy in candidates {
            let spec = IndexSpec {
                name: self.index_name.clone(),
                strategy: *strategy,
                dimensions,
            };
            match backend.create_index(&spec).await {
                Ok(()) => {
                    info!(dimensions, strategy = %strategy, "Vector index created");
                    return self.configuration(dimensions, *strategy);
                }
                Err(e) => {
                    warn!(dimensions, strategy = %strategy, error = %e, "Vector index creation failed");
                }
            }
        }

        if dimensions > STANDARD_CEILING {
            warn!(
                dimensions,
                "Could not build a half-precision index for {} dimensions. Vector indexes \
                 support up to {} dimensions ({} with half precision). Search will use a \
                 linear scan. Consider {}.",
                dimensions,
                STANDARD_CEILING,
                EXTENDED_CEILING,
                MODEL_ALTERNATIVES
            );
        } else {
            warn!(dimensions, "No vector index could be built, search will use a linear scan");
        }
        self.configuration(dimensions, IndexStrategy::None)
    }

    /// Adopt the index already present for `dimensions`, building one only
    /// when none exists
    pub async fn adopt_or_build(
        &self,
        backend: &dyn VectorBackend,
        dimensions: usize,
    ) -> IndexConfiguration {
        match backend.index_strategy(&self.index_name).await {
            Ok(Some(strategy)) => {
                debug!(dimensions, strategy = %strategy, "Reusing existing vector index");
                self.configuration(dimensions, strategy)
            }
            Ok(None) => self.ensure_index(backend, dimensions).await,
            Err(e) => {
                warn!(error = %e, "Could not inspect existing vector index, rebuilding");
                self.ensure_index(backend, dimensions).await
            }
        }
    }

    fn configuration(&self, dimensions: usize, strategy: IndexStrategy) -> IndexConfiguration {
        IndexConfiguration {
            active_dimensions: dimensions,
            index_strategy: strategy,
        }
    }

    /// Width currently configured, from column metadata or a stored record
    pub async fn current_dimensions(&self, backend: &dyn VectorBackend) -> Result<Option<usize>> {
        match backend.column_dimensions().await? {
            Some(width) => Ok(Some(width)),
            None => backend.sample_record_dimensions().await,
        }
    }

    /// Bring the column to `needed` dimensions.
    ///
    /// Returns the new configuration when anything changed, `None` when the
    /// column already had the right width. Callers must hold exclusive write
    /// access for the duration.
    pub async fn reconcile_dimensions(
        &self,
        backend: &dyn VectorBackend,
        needed: usize,
    ) -> Result<Option<IndexConfiguration>> {
        let current = self.current_dimensions(backend).await?;
        if current == Some(needed) {
            return Ok(None);
        }

        match current {
            None => {
                info!(dimensions = needed, "Configuring vector column for first use");
                backend.set_column_dimensions(needed).await?;
                Ok(Some(self.ensure_index(backend, needed).await))
            }
            Some(previous) => {
                info!(
                    from = previous,
                    to = needed,
                    "Embedding dimensionality changed, migrating vector column"
                );
                // Altering the column type rebuilds dependent indexes at the new
                // width, which fails past the index ceiling
                if let Err(e) = backend.drop_index(&self.index_name).await {
                    debug!(index = %self.index_name, error = %e, "Ignoring failure to drop index before migration");
                }
                let removed = backend.delete_mismatched_dimensions(needed).await?;
                if removed > 0 {
                    warn!(
                        removed,
                        dimensions = needed,
                        "Deleted embeddings with incompatible dimensions; affected tools will be re-indexed on next sync"
                    );
                }
                backend.set_column_dimensions(needed).await?;
                Ok(Some(self.ensure_index(backend, needed).await))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::backend::{NewEmbedding, ToolEmbeddingRecord, TOOL_ENTITY_KIND};
    use crate::storage::memory::{MemoryBackend, MemoryCapabilities};
    use chrono::Utc;

    fn raw_record(key: &str, dimensions: usize) -> ToolEmbeddingRecord {
        ToolEmbeddingRecord {
            id: key.to_string(),
            entity_kind: TOOL_ENTITY_KIND.to_string(),
            entity_key: key.to_string(),
            text_content: key.to_string(),
            embedding: vec![0.5; dimensions],
            dimensions,
            model: "test".to_string(),
            metadata: serde_json::json!({}),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_strategy_by_dimensions() {
        let backend = MemoryBackend::default();
        let manager = VectorIndexManager::default();

        for (dimensions, expected) in [
            (100, IndexStrategy::GraphCosine),
            (1536, IndexStrategy::GraphCosine),
            (2000, IndexStrategy::GraphCosine),
            (2001, IndexStrategy::GraphCosineHalfPrecision),
            (3072, IndexStrategy::GraphCosineHalfPrecision),
            (4000, IndexStrategy::GraphCosineHalfPrecision),
            (4001, IndexStrategy::None),
        ] {
            let config = manager.ensure_index(&backend, dimensions).await;
            assert_eq!(config.index_strategy, expected, "dimensions {}", dimensions);
            assert_eq!(config.active_dimensions, dimensions);
        }
        // The oversized case built nothing
        assert!(backend.index(VECTOR_INDEX_NAME).await.is_none());
    }

    #[tokio::test]
    async fn test_ensure_index_replaces_existing() {
        let backend = MemoryBackend::default();
        let manager = VectorIndexManager::default();
        manager.ensure_index(&backend, 1536).await;
        let config = manager.ensure_index(&backend, 3072).await;
        assert_eq!(config.index_strategy, IndexStrategy::GraphCosineHalfPrecision);
        let index = backend.index(VECTOR_INDEX_NAME).await.unwrap();
        assert_eq!(index.dimensions, 3072);
    }

    #[tokio::test]
    async fn test_falls_back_to_flat_index() {
        let backend = MemoryBackend::new(MemoryCapabilities {
            graph_index: false,
            ..MemoryCapabilities::default()
        });
        let config = VectorIndexManager::default().ensure_index(&backend, 768).await;
        assert_eq!(config.index_strategy, IndexStrategy::FlatCosine);
    }

    #[tokio::test]
    async fn test_degrades_to_no_index() {
        let backend = MemoryBackend::new(MemoryCapabilities {
            graph_index: false,
            flat_index: false,
            half_precision: false,
        });
        let manager = VectorIndexManager::default();
        assert_eq!(manager.ensure_index(&backend, 768).await.index_strategy, IndexStrategy::None);

        let backend = MemoryBackend::new(MemoryCapabilities {
            half_precision: false,
            ..MemoryCapabilities::default()
        });
        assert_eq!(manager.ensure_index(&backend, 3072).await.index_strategy, IndexStrategy::None);
    }

    #[tokio::test]
    async fn test_first_time_setup_sets_width() {
        let backend = MemoryBackend::default();
        let manager = VectorIndexManager::default();
        let config = manager.reconcile_dimensions(&backend, 1536).await.unwrap().unwrap();
        assert_eq!(config.active_dimensions, 1536);
        assert_eq!(backend.column_dimensions().await.unwrap(), Some(1536));

        assert!(manager.reconcile_dimensions(&backend, 1536).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_migration_removes_mismatched_records() {
        let backend = MemoryBackend::default();
        backend.insert_raw(raw_record("a:one", 1536)).await;
        backend.insert_raw(raw_record("a:two", 1536)).await;
        backend.insert_raw(raw_record("b:three", 3072)).await;
        backend.declare_column(Some(1536)).await;

        let manager = VectorIndexManager::default();
        let config = manager.reconcile_dimensions(&backend, 3072).await.unwrap().unwrap();

        assert_eq!(config.index_strategy, IndexStrategy::GraphCosineHalfPrecision);
        assert_eq!(backend.column_dimensions().await.unwrap(), Some(3072));
        assert_eq!(backend.count().await.unwrap(), 1);
        assert!(backend.record(TOOL_ENTITY_KIND, "b:three").await.is_some());

        let write = NewEmbedding {
            entity_kind: TOOL_ENTITY_KIND.to_string(),
            entity_key: "c:four".to_string(),
            text_content: "four".to_string(),
            embedding: vec![0.1; 3072],
            model: "text-embedding-3-large".to_string(),
            metadata: serde_json::json!({}),
        };
        backend.upsert(&write).await.unwrap();
    }

    #[tokio::test]
    async fn test_migration_past_standard_ceiling_replaces_graph_index() {
        let backend = MemoryBackend::default();
        let manager = VectorIndexManager::default();
        manager.reconcile_dimensions(&backend, 1536).await.unwrap();
        assert_eq!(
            backend.index(VECTOR_INDEX_NAME).await.unwrap().strategy,
            IndexStrategy::GraphCosine
        );
        backend.insert_raw(raw_record("a:one", 1536)).await;

        let config = manager.reconcile_dimensions(&backend, 3072).await.unwrap().unwrap();
        assert_eq!(config.active_dimensions, 3072);
        assert_eq!(config.index_strategy, IndexStrategy::GraphCosineHalfPrecision);
        assert_eq!(backend.column_dimensions().await.unwrap(), Some(3072));
        assert_eq!(backend.count().await.unwrap(), 0);
        let index = backend.index(VECTOR_INDEX_NAME).await.unwrap();
        assert_eq!(index.dimensions, 3072);
    }

    #[tokio::test]
    async fn test_adopt_keeps_existing_index() {
        let backend = MemoryBackend::default();
        let manager = VectorIndexManager::default();
        manager.reconcile_dimensions(&backend, 768).await.unwrap();
        let builds = backend.index_builds();

        let config = manager.adopt_or_build(&backend, 768).await;
        assert_eq!(config.index_strategy, IndexStrategy::GraphCosine);
        assert_eq!(backend.index_builds(), builds);

        backend.drop_index(VECTOR_INDEX_NAME).await.unwrap();
        let config = manager.adopt_or_build(&backend, 768).await;
        assert_eq!(config.index_strategy, IndexStrategy::GraphCosine);
        assert_eq!(backend.index_builds(), builds + 1);
    }

    #[tokio::test]
    async fn test_width_read_from_sample_record() {
        let backend = MemoryBackend::default();
        backend.insert_raw(raw_record("a:one", 100)).await;
        let manager = VectorIndexManager::default();
        assert_eq!(manager.current_dimensions(&backend).await.unwrap(), Some(100));
    }
}
