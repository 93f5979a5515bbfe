//! Catalog synchronisation
//!
//! Keeps the embedding store in step with backend tool lists. A backend's
//! tools are always replaced as a whole; an embedding failure skips only the
//! tool that caused it.

use crate::discovery::catalog::{BackendInfo, CatalogTool, ToolCatalog};
use crate::embedding::Embedder;
use crate::error::Result;
use crate::storage::{ToolEmbeddingStore, TOOL_ENTITY_KIND};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of syncing one backend
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSummary {
    pub backend: String,
    pub indexed: usize,
    pub skipped: usize,
    pub removed: u64,
}

/// Entity key of a tool record
pub fn entity_key(backend: &str, tool: &str) -> String {
    format!("{}:{}", backend, tool)
}

/// Searchable text: name, description and input property names
pub fn searchable_text(tool: &CatalogTool) -> String {
    let mut parts = vec![tool.name.clone()];
    if let Some(description) = tool.description.as_deref().filter(|d| !d.trim().is_empty()) {
        parts.push(description.to_string());
    }
    if let Some(properties) = tool.input_schema.get("properties").and_then(|p| p.as_object()) {
        parts.extend(properties.keys().cloned());
    }
    parts.join(" ")
}

pub struct CatalogSync {
    store: Arc<ToolEmbeddingStore>,
    embedder: Arc<dyn Embedder>,
}

impl CatalogSync {
    pub fn new(store: Arc<ToolEmbeddingStore>, embedder: Arc<dyn Embedder>) -> Self {
        Self { store, embedder }
    }

    /// Replace every stored record of `backend` with `tools`
    pub async fn sync_backend(&self, backend: &str, tools: &[CatalogTool]) -> Result<SyncSummary> {
        let removed = self
            .store
            .delete_by_key_prefix(TOOL_ENTITY_KIND, &format!("{}:", backend))
            .await?;
        let mut summary = SyncSummary {
            backend: backend.to_string(),
            removed,
            ..SyncSummary::default()
        };

        for tool in tools {
            let text = searchable_text(tool);
            let vector = match self.embedder.embed(&text).await {
                Ok(vector) => vector,
                Err(e) => {
                    warn!(backend, tool = %tool.name, error = %e, "Skipping tool, embedding failed");
                    summary.skipped += 1;
                    continue;
                }
            };

            let metadata = json!({
                "serverName": backend,
                "toolName": tool.name,
                "description": tool.description,
                "inputSchema": tool.input_schema,
            });
            self.store
                .upsert(
                    TOOL_ENTITY_KIND,
                    &entity_key(backend, &tool.name),
                    &text,
                    vector,
                    metadata,
                    self.embedder.model(),
                )
                .await?;
            summary.indexed += 1;
        }

        info!(
            backend,
            indexed = summary.indexed,
            skipped = summary.skipped,
            removed = summary.removed,
            "Synced backend tool embeddings"
        );
        Ok(summary)
    }

    /// Drop every record of a removed or disabled backend
    pub async fn remove_backend(&self, backend: &str) -> Result<u64> {
        let removed = self
            .store
            .delete_by_key_prefix(TOOL_ENTITY_KIND, &format!("{}:", backend))
            .await?;
        info!(backend, removed, "Removed backend tool embeddings");
        Ok(removed)
    }

    /// Sync available backends and clear the others
    pub async fn sync_catalog(&self, catalog: &dyn ToolCatalog) -> Vec<SyncSummary> {
        let mut summaries = Vec::new();
        for backend in catalog.list_backends().await {
            match self.sync_one(&backend).await {
                Ok(summary) => summaries.push(summary),
                Err(e) => warn!(backend = %backend.name, error = %e, "Backend sync failed"),
            }
        }
        summaries
    }

    async fn sync_one(&self, backend: &BackendInfo) -> Result<SyncSummary> {
        if backend.is_available() {
            self.sync_backend(&backend.name, &backend.tools).await
        } else {
            debug!(backend = %backend.name, status = ?backend.status, "Backend unavailable, clearing its embeddings");
            let removed = self.remove_backend(&backend.name).await?;
            Ok(SyncSummary {
                backend: backend.name.clone(),
                removed,
                ..SyncSummary::default()
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::embedding::fallback_embedding;
    use crate::error::HubError;
    use crate::storage::{MemoryBackend, MemoryConnector, StorageManager, VectorBackend};
    use async_trait::async_trait;

    /// Fails for any text mentioning "broken"
    struct FlakyEmbedder;

    #[async_trait]
    impl Embedder for FlakyEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            if text.contains("broken") {
                Err(HubError::embedding("provider rejected input"))
            } else {
                Ok(fallback_embedding(text))
            }
        }

        fn model(&self) -> &str {
            "flaky"
        }

        fn dimensions(&self) -> usize {
            100
        }
    }

    fn sync_with(backend: Arc<MemoryBackend>) -> CatalogSync {
        let config = StorageConfig {
            health_check_enabled: false,
            ..StorageConfig::default()
        };
        let manager = StorageManager::new(Arc::new(MemoryConnector::new(backend)), config);
        CatalogSync::new(Arc::new(ToolEmbeddingStore::new(manager)), Arc::new(FlakyEmbedder))
    }

    fn tool(name: &str, description: &str) -> CatalogTool {
        CatalogTool::new(
            name,
            description,
            json!({"type": "object", "properties": {"path": {}, "encoding": {}}}),
        )
    }

    #[test]
    fn test_searchable_text() {
        let text = searchable_text(&tool("read_file", "Read a file"));
        assert!(text.starts_with("read_file Read a file"));
        assert!(text.contains("path"));
        assert!(text.contains("encoding"));

        let bare = CatalogTool {
            name: "ping".to_string(),
            description: None,
            input_schema: json!({}),
        };
        assert_eq!(searchable_text(&bare), "ping");
    }

    #[tokio::test]
    async fn test_sync_replaces_backend_tools() {
        let backend = Arc::new(MemoryBackend::default());
        let sync = sync_with(backend.clone());

        let first = sync
            .sync_backend("fs", &[tool("read_file", "Read"), tool("write_file", "Write")])
            .await
            .unwrap();
        assert_eq!(first.indexed, 2);
        assert_eq!(first.removed, 0);

        let second = sync.sync_backend("fs", &[tool("read_file", "Read")]).await.unwrap();
        assert_eq!(second.removed, 2);
        assert_eq!(backend.count().await.unwrap(), 1);

        let record = backend.record(TOOL_ENTITY_KIND, "fs:read_file").await.unwrap();
        assert_eq!(record.metadata["serverName"], "fs");
        assert_eq!(record.metadata["toolName"], "read_file");
        assert_eq!(record.model, "flaky");
    }

    #[tokio::test]
    async fn test_embedding_failure_skips_only_that_tool() {
        let backend = Arc::new(MemoryBackend::default());
        let sync = sync_with(backend.clone());
        let summary = sync
            .sync_backend("fs", &[tool("read_file", "Read"), tool("bad", "broken tool")])
            .await
            .unwrap();
        assert_eq!(summary.indexed, 1);
        assert_eq!(summary.skipped, 1);
        assert!(backend.record(TOOL_ENTITY_KIND, "fs:bad").await.is_none());
    }

    #[tokio::test]
    async fn test_remove_backend_is_prefix_exact() {
        let backend = Arc::new(MemoryBackend::default());
        let sync = sync_with(backend.clone());
        sync.sync_backend("fs", &[tool("read_file", "Read")]).await.unwrap();
        sync.sync_backend("fs2", &[tool("read_file", "Read")]).await.unwrap();

        assert_eq!(sync.remove_backend("fs").await.unwrap(), 1);
        assert!(backend.record(TOOL_ENTITY_KIND, "fs2:read_file").await.is_some());
    }
}
