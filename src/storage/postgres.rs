//! PostgreSQL + pgvector backend
//!
//! Vectors are bound as their text form (`[0.1,0.2,...]`) and cast to
//! `vector`/`halfvec` server-side, so no client-side pgvector type is needed.

use crate::config::StorageConfig;
use crate::error::{HubError, Result};
use crate::storage::backend::{
    Connector, IndexSpec, IndexStrategy, NewEmbedding, ScoredRecord, SimilarityQuery,
    ToolEmbeddingRecord, VectorBackend, METADATA_BACKEND_KEY, NO_THRESHOLD,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime, Timeouts};
use std::sync::Arc;
use std::time::Duration;
use tokio_postgres::types::ToSql;
use tokio_postgres::{NoTls, Row};
use tracing::{debug, info};

const TABLE: &str = "vector_embeddings";

const SCHEMA_SQL: &str = r#"
CREATE EXTENSION IF NOT EXISTS vector;
CREATE TABLE IF NOT EXISTS vector_embeddings (
    id UUID PRIMARY KEY,
    entity_type VARCHAR(50) NOT NULL,
    entity_id VARCHAR(255) NOT NULL,
    text_content TEXT NOT NULL,
    embedding vector NOT NULL,
    dimensions INTEGER NOT NULL,
    model VARCHAR(100) NOT NULL,
    metadata JSONB NOT NULL DEFAULT '{}'::jsonb,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    UNIQUE (entity_type, entity_id)
);
"#;

/// Opens pooled connections to PostgreSQL
pub struct PostgresConnector {
    config: StorageConfig,
}

impl PostgresConnector {
    pub fn new(config: StorageConfig) -> Self {
        Self { config }
    }

    fn build_pool(&self) -> Result<Pool> {
        let url = self
            .config
            .database_url
            .clone()
            .ok_or_else(|| HubError::config("DATABASE_URL is not configured"))?;
        let connect_timeout = Duration::from_millis(self.config.connection_timeout_ms);

        let mut cfg = deadpool_postgres::Config::new();
        cfg.url = Some(url);
        cfg.connect_timeout = Some(connect_timeout);
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        let mut pool_cfg = PoolConfig::new(self.config.pool_size);
        pool_cfg.timeouts = Timeouts {
            wait: Some(connect_timeout),
            create: Some(connect_timeout),
            recycle: Some(connect_timeout),
        };
        cfg.pool = Some(pool_cfg);

        cfg.create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| HubError::config(format!("Failed to create connection pool: {}", e)))
    }
}

#[async_trait]
impl Connector for PostgresConnector {
    async fn connect(&self) -> Result<Arc<dyn VectorBackend>> {
        let pool = self.build_pool()?;
        let backend = PostgresBackend {
            pool,
            idle_timeout: Duration::from_millis(self.config.idle_timeout_ms),
        };
        backend.ensure_schema().await?;
        info!(pool_size = self.config.pool_size, "Connected to PostgreSQL vector store");
        Ok(Arc::new(backend))
    }
}

/// pgvector-backed [`VectorBackend`]
pub struct PostgresBackend {
    pool: Pool,
    idle_timeout: Duration,
}

impl PostgresBackend {
    async fn ensure_schema(&self) -> Result<()> {
        let client = self.pool.get().await?;
        client.batch_execute(SCHEMA_SQL).await?;
        debug!("Vector schema ready");
        Ok(())
    }

    async fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> Result<u64> {
        let client = self.pool.get().await?;
        Ok(client.execute(sql, params).await?)
    }
}

/// pgvector text literal for a vector
pub fn vector_literal(vector: &[f32]) -> String {
    let parts: Vec<String> = vector.iter().map(|v| v.to_string()).collect();
    format!("[{}]", parts.join(","))
}

/// Parse pgvector's text output back into floats
pub fn parse_vector_literal(text: &str) -> Result<Vec<f32>> {
    let inner = text
        .trim()
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .ok_or_else(|| HubError::storage(format!("Malformed vector literal: {}", text)))?;
    if inner.trim().is_empty() {
        return Ok(Vec::new());
    }
    inner
        .split(',')
        .map(|p| {
            p.trim()
                .parse::<f32>()
                .map_err(|e| HubError::storage(format!("Malformed vector component '{}': {}", p, e)))
        })
        .collect()
}

/// DDL for an index spec; `None` for the unindexed strategy
pub fn index_ddl(spec: &IndexSpec) -> Option<String> {
    let body = match spec.strategy {
        IndexStrategy::None => return None,
        IndexStrategy::GraphCosine => "USING hnsw (embedding vector_cosine_ops)".to_string(),
        IndexStrategy::FlatCosine => {
            "USING ivfflat (embedding vector_cosine_ops) WITH (lists = 100)".to_string()
        }
        IndexStrategy::GraphCosineHalfPrecision => format!(
            "USING hnsw ((embedding::halfvec({})) halfvec_cosine_ops)",
            spec.dimensions
        ),
    };
    Some(format!("CREATE INDEX {} ON {} {}", spec.name, TABLE, body))
}

/// Strategy an index definition from `pg_indexes` was built with
pub fn strategy_from_indexdef(definition: &str) -> IndexStrategy {
    let definition = definition.to_ascii_lowercase();
    if definition.contains("halfvec") {
        IndexStrategy::GraphCosineHalfPrecision
    } else if definition.contains("using hnsw") {
        IndexStrategy::GraphCosine
    } else if definition.contains("using ivfflat") {
        IndexStrategy::FlatCosine
    } else {
        IndexStrategy::None
    }
}

/// Distance expression matching the active index, with the query vector as `$1`
fn distance_expr(strategy: IndexStrategy, dimensions: usize) -> String {
    match strategy {
        IndexStrategy::GraphCosineHalfPrecision => format!(
            "(embedding::halfvec({d}) <=> $1::text::halfvec({d}))",
            d = dimensions
        ),
        _ => "(embedding <=> $1::text::vector)".to_string(),
    }
}

fn validate_identifier(name: &str) -> Result<()> {
    if !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(HubError::validation(format!("Invalid index name: {}", name)))
    }
}

fn escape_like(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

fn row_to_record(row: &Row) -> Result<ToolEmbeddingRecord> {
    let id: uuid::Uuid = row.try_get("id")?;
    let embedding_text: String = row.try_get("embedding_text")?;
    let dimensions: i32 = row.try_get("dimensions")?;
    let created_at: DateTime<Utc> = row.try_get("created_at")?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at")?;
    Ok(ToolEmbeddingRecord {
        id: id.to_string(),
        entity_kind: row.try_get("entity_type")?,
        entity_key: row.try_get("entity_id")?,
        text_content: row.try_get("text_content")?,
        embedding: parse_vector_literal(&embedding_text)?,
        dimensions: dimensions.max(0) as usize,
        model: row.try_get("model")?,
        metadata: row.try_get("metadata")?,
        created_at,
        updated_at,
    })
}

#[async_trait]
impl VectorBackend for PostgresBackend {
    fn name(&self) -> &str {
        "postgres"
    }

    async fn ping(&self) -> Result<()> {
        let client = self.pool.get().await?;
        client.simple_query("SELECT 1").await?;
        // Prune connections idle past the configured timeout
        let idle_timeout = self.idle_timeout;
        let pruned = self
            .pool
            .retain(|_, metrics| metrics.last_used() < idle_timeout);
        if !pruned.removed.is_empty() {
            debug!(removed = pruned.removed.len(), "Pruned idle connections");
        }
        Ok(())
    }

    async fn column_dimensions(&self) -> Result<Option<usize>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT atttypmod FROM pg_attribute \
                 WHERE attrelid = 'vector_embeddings'::regclass AND attname = 'embedding'",
                &[],
            )
            .await?;
        Ok(row
            .map(|r| r.get::<_, i32>(0))
            .filter(|typmod| *typmod > 0)
            .map(|typmod| typmod as usize))
    }

    async fn sample_record_dimensions(&self) -> Result<Option<usize>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt("SELECT dimensions FROM vector_embeddings LIMIT 1", &[])
            .await?;
        Ok(row.map(|r| r.get::<_, i32>(0).max(0) as usize))
    }

    async fn delete_mismatched_dimensions(&self, keep: usize) -> Result<u64> {
        let keep = keep as i32;
        self.execute("DELETE FROM vector_embeddings WHERE dimensions <> $1", &[&keep])
            .await
    }

    async fn set_column_dimensions(&self, dimensions: usize) -> Result<()> {
        let sql = format!(
            "ALTER TABLE {} ALTER COLUMN embedding TYPE vector({})",
            TABLE, dimensions
        );
        let client = self.pool.get().await?;
        client.batch_execute(&sql).await?;
        Ok(())
    }

    async fn drop_index(&self, name: &str) -> Result<()> {
        validate_identifier(name)?;
        let client = self.pool.get().await?;
        match client.batch_execute(&format!("DROP INDEX IF EXISTS {}", name)).await {
            Ok(()) => Ok(()),
            Err(e) if e.code() == Some(&tokio_postgres::error::SqlState::UNDEFINED_OBJECT) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_index(&self, spec: &IndexSpec) -> Result<()> {
        validate_identifier(&spec.name)?;
        let Some(sql) = index_ddl(spec) else {
            return Ok(());
        };
        debug!(sql = %sql, "Creating vector index");
        let client = self.pool.get().await?;
        client.batch_execute(&sql).await?;
        Ok(())
    }

    async fn index_strategy(&self, name: &str) -> Result<Option<IndexStrategy>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT indexdef FROM pg_indexes WHERE tablename = 'vector_embeddings' AND indexname = $1",
                &[&name],
            )
            .await?;
        Ok(row.map(|r| strategy_from_indexdef(&r.get::<_, String>(0))))
    }

    async fn upsert(&self, record: &NewEmbedding) -> Result<ToolEmbeddingRecord> {
        let id = uuid::Uuid::new_v4();
        let literal = vector_literal(&record.embedding);
        let dimensions = record.dimensions() as i32;
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                "INSERT INTO vector_embeddings \
                   (id, entity_type, entity_id, text_content, embedding, dimensions, model, metadata, created_at, updated_at) \
                 VALUES ($1, $2, $3, $4, $5::text::vector, $6, $7, $8, now(), now()) \
                 ON CONFLICT (entity_type, entity_id) DO UPDATE SET \
                   text_content = EXCLUDED.text_content, \
                   embedding = EXCLUDED.embedding, \
                   dimensions = EXCLUDED.dimensions, \
                   model = EXCLUDED.model, \
                   metadata = EXCLUDED.metadata, \
                   updated_at = now() \
                 RETURNING id, created_at, updated_at",
                &[
                    &id,
                    &record.entity_kind,
                    &record.entity_key,
                    &record.text_content,
                    &literal,
                    &dimensions,
                    &record.model,
                    &record.metadata,
                ],
            )
            .await?;

        let stored_id: uuid::Uuid = row.try_get("id")?;
        Ok(ToolEmbeddingRecord {
            id: stored_id.to_string(),
            entity_kind: record.entity_kind.clone(),
            entity_key: record.entity_key.clone(),
            text_content: record.text_content.clone(),
            embedding: record.embedding.clone(),
            dimensions: record.dimensions(),
            model: record.model.clone(),
            metadata: record.metadata.clone(),
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    async fn similarity_search(&self, query: &SimilarityQuery) -> Result<Vec<ScoredRecord>> {
        let dims = query.vector.len();
        let distance = distance_expr(query.strategy, dims);
        let literal = vector_literal(&query.vector);
        let dims_param = dims as i32;
        let limit = query.limit as i64;

        let mut params: Vec<&(dyn ToSql + Sync)> = vec![&literal, &query.entity_kinds, &dims_param];
        let mut sql = format!(
            "SELECT id, entity_type, entity_id, text_content, embedding::text AS embedding_text, \
                    dimensions, model, metadata, created_at, updated_at, \
                    1 - {distance} AS similarity \
             FROM {TABLE} \
             WHERE entity_type = ANY($2) AND dimensions = $3"
        );
        if let Some(backends) = &query.backends {
            params.push(backends);
            sql.push_str(&format!(
                " AND metadata->>'{}' = ANY(${})",
                METADATA_BACKEND_KEY,
                params.len()
            ));
        }
        if query.min_similarity > NO_THRESHOLD {
            params.push(&query.min_similarity);
            sql.push_str(&format!(" AND 1 - {} >= ${}", distance, params.len()));
        }
        params.push(&limit);
        sql.push_str(&format!(" ORDER BY {} ASC LIMIT ${}", distance, params.len()));

        let client = self.pool.get().await?;
        let rows = client.query(&sql, &params).await?;
        rows.iter()
            .map(|row| {
                Ok(ScoredRecord {
                    similarity: row.try_get("similarity")?,
                    record: row_to_record(row)?,
                })
            })
            .collect()
    }

    async fn delete_by_key_prefix(&self, entity_kind: &str, prefix: &str) -> Result<u64> {
        let pattern = escape_like(prefix);
        self.execute(
            "DELETE FROM vector_embeddings WHERE entity_type = $1 AND entity_id LIKE $2",
            &[&entity_kind, &pattern],
        )
        .await
    }

    async fn delete_by_entity(&self, entity_kind: &str, entity_key: &str) -> Result<u64> {
        self.execute(
            "DELETE FROM vector_embeddings WHERE entity_type = $1 AND entity_id = $2",
            &[&entity_kind, &entity_key],
        )
        .await
    }

    async fn count(&self) -> Result<u64> {
        let client = self.pool.get().await?;
        let row = client.query_one("SELECT COUNT(*) FROM vector_embeddings", &[]).await?;
        Ok(row.get::<_, i64>(0).max(0) as u64)
    }

    async fn close(&self) {
        self.pool.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_literal_round_trip() {
        let literal = vector_literal(&[0.5, -1.0, 2.25]);
        assert_eq!(literal, "[0.5,-1,2.25]");
        assert_eq!(parse_vector_literal(&literal).unwrap(), vec![0.5, -1.0, 2.25]);
        assert!(parse_vector_literal("0.5,1").is_err());
    }

    #[test]
    fn test_index_ddl_per_strategy() {
        let spec = |strategy| IndexSpec {
            name: "idx_test".to_string(),
            strategy,
            dimensions: 3072,
        };
        assert!(index_ddl(&spec(IndexStrategy::None)).is_none());
        assert!(index_ddl(&spec(IndexStrategy::GraphCosine))
            .unwrap()
            .contains("USING hnsw (embedding vector_cosine_ops)"));
        assert!(index_ddl(&spec(IndexStrategy::FlatCosine))
            .unwrap()
            .contains("ivfflat"));
        assert!(index_ddl(&spec(IndexStrategy::GraphCosineHalfPrecision))
            .unwrap()
            .contains("halfvec(3072)) halfvec_cosine_ops"));
    }

    #[test]
    fn test_strategy_read_back_from_indexdef() {
        for strategy in [
            IndexStrategy::GraphCosine,
            IndexStrategy::FlatCosine,
            IndexStrategy::GraphCosineHalfPrecision,
        ] {
            let ddl = index_ddl(&IndexSpec {
                name: "idx_test".to_string(),
                strategy,
                dimensions: 3072,
            })
            .unwrap();
            assert_eq!(strategy_from_indexdef(&ddl), strategy);
        }
        assert_eq!(
            strategy_from_indexdef("CREATE INDEX x ON public.vector_embeddings USING btree (entity_id)"),
            IndexStrategy::None
        );
    }

    #[test]
    fn test_like_prefix_is_escaped() {
        assert_eq!(escape_like("my_server:"), "my\\_server:%");
        assert_eq!(escape_like("100%"), "100\\%%");
    }

    #[test]
    fn test_identifier_validation() {
        assert!(validate_identifier("idx_vector_embeddings_embedding").is_ok());
        assert!(validate_identifier("idx; DROP TABLE x").is_err());
    }
}
