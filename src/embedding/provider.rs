//! Embedding provider
//!
//! Calls an OpenAI-compatible `/embeddings` endpoint when a credential is
//! configured and falls back to [`fallback_embedding`] otherwise.

use crate::config::EmbeddingConfig;
use crate::embedding::fallback::{fallback_embedding, FALLBACK_DIMENSIONS};
use crate::error::{HubError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Model name recorded for vectors produced by the offline heuristic
pub const FALLBACK_MODEL: &str = "fallback-keyword-hash";

/// Output size of a provider model, matched on name substrings
pub fn dimensions_for_model(model: &str) -> usize {
    let model = model.to_lowercase();
    if model.contains("bge-m3") {
        1024
    } else if model.contains("large") {
        3072
    } else {
        // small, ada-002 and anything unknown
        1536
    }
}

/// Turns text into vectors
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Model name stored alongside produced vectors
    fn model(&self) -> &str;

    /// Expected length of produced vectors
    fn dimensions(&self) -> usize;
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Embedding provider backed by an OpenAI-compatible API
pub struct EmbeddingService {
    config: EmbeddingConfig,
    client: Client,
}

impl EmbeddingService {
    pub fn new(config: EmbeddingConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| HubError::embedding(format!("Failed to build HTTP client: {}", e)))?;
        if config.api_key.is_none() {
            warn!(
                "No embedding API key configured, using the deterministic fallback embedding ({} dimensions)",
                FALLBACK_DIMENSIONS
            );
        }
        Ok(Self { config, client })
    }

    /// Whether vectors come from the external provider
    pub fn uses_provider(&self) -> bool {
        self.config.api_key.is_some()
    }

    fn truncate<'a>(&self, text: &'a str) -> &'a str {
        match text.char_indices().nth(self.config.max_input_chars) {
            Some((end, _)) => &text[..end],
            None => text,
        }
    }

    async fn provider_embedding(&self, api_key: &str, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/embeddings", self.config.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&serde_json::json!({
                "input": self.truncate(text),
                "model": self.config.model,
                "encoding_format": "float",
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(HubError::embedding(format!(
                "Embedding API returned {}: {}",
                status, body
            )));
        }

        let parsed: EmbeddingResponse = response.json().await?;
        let embedding = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| HubError::embedding("Embedding API response contained no vectors"))?;
        if embedding.is_empty() {
            return Err(HubError::embedding("Embedding API returned an empty vector"));
        }
        Ok(embedding)
    }
}

#[async_trait]
impl Embedder for EmbeddingService {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let embedding = match &self.config.api_key {
            Some(key) => self.provider_embedding(key, text).await?,
            None => fallback_embedding(text),
        };
        debug!(dimensions = embedding.len(), model = self.model(), "Generated embedding");
        Ok(embedding)
    }

    fn model(&self) -> &str {
        if self.uses_provider() {
            &self.config.model
        } else {
            FALLBACK_MODEL
        }
    }

    fn dimensions(&self) -> usize {
        if self.uses_provider() {
            dimensions_for_model(&self.config.model)
        } else {
            FALLBACK_DIMENSIONS
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(base_url: &str, api_key: Option<&str>) -> EmbeddingConfig {
        EmbeddingConfig {
            api_key: api_key.map(str::to_string),
            base_url: base_url.to_string(),
            max_input_chars: 16,
            ..EmbeddingConfig::default()
        }
    }

    #[test]
    fn test_dimensions_for_model() {
        assert_eq!(dimensions_for_model("text-embedding-3-large"), 3072);
        assert_eq!(dimensions_for_model("text-embedding-3-small"), 1536);
        assert_eq!(dimensions_for_model("text-embedding-ada-002"), 1536);
        assert_eq!(dimensions_for_model("BAAI/bge-m3"), 1024);
        assert_eq!(dimensions_for_model("something-else"), 1536);
    }

    #[tokio::test]
    async fn test_without_key_uses_fallback() {
        let service = EmbeddingService::new(config("http://127.0.0.1:9", None)).unwrap();
        let vector = service.embed("read file").await.unwrap();
        assert_eq!(vector, fallback_embedding("read file"));
        assert_eq!(service.model(), FALLBACK_MODEL);
        assert_eq!(service.dimensions(), FALLBACK_DIMENSIONS);
    }

    #[tokio::test]
    async fn test_provider_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .and(header("authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"embedding": [0.25, 0.5, 0.75], "index": 0}],
                "model": "text-embedding-3-small"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let service = EmbeddingService::new(config(&server.uri(), Some("test-key"))).unwrap();
        let vector = service
            .embed("a very long description that will be cut")
            .await
            .unwrap();
        assert_eq!(vector, vec![0.25, 0.5, 0.75]);
        assert_eq!(service.model(), "text-embedding-3-small");

        let requests = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["input"], "a very long desc");
        assert_eq!(body["model"], "text-embedding-3-small");
    }

    #[tokio::test]
    async fn test_provider_errors_propagate() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .mount(&server)
            .await;

        let service = EmbeddingService::new(config(&server.uri(), Some("test-key"))).unwrap();
        let err = service.embed("read file").await.unwrap_err();
        assert!(matches!(err, HubError::Embedding { .. }));
        assert!(err.to_string().contains("rate limited"));
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let service = EmbeddingService::new(config("http://localhost", None)).unwrap();
        let text = "ééééééééééééééééééééé";
        assert_eq!(service.truncate(text).chars().count(), 16);
        assert_eq!(service.truncate("short"), "short");
    }
}
