//! MCP server over line-delimited JSON-RPC
//!
//! Exposes only the discovery meta-tools. Backend tools are reached through
//! `call_tool`, never listed directly.

use crate::discovery::DiscoveryEngine;
use crate::error::{HubError, Result};
use crate::mcp::errors::{McpError, McpErrorCode};
use crate::mcp::types::{McpRequest, ToolCall};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, info, warn};

pub const PROTOCOL_VERSION: &str = "2024-11-05";

pub struct McpServer {
    engine: Arc<DiscoveryEngine>,
    /// Endpoint scope such as `$smart/<group>`
    scope: Option<String>,
}

impl McpServer {
    pub fn new(engine: Arc<DiscoveryEngine>) -> Self {
        Self { engine, scope: None }
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    fn capabilities(&self) -> Value {
        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {
                "tools": { "listChanged": false }
            },
            "serverInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION")
            },
            "instructions": "Search for tools with search_tools, then call them with call_tool"
        })
    }

    /// Handle one JSON-RPC request; `None` means no response is sent
    pub async fn handle_mcp_request(&self, request: McpRequest) -> Result<Option<String>> {
        debug!("Handling MCP method: {}", request.method);
        let scope = self.scope.as_deref();

        let outcome: std::result::Result<Value, McpError> = match request.method.as_str() {
            "initialize" => Ok(self.capabilities()),
            "initialized" | "notifications/initialized" => return Ok(None),
            "ping" => Ok(json!({})),
            "tools/list" => {
                let tools = self.engine.list_discovery_tools(scope).await;
                Ok(json!({ "tools": tools }))
            }
            "tools/call" => {
                let params = request.params.clone().unwrap_or(json!({}));
                match serde_json::from_value::<ToolCall>(params) {
                    Ok(call) => match self.engine.call_meta_tool(&call.name, &call.arguments, scope).await {
                        Ok(result) => Ok(serde_json::to_value(result)?),
                        Err(HubError::NotFound { .. }) => Err(McpError::tool_not_found(&call.name)),
                        Err(e) => Err(McpError::from(&e)),
                    },
                    Err(e) => Err(McpError::new(
                        McpErrorCode::InvalidParams,
                        format!("Invalid tool call parameters: {}", e),
                    )),
                }
            }
            method => Err(McpError::method_not_found(method)),
        };

        // Notifications never get a response
        let Some(id) = request.id else {
            if let Err(e) = outcome {
                debug!(method = %request.method, error = %e.message, "Dropping error for notification");
            }
            return Ok(None);
        };

        let response = match outcome {
            Ok(result) => json!({ "jsonrpc": "2.0", "id": id, "result": result }),
            Err(err) => json!({ "jsonrpc": "2.0", "id": id, "error": err }),
        };
        Ok(Some(response.to_string()))
    }

    /// Parse and handle one line of input
    pub async fn handle_message(&self, message: &str) -> Option<String> {
        let request: McpRequest = match serde_json::from_str(message) {
            Ok(request) => request,
            Err(e) => {
                return Some(error_response(None, McpErrorCode::ParseError, &format!("Invalid JSON: {}", e)));
            }
        };
        match self.handle_mcp_request(request).await {
            Ok(response) => response,
            Err(e) => {
                error!("Error handling message: {}", e);
                Some(error_response(None, McpErrorCode::InternalError, &format!("Internal error: {}", e)))
            }
        }
    }

    /// Serve requests until the reader hits EOF
    pub async fn serve<R, W>(&self, mut reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        info!("MCP stdio mode ready, waiting for JSON-RPC messages");
        let mut buffer = Vec::new();
        loop {
            buffer.clear();
            if reader.read_until(b'\n', &mut buffer).await? == 0 {
                info!("stdin closed, shutting down stdio mode");
                break;
            }
            let response = match std::str::from_utf8(&buffer) {
                Ok(line) if line.trim().is_empty() => continue,
                Ok(line) => self.handle_message(line.trim()).await,
                Err(e) => {
                    warn!("Discarding message that is not valid UTF-8: {}", e);
                    Some(error_response(None, McpErrorCode::ParseError, &format!("Invalid UTF-8: {}", e)))
                }
            };

            if let Some(response) = response {
                if let Err(e) = write_line(&mut writer, &response).await {
                    warn!("Failed to write response, client likely disconnected: {}", e);
                    break;
                }
            }
        }
        Ok(())
    }
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

fn error_response(id: Option<&Value>, code: McpErrorCode, message: &str) -> String {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": McpError::new(code, message)
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DiscoveryConfig, EmbeddingConfig, StorageConfig};
    use crate::discovery::{BackendInfo, BackendStatus, CatalogSync, CatalogTool, StaticCatalog};
    use crate::embedding::{Embedder, EmbeddingService};
    use crate::storage::{MemoryBackend, MemoryConnector, StorageManager, ToolEmbeddingStore};
    use tokio::io::BufReader;

    async fn server() -> McpServer {
        let storage = StorageManager::new(
            Arc::new(MemoryConnector::new(Arc::new(MemoryBackend::default()))),
            StorageConfig {
                health_check_enabled: false,
                ..StorageConfig::default()
            },
        );
        let store = Arc::new(ToolEmbeddingStore::new(storage));
        let embedder: Arc<dyn Embedder> = Arc::new(
            EmbeddingService::new(EmbeddingConfig {
                api_key: None,
                ..EmbeddingConfig::default()
            })
            .unwrap(),
        );
        let catalog = Arc::new(StaticCatalog::default().with_backend(BackendInfo {
            name: "fs".to_string(),
            status: BackendStatus::Connected,
            enabled: true,
            tools: vec![CatalogTool::new("read_file", "Read a file from disk", json!({"type": "object"}))],
        }));
        CatalogSync::new(store.clone(), embedder.clone())
            .sync_catalog(catalog.as_ref())
            .await;
        let engine = DiscoveryEngine::new(store, embedder, catalog.clone(), catalog, DiscoveryConfig::default());
        McpServer::new(Arc::new(engine))
    }

    async fn exchange(server: &McpServer, input: &str) -> Vec<Value> {
        exchange_bytes(server, input.as_bytes()).await
    }

    async fn exchange_bytes(server: &McpServer, input: &[u8]) -> Vec<Value> {
        let mut output = Vec::new();
        server
            .serve(BufReader::new(input), &mut output)
            .await
            .unwrap();
        String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_initialize_and_list() {
        let server = server().await;
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#,
            "\n",
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            "\n\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#,
            "\n"
        );
        let responses = exchange(&server, input).await;
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0]["result"]["protocolVersion"], PROTOCOL_VERSION);
        let tools = responses[1]["result"]["tools"].as_array().unwrap();
        let names: Vec<_> = tools.iter().map(|t| t["name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["search_tools", "call_tool"]);
    }

    #[tokio::test]
    async fn test_errors() {
        let server = server().await;
        let input = concat!(
            "not json\n",
            r#"{"jsonrpc":"2.0","id":3,"method":"resources/list"}"#,
            "\n",
            r#"{"jsonrpc":"2.0","id":4,"method":"tools/call","params":{"name":"read_file","arguments":{}}}"#,
            "\n"
        );
        let responses = exchange(&server, input).await;
        assert_eq!(responses[0]["error"]["code"], -32700);
        assert_eq!(responses[1]["error"]["code"], -32601);
        assert_eq!(responses[1]["id"], 3);
        assert_eq!(responses[2]["error"]["code"], McpErrorCode::ToolNotFound.code());
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_does_not_stop_serving() {
        let server = server().await;
        let mut input = Vec::new();
        input.extend_from_slice(br#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#);
        input.extend_from_slice(b"\n\xff\xfe\n");
        input.extend_from_slice(br#"{"jsonrpc":"2.0","id":3,"method":"ping"}"#);
        input.push(b'\n');

        let responses = exchange_bytes(&server, &input).await;
        assert_eq!(responses.len(), 3);
        assert_eq!(responses[0]["id"], 1);
        assert_eq!(responses[1]["error"]["code"], -32700);
        assert!(responses[1]["id"].is_null());
        assert_eq!(responses[2]["id"], 3);
        assert!(responses[2].get("error").is_none());
    }

    #[tokio::test]
    async fn test_search_through_tools_call() {
        let server = server().await;
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":5,"method":"tools/call","params":{"name":"search_tools","arguments":{"query":"read file"}}}"#,
            "\n"
        );
        let responses = exchange(&server, input).await;
        let result = &responses[0]["result"];
        assert_eq!(result["isError"], false);
        let payload: Value = serde_json::from_str(result["content"][0]["text"].as_str().unwrap()).unwrap();
        assert_eq!(payload["metadata"]["query"], "read file");
        assert!(payload["tools"].is_array());
    }
}
