//! Discovery protocol engine
//!
//! Implements the `search_tools` / `describe_tool` / `call_tool` meta-tools.
//! Each call is independent: nothing forces callers to search before they
//! call, and no per-session state is kept here.

use crate::config::DiscoveryConfig;
use crate::discovery::catalog::{BackendInfo, ToolCatalog, ToolFilters, ToolInvoker, UnavailableInvoker};
use crate::discovery::threshold::{QueryShapeThreshold, ThresholdPolicy};
use crate::embedding::Embedder;
use crate::error::{HubError, Result};
use crate::mcp::types::{strip_schema_meta, Tool, ToolCall, ToolResult};
use crate::storage::{ScoredRecord, ToolEmbeddingStore, METADATA_BACKEND_KEY, TOOL_ENTITY_KIND};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub const SEARCH_TOOLS: &str = "search_tools";
pub const DESCRIBE_TOOL: &str = "describe_tool";
pub const CALL_TOOL: &str = "call_tool";

/// Prefix of group-scoped endpoints, as in `$smart/<group>`
pub const SCOPE_MARKER: &str = "$smart";

/// Backend set a request is allowed to see
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupScope {
    All,
    Group(String),
}

impl GroupScope {
    /// `$smart/<group>` scopes to a group; anything else sees every backend
    pub fn parse(scope: Option<&str>) -> Self {
        let group = scope
            .and_then(|s| s.strip_prefix(SCOPE_MARKER))
            .and_then(|rest| rest.strip_prefix('/'))
            .map(str::trim)
            .filter(|g| !g.is_empty());
        match group {
            Some(group) => GroupScope::Group(group.to_string()),
            None => GroupScope::All,
        }
    }

    pub fn group(&self) -> Option<&str> {
        match self {
            GroupScope::All => None,
            GroupScope::Group(name) => Some(name),
        }
    }
}

/// One search hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredTool {
    pub name: String,
    pub description: String,
    /// Omitted in progressive mode
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub input_schema: Option<Value>,
    pub server_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchMetadata {
    pub query: String,
    pub threshold: f64,
    pub total_results: usize,
    pub progressive_disclosure: bool,
    pub guideline: String,
    pub next_steps: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub tools: Vec<DiscoveredTool>,
    pub metadata: SearchMetadata,
}

/// Full definition returned by `describe_tool`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescription {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub server_name: String,
}

pub struct DiscoveryEngine {
    store: Arc<ToolEmbeddingStore>,
    embedder: Arc<dyn Embedder>,
    catalog: Arc<dyn ToolCatalog>,
    filters: Arc<dyn ToolFilters>,
    invoker: Arc<dyn ToolInvoker>,
    threshold: Arc<dyn ThresholdPolicy>,
    config: DiscoveryConfig,
}

impl DiscoveryEngine {
    pub fn new(
        store: Arc<ToolEmbeddingStore>,
        embedder: Arc<dyn Embedder>,
        catalog: Arc<dyn ToolCatalog>,
        filters: Arc<dyn ToolFilters>,
        config: DiscoveryConfig,
    ) -> Self {
        let threshold = Arc::new(QueryShapeThreshold::from_config(&config.thresholds));
        Self {
            store,
            embedder,
            catalog,
            filters,
            invoker: Arc::new(UnavailableInvoker),
            threshold,
            config,
        }
    }

    pub fn with_invoker(mut self, invoker: Arc<dyn ToolInvoker>) -> Self {
        self.invoker = invoker;
        self
    }

    pub fn with_threshold_policy(mut self, policy: Arc<dyn ThresholdPolicy>) -> Self {
        self.threshold = policy;
        self
    }

    pub fn progressive_disclosure(&self) -> bool {
        self.config.progressive_disclosure
    }

    /// Backend allow-list for a scope; `None` means every backend
    fn resolve_scope(&self, scope: &GroupScope) -> Option<Vec<String>> {
        let group = scope.group()?;
        match self.filters.group_members(group) {
            Some(members) => {
                if members.is_empty() {
                    info!(group, "Group has no member backends");
                }
                Some(members)
            }
            None => {
                warn!(group, "Group not found, scoped request sees no backends");
                Some(Vec::new())
            }
        }
    }

    fn is_visible(&self, scope: &GroupScope, backend: &str, tool: &str) -> bool {
        if !self.filters.is_tool_enabled(backend, tool) {
            return false;
        }
        match scope {
            GroupScope::All => true,
            GroupScope::Group(group) => self.filters.is_tool_visible_in_group(group, backend, tool),
        }
    }

    fn description_for(&self, backend: &str, tool: &str, own: Option<&str>) -> String {
        self.filters
            .custom_description(backend, tool)
            .or_else(|| own.map(str::to_string))
            .unwrap_or_default()
    }

    /// Available backends inside the scope's allow-list
    async fn visible_backends(&self, allowed: Option<&[String]>) -> Vec<BackendInfo> {
        self.catalog
            .list_backends()
            .await
            .into_iter()
            .filter(|b| b.is_available())
            .filter(|b| allowed.map_or(true, |names| names.iter().any(|n| n == &b.name)))
            .collect()
    }

    /// Meta-tool descriptors for a scope
    pub async fn list_discovery_tools(&self, scope: Option<&str>) -> Vec<Tool> {
        let scope = GroupScope::parse(scope);
        let allowed = self.resolve_scope(&scope);
        let servers: Vec<String> = self
            .visible_backends(allowed.as_deref())
            .await
            .into_iter()
            .map(|b| b.name)
            .collect();
        let servers = if servers.is_empty() {
            "none".to_string()
        } else {
            servers.join(", ")
        };

        let mut tools = Vec::with_capacity(3);
        let search_description = if self.progressive_disclosure() {
            format!(
                "Search for tools across connected servers by describing what you want to do. \
                 Returns tool names and descriptions only; call {} to get a tool's input schema \
                 before calling it with {}. Available servers: {}.",
                DESCRIBE_TOOL, CALL_TOOL, servers
            )
        } else {
            format!(
                "Search for tools across connected servers by describing what you want to do. \
                 Returns matching tools with their full input schemas; call them with {}. \
                 Available servers: {}.",
                CALL_TOOL, servers
            )
        };
        tools.push(Tool::new(
            SEARCH_TOOLS,
            search_description,
            json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "What you want to do, in natural language"
                    },
                    "limit": {
                        "type": "integer",
                        "description": "Maximum number of tools to return",
                        "minimum": 1,
                        "maximum": self.config.max_limit,
                        "default": self.config.default_limit
                    }
                },
                "required": ["query"]
            }),
        ));

        if self.progressive_disclosure() {
            tools.push(Tool::new(
                DESCRIBE_TOOL,
                format!(
                    "Get the full input schema of a tool found with {}. Required before {}.",
                    SEARCH_TOOLS, CALL_TOOL
                ),
                json!({
                    "type": "object",
                    "properties": {
                        "toolName": {
                            "type": "string",
                            "description": "Exact tool name from the search results"
                        }
                    },
                    "required": ["toolName"]
                }),
            ));
        }

        let call_description = if self.progressive_disclosure() {
            format!(
                "Call a tool by name with arguments matching the schema returned by {}.",
                DESCRIBE_TOOL
            )
        } else {
            format!(
                "Call a tool by name with arguments matching the input schema returned by {}.",
                SEARCH_TOOLS
            )
        };
        tools.push(Tool::new(
            CALL_TOOL,
            call_description,
            json!({
                "type": "object",
                "properties": {
                    "toolName": {
                        "type": "string",
                        "description": "Exact tool name"
                    },
                    "arguments": {
                        "type": "object",
                        "description": "Arguments for the tool"
                    }
                },
                "required": ["toolName"]
            }),
        ));
        tools
    }

    fn guidance(&self, found: bool) -> (String, Vec<String>) {
        let mut next_steps = Vec::new();
        let guideline = if self.progressive_disclosure() {
            next_steps.push("Pick the tool whose description best matches your task".to_string());
            next_steps.push(format!("Call {} with its name to get the input schema", DESCRIBE_TOOL));
            next_steps.push(format!(
                "Call {} with the tool name and arguments matching that schema",
                CALL_TOOL
            ));
            format!(
                "Results list tool names and descriptions only. Use {} before {} to learn the required arguments.",
                DESCRIBE_TOOL, CALL_TOOL
            )
        } else {
            next_steps.push("Pick the tool whose description best matches your task".to_string());
            next_steps.push(format!(
                "Call {} with the tool name and arguments matching its inputSchema",
                CALL_TOOL
            ));
            format!(
                "Results include each tool's inputSchema. Use {} with arguments that satisfy it.",
                CALL_TOOL
            )
        };
        if !found {
            next_steps.insert(0, "Try a broader or differently worded query".to_string());
        }
        (guideline, next_steps)
    }

    fn response(&self, query: &str, threshold: f64, tools: Vec<DiscoveredTool>) -> SearchResponse {
        let (guideline, next_steps) = self.guidance(!tools.is_empty());
        SearchResponse {
            metadata: SearchMetadata {
                query: query.to_string(),
                threshold,
                total_results: tools.len(),
                progressive_disclosure: self.progressive_disclosure(),
                guideline,
                next_steps,
            },
            tools,
        }
    }

    /// Semantic search over the tools visible in `scope`
    pub async fn search(
        &self,
        query: &str,
        limit: Option<usize>,
        scope: Option<&str>,
    ) -> Result<SearchResponse> {
        let query = query.trim();
        if query.is_empty() {
            return Err(HubError::validation("query must be a non-empty string"));
        }
        let limit = limit
            .unwrap_or(self.config.default_limit)
            .clamp(1, self.config.max_limit);
        let threshold = self.threshold.threshold_for(query);

        let scope = GroupScope::parse(scope);
        let allowed = self.resolve_scope(&scope);
        if allowed.as_ref().is_some_and(|a| a.is_empty()) {
            return Ok(self.response(query, threshold, Vec::new()));
        }

        let vector = self.embedder.embed(query).await?;
        let hits = self
            .store
            .similarity_search_in(&vector, limit, threshold, &[TOOL_ENTITY_KIND], allowed.as_deref())
            .await?;
        let candidates = hits.len();

        let backends: HashMap<String, BackendInfo> = self
            .visible_backends(allowed.as_deref())
            .await
            .into_iter()
            .map(|b| (b.name.clone(), b))
            .collect();

        let tools: Vec<DiscoveredTool> = hits
            .iter()
            .filter_map(|hit| self.resolve_hit(hit, &backends, &scope))
            .collect();

        info!(
            query,
            threshold,
            candidates,
            results = tools.len(),
            group = scope.group().unwrap_or("*"),
            "Tool search complete"
        );
        Ok(self.response(query, threshold, tools))
    }

    /// Re-resolve a hit against the live catalog; stale or hidden tools are dropped
    fn resolve_hit(
        &self,
        hit: &ScoredRecord,
        backends: &HashMap<String, BackendInfo>,
        scope: &GroupScope,
    ) -> Option<DiscoveredTool> {
        let record = &hit.record;
        let (key_backend, key_tool) = record
            .entity_key
            .split_once(':')
            .unwrap_or(("", record.entity_key.as_str()));
        let backend_name = record
            .metadata
            .get(METADATA_BACKEND_KEY)
            .and_then(Value::as_str)
            .unwrap_or(key_backend);
        let tool_name = record
            .metadata
            .get("toolName")
            .and_then(Value::as_str)
            .unwrap_or(key_tool);

        let Some(tool) = backends.get(backend_name).and_then(|b| b.tool(tool_name)) else {
            debug!(backend = backend_name, tool = tool_name, "Dropping stale search hit");
            return None;
        };
        if !self.is_visible(scope, backend_name, tool_name) {
            debug!(backend = backend_name, tool = tool_name, "Dropping filtered search hit");
            return None;
        }

        let input_schema = if self.progressive_disclosure() {
            None
        } else {
            Some(strip_schema_meta(&tool.input_schema))
        };
        Some(DiscoveredTool {
            name: tool.name.clone(),
            description: self.description_for(backend_name, tool_name, tool.description.as_deref()),
            input_schema,
            server_name: backend_name.to_string(),
        })
    }

    /// Full definition of the first visible tool named `tool_name`
    pub async fn describe(&self, tool_name: &str, scope: Option<&str>) -> Result<Option<ToolDescription>> {
        let tool_name = tool_name.trim();
        if tool_name.is_empty() {
            return Err(HubError::validation("toolName must be a non-empty string"));
        }
        let scope = GroupScope::parse(scope);
        let allowed = self.resolve_scope(&scope);

        for backend in self.visible_backends(allowed.as_deref()).await {
            let Some(tool) = backend.tool(tool_name) else {
                continue;
            };
            if !self.is_visible(&scope, &backend.name, tool_name) {
                continue;
            }
            return Ok(Some(ToolDescription {
                name: tool.name.clone(),
                description: self.description_for(&backend.name, tool_name, tool.description.as_deref()),
                input_schema: strip_schema_meta(&tool.input_schema),
                server_name: backend.name.clone(),
            }));
        }
        debug!(tool = tool_name, "describe_tool found no visible tool");
        Ok(None)
    }

    /// Validate and forward a `call_tool` request
    pub async fn invoke(&self, tool_name: &str, arguments: Value, scope: Option<&str>) -> Result<ToolResult> {
        let call = ToolCall::new(tool_name.trim().to_string(), arguments);
        call.validate()?;
        let call = ToolCall {
            arguments: if call.arguments.is_null() { json!({}) } else { call.arguments },
            ..call
        };
        let scope = GroupScope::parse(scope);
        debug!(tool = %call.name, group = scope.group().unwrap_or("*"), "Forwarding tool call");
        self.invoker.invoke(call, scope.group()).await
    }

    /// Dispatch a meta-tool call.
    ///
    /// Protocol problems come back as `isError` results; only an unknown
    /// meta-tool name is an `Err`.
    pub async fn call_meta_tool(&self, name: &str, arguments: &Value, scope: Option<&str>) -> Result<ToolResult> {
        match name {
            SEARCH_TOOLS => {
                let Some(query) = arguments.get("query").and_then(Value::as_str) else {
                    return Ok(error_result("query is required and must be a string"));
                };
                let limit = parse_limit(arguments.get("limit"));
                match self.search(query, limit, scope).await {
                    Ok(response) => Ok(ToolResult::success(&serde_json::to_value(&response)?)),
                    Err(e) => Ok(self.failure_result(SEARCH_TOOLS, &e)),
                }
            }
            DESCRIBE_TOOL if self.progressive_disclosure() => {
                let Some(tool_name) = arguments.get("toolName").and_then(Value::as_str) else {
                    return Ok(error_result("toolName is required and must be a string"));
                };
                match self.describe(tool_name, scope).await {
                    Ok(Some(description)) => Ok(ToolResult::success(&serde_json::to_value(&description)?)),
                    Ok(None) => Ok(ToolResult::error_payload(&json!({
                        "error": format!("Tool '{}' not found", tool_name.trim()),
                        "toolName": tool_name.trim(),
                        "suggestion": format!("Use {} to find available tools", SEARCH_TOOLS),
                    }))),
                    Err(e) => Ok(self.failure_result(DESCRIBE_TOOL, &e)),
                }
            }
            CALL_TOOL => {
                let Some(tool_name) = arguments.get("toolName").and_then(Value::as_str) else {
                    return Ok(error_result("toolName is required and must be a string"));
                };
                let tool_arguments = arguments.get("arguments").cloned().unwrap_or(Value::Null);
                match self.invoke(tool_name, tool_arguments, scope).await {
                    Ok(result) => Ok(result),
                    Err(e) => Ok(self.failure_result(CALL_TOOL, &e)),
                }
            }
            other => Err(HubError::not_found(format!("Tool '{}' not found", other))),
        }
    }

    fn failure_result(&self, operation: &str, err: &HubError) -> ToolResult {
        match err {
            HubError::Validation { message } => error_result(message),
            _ => {
                error!(operation, category = err.category(), error = %err, "Discovery operation failed");
                error_result(format!("{} failed: {}", operation, err))
            }
        }
    }
}

fn error_result(message: impl Into<String>) -> ToolResult {
    ToolResult::error_payload(&json!({ "error": message.into() }))
}

/// Accept integers and floats; anything else falls back to the default
fn parse_limit(value: Option<&Value>) -> Option<usize> {
    let value = value?;
    if let Some(n) = value.as_u64() {
        return Some(n.min(usize::MAX as u64) as usize);
    }
    if let Some(n) = value.as_i64() {
        // Negative limits clamp to the minimum
        return Some(if n < 0 { 0 } else { n as usize });
    }
    value.as_f64().map(|f| if f <= 0.0 { 0 } else { f as usize })
}
