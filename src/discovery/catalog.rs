//! Tool catalog collaborators
//!
//! The discovery engine never talks to backends directly. It reads the live
//! catalog, the enable/visibility filters and description overrides through
//! the traits below, wired once at startup.

use crate::error::{HubError, Result};
use crate::mcp::types::{ToolCall, ToolResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

/// Connection state of an aggregated backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendStatus {
    #[default]
    Connected,
    Connecting,
    Disconnected,
}

/// A tool as currently advertised by a backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogTool {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "inputSchema", alias = "input_schema", default = "empty_schema")]
    pub input_schema: Value,
}

fn empty_schema() -> Value {
    serde_json::json!({"type": "object", "properties": {}})
}

impl CatalogTool {
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: Some(description.into()),
            input_schema,
        }
    }
}

/// Snapshot of one backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendInfo {
    pub name: String,
    #[serde(default)]
    pub status: BackendStatus,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub tools: Vec<CatalogTool>,
}

fn default_true() -> bool {
    true
}

impl BackendInfo {
    /// Connected and not disabled by configuration
    pub fn is_available(&self) -> bool {
        self.enabled && self.status == BackendStatus::Connected
    }

    pub fn tool(&self, name: &str) -> Option<&CatalogTool> {
        self.tools.iter().find(|t| t.name == name)
    }
}

/// Live view of the aggregated backends
#[async_trait]
pub trait ToolCatalog: Send + Sync {
    async fn list_backends(&self) -> Vec<BackendInfo>;
}

/// Configuration-driven filters and overrides
pub trait ToolFilters: Send + Sync {
    /// Whether the tool is enabled by backend tool configuration
    fn is_tool_enabled(&self, backend: &str, tool: &str) -> bool;

    /// Whether the tool is visible through `group`
    fn is_tool_visible_in_group(&self, group: &str, backend: &str, tool: &str) -> bool;

    /// Member backends of `group`, `None` when the group does not exist
    fn group_members(&self, group: &str) -> Option<Vec<String>>;

    /// Description configured to replace the backend's own
    fn custom_description(&self, backend: &str, tool: &str) -> Option<String>;
}

/// Forwards `call_tool` requests to the backend hosting the tool
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn invoke(&self, call: ToolCall, group: Option<&str>) -> Result<ToolResult>;
}

/// Invoker used when no backend transport is wired in
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableInvoker;

#[async_trait]
impl ToolInvoker for UnavailableInvoker {
    async fn invoke(&self, call: ToolCall, _group: Option<&str>) -> Result<ToolResult> {
        Ok(ToolResult::error(format!(
            "Tool '{}' cannot be invoked: no backend transport is configured",
            call.name
        )))
    }
}

/// Per-tool configuration in a static catalog file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub description: Option<String>,
}

/// Group definition in a static catalog file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupDefinition {
    pub name: String,
    #[serde(default)]
    pub backends: Vec<String>,
    /// Optional per-backend tool allow-lists; backends absent here expose every tool
    #[serde(default)]
    pub tools: HashMap<String, Vec<String>>,
}

/// YAML description of backends, groups and tool settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticCatalog {
    #[serde(default)]
    pub backends: Vec<BackendInfo>,
    #[serde(default)]
    pub groups: Vec<GroupDefinition>,
    /// Tool settings keyed by backend, then tool name
    #[serde(default)]
    pub tool_settings: HashMap<String, HashMap<String, ToolSettings>>,
}

impl StaticCatalog {
    pub fn from_yaml(content: &str) -> Result<Self> {
        let catalog: StaticCatalog = serde_yaml::from_str(content)?;
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(|e| {
            HubError::config(format!(
                "Failed to read catalog file '{}': {}",
                path.as_ref().display(),
                e
            ))
        })?;
        let catalog = Self::from_yaml(&content)?;
        info!(
            backends = catalog.backends.len(),
            groups = catalog.groups.len(),
            "Loaded static tool catalog"
        );
        Ok(catalog)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for backend in &self.backends {
            if backend.name.trim().is_empty() {
                return Err(HubError::config("Catalog backend name cannot be empty"));
            }
            if backend.name.contains(':') {
                return Err(HubError::config(format!(
                    "Catalog backend name '{}' must not contain ':'",
                    backend.name
                )));
            }
            if !seen.insert(backend.name.as_str()) {
                return Err(HubError::config(format!(
                    "Duplicate catalog backend '{}'",
                    backend.name
                )));
            }
        }
        Ok(())
    }

    pub fn with_backend(mut self, backend: BackendInfo) -> Self {
        self.backends.retain(|b| b.name != backend.name);
        self.backends.push(backend);
        self
    }

    pub fn with_group(mut self, group: GroupDefinition) -> Self {
        self.groups.retain(|g| g.name != group.name);
        self.groups.push(group);
        self
    }

    pub fn with_tool_settings(mut self, backend: &str, tool: &str, settings: ToolSettings) -> Self {
        self.tool_settings
            .entry(backend.to_string())
            .or_default()
            .insert(tool.to_string(), settings);
        self
    }

    fn settings(&self, backend: &str, tool: &str) -> Option<&ToolSettings> {
        self.tool_settings.get(backend)?.get(tool)
    }

    fn group(&self, name: &str) -> Option<&GroupDefinition> {
        self.groups.iter().find(|g| g.name == name)
    }
}

#[async_trait]
impl ToolCatalog for StaticCatalog {
    async fn list_backends(&self) -> Vec<BackendInfo> {
        self.backends.clone()
    }
}

impl ToolFilters for StaticCatalog {
    fn is_tool_enabled(&self, backend: &str, tool: &str) -> bool {
        self.settings(backend, tool).map_or(true, |s| s.enabled)
    }

    fn is_tool_visible_in_group(&self, group: &str, backend: &str, tool: &str) -> bool {
        let Some(definition) = self.group(group) else {
            debug!(group, "Visibility check against unknown group");
            return false;
        };
        if !definition.backends.iter().any(|b| b == backend) {
            return false;
        }
        match definition.tools.get(backend) {
            Some(allowed) => allowed.iter().any(|t| t == tool),
            None => true,
        }
    }

    fn group_members(&self, group: &str) -> Option<Vec<String>> {
        self.group(group).map(|g| g.backends.clone())
    }

    fn custom_description(&self, backend: &str, tool: &str) -> Option<String> {
        self.settings(backend, tool)?
            .description
            .clone()
            .filter(|d| !d.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"
backends:
  - name: filesystem
    tools:
      - name: read_file
        description: Read a file from disk
        inputSchema:
          type: object
          properties:
            path: { type: string }
      - name: delete_file
        description: Delete a file
  - name: github
    status: disconnected
    tools:
      - name: create_issue
        description: Open an issue
groups:
  - name: readers
    backends: [filesystem]
    tools:
      filesystem: [read_file]
  - name: empty
tool_settings:
  filesystem:
    delete_file:
      enabled: false
    read_file:
      description: Read any text file
"#;

    #[test]
    fn test_parse_static_catalog() {
        let catalog = StaticCatalog::from_yaml(CATALOG).unwrap();
        assert_eq!(catalog.backends.len(), 2);
        assert!(catalog.backends[0].is_available());
        assert!(!catalog.backends[1].is_available());
        let read = catalog.backends[0].tool("read_file").unwrap();
        assert_eq!(read.input_schema["properties"]["path"]["type"], "string");
        // Missing schema gets an empty object schema
        let delete = catalog.backends[0].tool("delete_file").unwrap();
        assert_eq!(delete.input_schema["type"], "object");
    }

    #[test]
    fn test_filters() {
        let catalog = StaticCatalog::from_yaml(CATALOG).unwrap();
        assert!(catalog.is_tool_enabled("filesystem", "read_file"));
        assert!(!catalog.is_tool_enabled("filesystem", "delete_file"));
        assert!(catalog.is_tool_enabled("unknown", "anything"));

        assert!(catalog.is_tool_visible_in_group("readers", "filesystem", "read_file"));
        assert!(!catalog.is_tool_visible_in_group("readers", "filesystem", "delete_file"));
        assert!(!catalog.is_tool_visible_in_group("readers", "github", "create_issue"));
        assert!(!catalog.is_tool_visible_in_group("missing", "filesystem", "read_file"));

        assert_eq!(catalog.group_members("empty"), Some(Vec::new()));
        assert_eq!(catalog.group_members("missing"), None);
        assert_eq!(
            catalog.custom_description("filesystem", "read_file").as_deref(),
            Some("Read any text file")
        );
        assert_eq!(catalog.custom_description("filesystem", "delete_file"), None);
    }

    #[test]
    fn test_rejects_invalid_backend_names() {
        let err = StaticCatalog::from_yaml("backends:\n  - name: 'a:b'\n").unwrap_err();
        assert!(err.to_string().contains("must not contain"));
        let err = StaticCatalog::from_yaml("backends:\n  - name: a\n  - name: a\n").unwrap_err();
        assert!(err.to_string().contains("Duplicate"));
    }

    #[test]
    fn test_unavailable_invoker_reports_error_result() {
        let result = tokio_test::block_on(
            UnavailableInvoker.invoke(ToolCall::new("read_file".to_string(), serde_json::json!({})), None),
        )
        .unwrap();
        assert!(result.is_error);
    }

    #[test]
    fn test_catalog_lists_backends() {
        let catalog = StaticCatalog::from_yaml(CATALOG).unwrap();
        let backends = tokio_test::block_on(catalog.list_backends());
        let names: Vec<_> = backends.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["filesystem", "github"]);
    }
}
