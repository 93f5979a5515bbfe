//! MCP types and structures
//!
//! Only the subset of the protocol the hub speaks: tool descriptors, tool
//! calls and results, and the JSON-RPC envelope.

use crate::error::{HubError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Schema metadata key removed before schemas are handed to callers
pub const SCHEMA_META_KEY: &str = "$schema";

/// MCP Tool definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    /// Tool name (unique identifier)
    pub name: String,
    /// Human-readable description
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub description: Option<String>,
    /// JSON Schema for input parameters
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

impl Tool {
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: Some(description.into()),
            input_schema,
        }
    }
}

/// Copy of `schema` without the top-level `$schema` key
pub fn strip_schema_meta(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => {
            let mut map = map.clone();
            map.remove(SCHEMA_META_KEY);
            Value::Object(map)
        }
        other => other.clone(),
    }
}

/// Tool call request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Tool name to call
    pub name: String,
    /// Arguments for the tool
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(name: String, arguments: Value) -> Self {
        Self { name, arguments }
    }

    /// Validate the tool call
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(HubError::validation("Tool call name cannot be empty"));
        }
        if !(self.arguments.is_object() || self.arguments.is_null()) {
            return Err(HubError::validation("Tool call arguments must be an object"));
        }
        Ok(())
    }
}

/// MCP content item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ToolContent {
    #[serde(rename = "text")]
    Text { text: String },
}

impl ToolContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn as_text(&self) -> &str {
        match self {
            Self::Text { text } => text,
        }
    }
}

/// Tool call result (MCP-compliant format)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Content array for MCP-compliant responses
    pub content: Vec<ToolContent>,
    /// MCP-compliant error flag
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

impl ToolResult {
    /// Successful result carrying `data` as pretty-printed JSON text
    pub fn success(data: &Value) -> Self {
        let text = serde_json::to_string_pretty(data).unwrap_or_else(|_| data.to_string());
        Self {
            content: vec![ToolContent::text(text)],
            is_error: false,
        }
    }

    /// Error result with a plain message
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::text(message)],
            is_error: true,
        }
    }

    /// Error result carrying a structured payload
    pub fn error_payload(data: &Value) -> Self {
        Self {
            is_error: true,
            ..Self::success(data)
        }
    }

    /// Parse the first text item as JSON
    pub fn json(&self) -> Option<Value> {
        let first = self.content.first()?;
        serde_json::from_str(first.as_text()).ok()
    }
}

/// MCP Request message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpRequest {
    /// JSON-RPC version (always "2.0")
    pub jsonrpc: String,
    /// Request ID; absent for notifications
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_strip_schema_meta() {
        let schema = json!({
            "$schema": "http://json-schema.org/draft-07/schema#",
            "type": "object",
            "properties": {"path": {"type": "string", "$schema": "nested stays"}}
        });
        let stripped = strip_schema_meta(&schema);
        assert!(stripped.get("$schema").is_none());
        assert_eq!(stripped["properties"]["path"]["$schema"], "nested stays");
        assert_eq!(strip_schema_meta(&json!(true)), json!(true));
    }

    #[test]
    fn test_tool_serialization_uses_camel_case_schema() {
        let tool = Tool::new("read_file", "Read a file", json!({"type": "object"}));
        let value = serde_json::to_value(&tool).unwrap();
        assert_eq!(value["inputSchema"]["type"], "object");
        assert!(value.get("input_schema").is_none());
    }

    #[test]
    fn test_tool_call_validation() {
        assert!(ToolCall::new("x".into(), json!({})).validate().is_ok());
        assert!(ToolCall::new("x".into(), Value::Null).validate().is_ok());
        assert!(ToolCall::new(" ".into(), json!({})).validate().is_err());
        assert!(ToolCall::new("x".into(), json!([1])).validate().is_err());
    }

    #[test]
    fn test_result_payloads() {
        let ok = ToolResult::success(&json!({"a": 1}));
        assert!(!ok.is_error);
        assert_eq!(ok.json().unwrap()["a"], 1);

        let err = ToolResult::error_payload(&json!({"error": "missing"}));
        assert!(err.is_error);
        assert_eq!(err.json().unwrap()["error"], "missing");

        let value = serde_json::to_value(ToolResult::error("boom")).unwrap();
        assert_eq!(value["isError"], true);
        assert_eq!(value["content"][0]["type"], "text");
    }
}
