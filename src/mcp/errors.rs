//! MCP-compliant error handling
//!
//! JSON-RPC 2.0 error codes and the error object carried in responses.

use crate::error::HubError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// MCP-compliant error codes following JSON-RPC 2.0 specification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum McpErrorCode {
    // Standard JSON-RPC error codes
    ParseError = -32700,
    InvalidRequest = -32600,
    MethodNotFound = -32601,
    InvalidParams = -32602,
    InternalError = -32603,

    // MCP-specific error codes
    ToolNotFound = -32000,
    ServiceUnavailable = -31989,
}

impl McpErrorCode {
    pub fn code(&self) -> i32 {
        *self as i32
    }
}

/// MCP-compliant error structure following JSON-RPC 2.0 specification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl McpError {
    pub fn new(code: McpErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            message: message.into(),
            data: None,
        }
    }

    pub fn method_not_found(method: &str) -> Self {
        Self {
            data: Some(serde_json::json!({ "method": method })),
            ..Self::new(McpErrorCode::MethodNotFound, format!("Method '{}' not found", method))
        }
    }

    pub fn tool_not_found(tool_name: &str) -> Self {
        Self {
            data: Some(serde_json::json!({ "tool_name": tool_name })),
            ..Self::new(McpErrorCode::ToolNotFound, format!("Tool '{}' not found", tool_name))
        }
    }
}

impl From<&HubError> for McpError {
    fn from(error: &HubError) -> Self {
        let code = match error {
            HubError::Validation { .. } => McpErrorCode::InvalidParams,
            HubError::NotFound { .. } => McpErrorCode::ToolNotFound,
            HubError::Storage { .. }
            | HubError::Connection { .. }
            | HubError::Postgres(_)
            | HubError::Pool(_) => McpErrorCode::ServiceUnavailable,
            HubError::Serde(_) => McpErrorCode::ParseError,
            _ => McpErrorCode::InternalError,
        };
        Self::new(code, error.to_string())
    }
}
