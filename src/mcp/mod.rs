//! MCP (Model Context Protocol) implementation
//!
//! This module contains the MCP server that exposes the discovery meta-tools
//! to MCP clients.

pub mod errors;
pub mod server;
pub mod types;

pub use errors::{McpError, McpErrorCode};
pub use server::{McpServer, PROTOCOL_VERSION};
pub use types::*;
