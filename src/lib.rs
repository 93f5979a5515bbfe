//! MCPHub - MCP hub with semantic tool discovery
//!
//! Aggregated backend tools are embedded into a vector store and exposed to
//! MCP clients through a small set of discovery meta-tools instead of one
//! long tool list.

pub mod config;
pub mod discovery;
pub mod embedding;
pub mod error;
pub mod mcp;
pub mod startup;
pub mod storage;

pub use config::Config;
pub use error::{HubError, Result};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
