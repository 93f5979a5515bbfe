//! Smart Tool Discovery Module
//!
//! Semantic search over the tools of every aggregated backend, exposed as a
//! small set of meta-tools instead of the full tool list.

pub mod catalog;
pub mod engine;
pub mod sync;
pub mod threshold;

pub use catalog::{
    BackendInfo, BackendStatus, CatalogTool, GroupDefinition, StaticCatalog, ToolCatalog, ToolFilters,
    ToolInvoker, ToolSettings, UnavailableInvoker,
};
pub use engine::{
    DiscoveredTool, DiscoveryEngine, GroupScope, SearchMetadata, SearchResponse, ToolDescription, CALL_TOOL,
    DESCRIBE_TOOL, SCOPE_MARKER, SEARCH_TOOLS,
};
pub use sync::{entity_key, searchable_text, CatalogSync, SyncSummary};
pub use threshold::{FixedThreshold, QueryShapeThreshold, ThresholdPolicy};
