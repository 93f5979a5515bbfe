//! Error handling module for MCPHub
//!
//! This module provides the error type shared by every component and the
//! process-level fatal error guard.

mod error;
mod guard;

// Re-export the main error types and utilities
pub use error::{HubError, Result};
pub use guard::{FatalDecision, FatalErrorGuard};
