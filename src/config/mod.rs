//! Configuration management for MCPHub

mod config;
pub mod environment;

pub use config::*;
pub use environment::{parse_flag, EnvVars};
