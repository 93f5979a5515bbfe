//! Startup helpers: logging setup and the configuration summary

pub mod logger;
pub mod logging;

pub use logger::{mask_secret, redact_database_url, StartupAdditionalInfo, StartupLogger};
pub use logging::{bootstrap_subscriber, init_logging};
