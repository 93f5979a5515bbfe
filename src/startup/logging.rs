//! Tracing subscriber setup
//!
//! Logs always go to stderr; stdout carries the JSON-RPC stream.

use crate::config::{LogFormat, LoggingConfig};
use crate::error::{HubError, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Level used before the configuration has been read
pub const BOOTSTRAP_LEVEL: &str = "info";

/// Stderr subscriber for the configuration loading phase, scoped with
/// [`tracing::subscriber::with_default`] so [`init_logging`] can still
/// install the global one afterwards.
pub fn bootstrap_subscriber(level: Option<&str>) -> impl tracing::Subscriber + Send + Sync {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level.unwrap_or(BOOTSTRAP_LEVEL)))
        .unwrap_or_else(|_| EnvFilter::new(BOOTSTRAP_LEVEL));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish()
}

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| HubError::config(format!("Invalid log level '{}': {}", config.level, e)))?;

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = match config.format {
        LogFormat::Text => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(false)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
    };
    result.map_err(|e| HubError::Internal(anyhow::anyhow!("Failed to initialize logging: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::Level;

    #[test]
    fn test_bootstrap_subscriber_honours_requested_level() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let debug_enabled = tracing::subscriber::with_default(bootstrap_subscriber(Some("debug")), || {
            tracing::enabled!(Level::DEBUG)
        });
        assert!(debug_enabled);

        let info_enabled = tracing::subscriber::with_default(bootstrap_subscriber(Some("warn")), || {
            tracing::enabled!(Level::INFO)
        });
        assert!(!info_enabled);
    }

    #[test]
    fn test_bootstrap_subscriber_survives_bad_level() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let warn_enabled = tracing::subscriber::with_default(bootstrap_subscriber(Some("mcphub=loud")), || {
            tracing::enabled!(Level::WARN)
        });
        assert!(warn_enabled);
    }
}
