//! Environment variable integration for MCPHub configuration

use crate::config::Config;
use crate::error::{HubError, Result};
use std::env;
use std::str::FromStr;
use tracing::debug;

/// Environment variable names used by MCPHub
pub struct EnvVars;

impl EnvVars {
    pub const DATABASE_URL: &'static str = "DATABASE_URL";
    pub const DB_POOL_SIZE: &'static str = "DB_POOL_SIZE";
    pub const DB_IDLE_TIMEOUT: &'static str = "DB_IDLE_TIMEOUT";
    pub const DB_CONNECTION_TIMEOUT: &'static str = "DB_CONNECTION_TIMEOUT";
    pub const DB_MAX_RETRIES: &'static str = "DB_MAX_RETRIES";
    pub const DB_RETRY_DELAY: &'static str = "DB_RETRY_DELAY";
    pub const DB_HEALTH_CHECK_INTERVAL: &'static str = "DB_HEALTH_CHECK_INTERVAL";
    pub const DB_HEALTH_CHECK_ENABLED: &'static str = "DB_HEALTH_CHECK_ENABLED";
    pub const DB_MAX_RECONNECT_ATTEMPTS: &'static str = "DB_MAX_RECONNECT_ATTEMPTS";
    pub const PROGRESSIVE_DISCLOSURE: &'static str = "PROGRESSIVE_DISCLOSURE";
    pub const EMBEDDING_MODEL: &'static str = "EMBEDDING_MODEL";
    pub const OPENAI_API_KEY: &'static str = "OPENAI_API_KEY";
    pub const OPENAI_API_BASE_URL: &'static str = "OPENAI_API_BASE_URL";
    pub const DISCOVERY_DEFAULT_LIMIT: &'static str = "DISCOVERY_DEFAULT_LIMIT";
    pub const LOG_LEVEL: &'static str = "LOG_LEVEL";
    pub const LOG_FORMAT: &'static str = "LOG_FORMAT";
}

/// Non-empty value of an environment variable
fn var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| HubError::config(format!("Invalid {} environment variable: {}", name, e))),
        None => Ok(None),
    }
}

/// Parse boolean flags the way operators write them
pub fn parse_flag(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(HubError::config(format!(
            "Invalid {}: {} (valid options: true, false)",
            name, raw
        ))),
    }
}

fn flag_var(name: &str) -> Result<Option<bool>> {
    var(name).map(|raw| parse_flag(name, &raw)).transpose()
}

impl Config {
    /// Apply environment variable overrides to configuration
    pub fn apply_environment_overrides(&mut self) -> Result<()> {
        if let Some(url) = var(EnvVars::DATABASE_URL) {
            debug!("Environment override: {} (set)", EnvVars::DATABASE_URL);
            self.storage.database_url = Some(url);
        }
        if let Some(v) = parse_var(EnvVars::DB_POOL_SIZE)? {
            self.storage.pool_size = v;
        }
        if let Some(v) = parse_var(EnvVars::DB_IDLE_TIMEOUT)? {
            self.storage.idle_timeout_ms = v;
        }
        if let Some(v) = parse_var(EnvVars::DB_CONNECTION_TIMEOUT)? {
            self.storage.connection_timeout_ms = v;
        }
        if let Some(v) = parse_var(EnvVars::DB_MAX_RETRIES)? {
            self.storage.max_connection_retries = v;
        }
        if let Some(v) = parse_var(EnvVars::DB_RETRY_DELAY)? {
            self.storage.retry_delay_ms = v;
        }
        if let Some(v) = parse_var(EnvVars::DB_HEALTH_CHECK_INTERVAL)? {
            self.storage.health_check_interval_ms = v;
        }
        if let Some(v) = flag_var(EnvVars::DB_HEALTH_CHECK_ENABLED)? {
            self.storage.health_check_enabled = v;
        }
        if let Some(v) = parse_var(EnvVars::DB_MAX_RECONNECT_ATTEMPTS)? {
            self.storage.max_reconnect_attempts = v;
        }

        if let Some(v) = flag_var(EnvVars::PROGRESSIVE_DISCLOSURE)? {
            debug!("Environment override: {}={}", EnvVars::PROGRESSIVE_DISCLOSURE, v);
            self.discovery.progressive_disclosure = v;
        }
        if let Some(v) = parse_var(EnvVars::DISCOVERY_DEFAULT_LIMIT)? {
            self.discovery.default_limit = v;
        }

        if let Some(model) = var(EnvVars::EMBEDDING_MODEL) {
            debug!("Environment override: {}={}", EnvVars::EMBEDDING_MODEL, model);
            self.embedding.model = model;
        }
        if let Some(key) = var(EnvVars::OPENAI_API_KEY) {
            self.embedding.api_key = Some(key);
        }
        if let Some(url) = var(EnvVars::OPENAI_API_BASE_URL) {
            self.embedding.base_url = url;
        }

        if let Some(level) = var(EnvVars::LOG_LEVEL) {
            self.logging.level = level;
        }
        if let Some(format) = parse_var(EnvVars::LOG_FORMAT)? {
            self.logging.format = format;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogFormat;

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("X", "yes").unwrap());
        assert!(parse_flag("X", "ON").unwrap());
        assert!(!parse_flag("X", "0").unwrap());
        assert!(parse_flag("X", "maybe").is_err());
    }

    // Single test so the process-wide environment is not mutated concurrently
    #[test]
    fn test_environment_overrides() {
        env::set_var(EnvVars::DB_POOL_SIZE, "3");
        env::set_var(EnvVars::PROGRESSIVE_DISCLOSURE, "true");
        env::set_var(EnvVars::LOG_FORMAT, "json");

        let mut config = Config::default();
        config.apply_environment_overrides().unwrap();
        assert_eq!(config.storage.pool_size, 3);
        assert!(config.discovery.progressive_disclosure);
        assert_eq!(config.logging.format, LogFormat::Json);

        env::set_var(EnvVars::DB_MAX_RECONNECT_ATTEMPTS, "many");
        let mut config = Config::default();
        assert!(config.apply_environment_overrides().is_err());

        for name in [
            EnvVars::DB_POOL_SIZE,
            EnvVars::PROGRESSIVE_DISCLOSURE,
            EnvVars::LOG_FORMAT,
            EnvVars::DB_MAX_RECONNECT_ATTEMPTS,
        ] {
            env::remove_var(name);
        }
    }
}
