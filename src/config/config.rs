use crate::error::{HubError, Result};
use crate::storage::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

fn default_pool_size() -> usize { 10 }
fn default_idle_timeout() -> u64 { 30000 }
fn default_connection_timeout() -> u64 { 5000 }
fn default_max_connection_retries() -> u32 { 3 }
fn default_retry_delay() -> u64 { 1000 }
fn default_max_retry_delay() -> u64 { 10000 }
fn default_health_check_interval() -> u64 { 30000 }
fn default_health_check_enabled() -> bool { true }
fn default_max_reconnect_attempts() -> u32 { 5 }
fn default_embedding_model() -> String { "text-embedding-3-small".to_string() }
fn default_embedding_base_url() -> String { "https://api.openai.com/v1".to_string() }
fn default_max_input_chars() -> usize { 8000 }
fn default_request_timeout() -> u64 { 30 }
fn default_search_limit() -> usize { 10 }
fn default_max_search_limit() -> usize { 100 }
fn default_low_threshold() -> f64 { 0.2 }
fn default_threshold() -> f64 { 0.3 }
fn default_high_threshold() -> f64 { 0.4 }
fn default_log_level() -> String { "info".to_string() }
fn default_max_fatal_errors() -> usize { 5 }
fn default_fatal_window() -> u64 { 60 }

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Backing store connection settings
    #[serde(default)]
    pub storage: StorageConfig,
    /// Embedding provider settings
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    /// Discovery protocol settings
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Process-level failure budget
    #[serde(default)]
    pub fatal_errors: FatalErrorConfig,
}

/// Storage connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// PostgreSQL connection URL; the in-memory store is used when absent
    #[serde(default)]
    pub database_url: Option<String>,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// Idle connection timeout in milliseconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_ms: u64,
    /// Connection timeout in milliseconds
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_ms: u64,
    /// Retries per storage operation
    #[serde(default = "default_max_connection_retries")]
    pub max_connection_retries: u32,
    /// Initial retry delay in milliseconds
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
    /// Retry delay ceiling in milliseconds
    #[serde(default = "default_max_retry_delay")]
    pub max_retry_delay_ms: u64,
    /// Health-check interval in milliseconds
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval_ms: u64,
    #[serde(default = "default_health_check_enabled")]
    pub health_check_enabled: bool,
    /// Reconnect attempts after a failed health check
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            pool_size: default_pool_size(),
            idle_timeout_ms: default_idle_timeout(),
            connection_timeout_ms: default_connection_timeout(),
            max_connection_retries: default_max_connection_retries(),
            retry_delay_ms: default_retry_delay(),
            max_retry_delay_ms: default_max_retry_delay(),
            health_check_interval_ms: default_health_check_interval(),
            health_check_enabled: default_health_check_enabled(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
        }
    }
}

impl StorageConfig {
    /// Process-wide retry policy for storage operations
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_connection_retries,
            Duration::from_millis(self.retry_delay_ms),
            2.0,
        )
        .with_max_delay(Duration::from_millis(self.max_retry_delay_ms))
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    /// Validate storage configuration
    pub fn validate(&self) -> Result<()> {
        if self.pool_size == 0 {
            return Err(HubError::config("storage.pool_size must be at least 1"));
        }
        if self.health_check_interval_ms < 100 {
            return Err(HubError::config(
                "storage.health_check_interval_ms must be at least 100",
            ));
        }
        if self.max_retry_delay_ms < self.retry_delay_ms {
            return Err(HubError::config(
                "storage.max_retry_delay_ms must not be lower than storage.retry_delay_ms",
            ));
        }
        if let Some(url) = &self.database_url {
            if !(url.starts_with("postgres://") || url.starts_with("postgresql://")) {
                return Err(HubError::config(format!(
                    "storage.database_url must be a postgres:// URL, got '{}'",
                    url.split('@').last().unwrap_or_default()
                )));
            }
        }
        Ok(())
    }
}

/// Embedding provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Model name sent to the provider
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Provider credential; the deterministic fallback is used when absent
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    /// OpenAI-compatible base URL
    #[serde(default = "default_embedding_base_url")]
    pub base_url: String,
    /// Inputs are truncated to this many characters
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub timeout_seconds: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            api_key: None,
            base_url: default_embedding_base_url(),
            max_input_chars: default_max_input_chars(),
            timeout_seconds: default_request_timeout(),
        }
    }
}

/// Similarity thresholds chosen from the query shape
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdConfig {
    /// Short queries
    #[serde(default = "default_low_threshold")]
    pub broad: f64,
    #[serde(default = "default_threshold")]
    pub default: f64,
    /// Long or explicitly precise queries
    #[serde(default = "default_high_threshold")]
    pub precise: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            broad: default_low_threshold(),
            default: default_threshold(),
            precise: default_high_threshold(),
        }
    }
}

/// Discovery protocol configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Defer full schemas to a separate describe step
    #[serde(default)]
    pub progressive_disclosure: bool,
    #[serde(default = "default_search_limit")]
    pub default_limit: usize,
    #[serde(default = "default_max_search_limit")]
    pub max_limit: usize,
    #[serde(default)]
    pub thresholds: ThresholdConfig,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            progressive_disclosure: false,
            default_limit: default_search_limit(),
            max_limit: default_max_search_limit(),
            thresholds: ThresholdConfig::default(),
        }
    }
}

impl DiscoveryConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_limit == 0 || self.max_limit > 100 {
            return Err(HubError::config("discovery.max_limit must be between 1 and 100"));
        }
        if self.default_limit == 0 || self.default_limit > self.max_limit {
            return Err(HubError::config(format!(
                "discovery.default_limit must be between 1 and {}",
                self.max_limit
            )));
        }
        let thresholds = &self.thresholds;
        for (name, value) in [
            ("broad", thresholds.broad),
            ("default", thresholds.default),
            ("precise", thresholds.precise),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(HubError::config(format!(
                    "discovery.thresholds.{} must be between 0.0 and 1.0",
                    name
                )));
            }
        }
        Ok(())
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(HubError::config(format!(
                "Invalid log format '{}' (valid options: text, json)",
                other
            ))),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::Text,
        }
    }
}

/// Rolling-window failure budget
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FatalErrorConfig {
    #[serde(default = "default_max_fatal_errors")]
    pub max_errors: usize,
    #[serde(default = "default_fatal_window")]
    pub window_secs: u64,
}

impl Default for FatalErrorConfig {
    fn default() -> Self {
        Self {
            max_errors: default_max_fatal_errors(),
            window_secs: default_fatal_window(),
        }
    }
}

impl Config {
    /// Load .env files in order of precedence
    fn load_env_files() {
        let env = std::env::var("MCPHUB_ENV").unwrap_or_else(|_| "development".to_string());

        let env_specific_file = format!(".env.{}", env);
        let env_files = [".env", env_specific_file.as_str(), ".env.local"];

        for env_file in env_files {
            match dotenvy::from_filename(env_file) {
                Ok(_) => {
                    tracing::info!("Loaded environment variables from {}", env_file);
                }
                Err(e) if e.not_found() => {
                    tracing::debug!("No {} file found, skipping", env_file);
                }
                Err(e) => {
                    tracing::warn!("Failed to load {}: {}", env_file, e);
                }
            }
        }
    }

    /// Parse a YAML configuration file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(|e| {
            HubError::config(format!(
                "Failed to read config file '{}': {}",
                path.as_ref().display(),
                e
            ))
        })?;
        serde_yaml::from_str(&content)
            .map_err(|e| HubError::config(format!("Failed to parse config file: {}", e)))
    }

    /// Load configuration from file with environment variables and CLI overrides
    pub fn load<P: AsRef<Path>>(path: Option<P>, log_level_override: Option<String>) -> Result<Self> {
        // .env < file < environment < CLI
        Self::load_env_files();

        let mut config = match path {
            Some(path) if path.as_ref().exists() => Self::from_file(path)?,
            Some(path) => {
                tracing::warn!(
                    "Config file {} not found, using defaults",
                    path.as_ref().display()
                );
                Self::default()
            }
            None => Self::default(),
        };

        config.apply_environment_overrides()?;

        if let Some(level) = log_level_override {
            config.logging.level = level;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the whole configuration tree
    pub fn validate(&self) -> Result<()> {
        self.storage.validate()?;
        self.discovery.validate()?;
        if self.embedding.max_input_chars == 0 {
            return Err(HubError::config("embedding.max_input_chars must be at least 1"));
        }
        if self.fatal_errors.max_errors == 0 {
            return Err(HubError::config("fatal_errors.max_errors must be at least 1"));
        }
        Ok(())
    }
}
