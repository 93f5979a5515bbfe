//! Error types and handling for MCPHub

use std::io::ErrorKind;
use thiserror::Error;

/// Result type alias for MCPHub operations
pub type Result<T> = std::result::Result<T, HubError>;

/// Main error type for MCPHub
#[derive(Error, Debug)]
pub enum HubError {
    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Storage errors raised by a vector backend
    #[error("Storage error: {message}")]
    Storage {
        message: String,
        /// Transient error code (SQLSTATE or socket error name) when known
        code: Option<String>,
    },

    /// Connection errors (backing store or embedding provider)
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// Embedding provider errors
    #[error("Embedding error: {message}")]
    Embedding { message: String },

    /// Vector index DDL errors
    #[error("Index error: {message}")]
    Index { message: String },

    /// Validation errors (protocol input, configuration values)
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// Lookup errors
    #[error("Not found: {message}")]
    NotFound { message: String },

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP client errors
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// PostgreSQL errors
    #[error("Database error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// Connection pool errors
    #[error("Connection pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    /// Generic errors
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl HubError {
    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a storage error without a code
    pub fn storage<S: Into<String>>(message: S) -> Self {
        Self::Storage {
            message: message.into(),
            code: None,
        }
    }

    /// Create a storage error carrying a transient error code
    pub fn storage_with_code<S: Into<String>, C: Into<String>>(message: S, code: C) -> Self {
        Self::Storage {
            message: message.into(),
            code: Some(code.into()),
        }
    }

    /// Create a connection error
    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create an embedding error
    pub fn embedding<S: Into<String>>(message: S) -> Self {
        Self::Embedding {
            message: message.into(),
        }
    }

    /// Create an index error
    pub fn index<S: Into<String>>(message: S) -> Self {
        Self::Index {
            message: message.into(),
        }
    }

    /// Create a validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a not-found error
    pub fn not_found<S: Into<String>>(message: S) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Error code used by the retry classifier.
    ///
    /// Store errors report their SQLSTATE, socket-level failures report the
    /// conventional errno name (`ECONNRESET`, `ECONNREFUSED`, ...).
    pub fn code(&self) -> Option<String> {
        match self {
            HubError::Storage { code, .. } => code.clone(),
            HubError::Io(e) => io_error_code(e.kind()).map(str::to_string),
            HubError::Postgres(e) => postgres_error_code(e),
            HubError::Pool(e) => match e {
                deadpool_postgres::PoolError::Backend(pg) => postgres_error_code(pg),
                deadpool_postgres::PoolError::Timeout(_) => Some("ETIMEDOUT".to_string()),
                _ => None,
            },
            HubError::Http(e) if e.is_timeout() => Some("ETIMEDOUT".to_string()),
            HubError::Http(e) if e.is_connect() => Some("ECONNREFUSED".to_string()),
            _ => None,
        }
    }

    /// Get the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            HubError::Config { .. } => "config",
            HubError::Storage { .. } => "storage",
            HubError::Connection { .. } => "connection",
            HubError::Embedding { .. } => "embedding",
            HubError::Index { .. } => "index",
            HubError::Validation { .. } => "validation",
            HubError::NotFound { .. } => "not_found",
            HubError::Io(_) => "io",
            HubError::Serde(_) => "serialization",
            HubError::Yaml(_) => "yaml",
            HubError::Http(_) => "http",
            HubError::Postgres(_) => "database",
            HubError::Pool(_) => "pool",
            HubError::Internal(_) => "internal",
        }
    }
}

fn io_error_code(kind: ErrorKind) -> Option<&'static str> {
    match kind {
        ErrorKind::ConnectionReset => Some("ECONNRESET"),
        ErrorKind::ConnectionRefused => Some("ECONNREFUSED"),
        ErrorKind::ConnectionAborted => Some("ECONNABORTED"),
        ErrorKind::TimedOut => Some("ETIMEDOUT"),
        ErrorKind::BrokenPipe => Some("EPIPE"),
        ErrorKind::NotConnected => Some("ENOTCONN"),
        _ => None,
    }
}

fn postgres_error_code(error: &tokio_postgres::Error) -> Option<String> {
    if let Some(state) = error.code() {
        return Some(state.code().to_string());
    }
    if error.is_closed() {
        return Some("EPIPE".to_string());
    }
    // Socket failures surface as an io::Error source without a SQLSTATE
    let source = std::error::Error::source(error)?;
    let io = source.downcast_ref::<std::io::Error>()?;
    io_error_code(io.kind()).map(str::to_string)
}

impl Clone for HubError {
    fn clone(&self) -> Self {
        match self {
            HubError::Config { message } => HubError::Config { message: message.clone() },
            HubError::Storage { message, code } => HubError::Storage {
                message: message.clone(),
                code: code.clone(),
            },
            HubError::Connection { message } => HubError::Connection { message: message.clone() },
            HubError::Embedding { message } => HubError::Embedding { message: message.clone() },
            HubError::Index { message } => HubError::Index { message: message.clone() },
            HubError::Validation { message } => HubError::Validation { message: message.clone() },
            HubError::NotFound { message } => HubError::NotFound { message: message.clone() },

            // Non-cloneable sources keep their code so classification survives the clone
            other => HubError::Storage {
                message: other.to_string(),
                code: other.code(),
            },
        }
    }
}
