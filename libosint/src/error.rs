//! Error types for the collection pipeline
//!
//! Two layers live here. [`OsintError`] is the crate error returned by fallible
//! library calls (configuration, database, bad input). [`ErrorKind`] is the
//! fetch-level taxonomy attached to a `FetchResult` or a run-history entry; it
//! is data, not a propagated error.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::ProxyPreference;

pub type Result<T> = std::result::Result<T, OsintError>;

#[derive(Error, Debug)]
pub enum OsintError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("No proxy available for preference '{0}'")]
    NoProxyAvailable(ProxyPreference),

    #[error("Result sink error: {0}")]
    Sink(String),
}

impl OsintError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            OsintError::InvalidInput(_) => 3,
            OsintError::NotFound(_) => 4,
            OsintError::Config(_) | OsintError::Database(_) => 2,
            OsintError::NoProxyAvailable(_) | OsintError::Sink(_) => 1,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database operation failed: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Corrupt row in {table}: {reason}")]
    Corrupt { table: &'static str, reason: String },
}

/// Why a fetch attempt did not fully succeed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NetworkTimeout,
    RateLimited,
    ProxyUnreachable,
    MalformedResponse,
    AuthRequired,
    TargetNotFound,
    /// No fetcher is registered for the target's platform
    Unsupported,
    Cancelled,
}

impl ErrorKind {
    /// Transient kinds are retried with backoff
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ErrorKind::NetworkTimeout
                | ErrorKind::RateLimited
                | ErrorKind::ProxyUnreachable
                | ErrorKind::MalformedResponse
        )
    }

    /// Terminal kinds short-circuit retries
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ErrorKind::AuthRequired | ErrorKind::TargetNotFound | ErrorKind::Unsupported
        )
    }

    /// Whether the failure points at the egress path rather than the platform
    pub fn blames_proxy(&self) -> bool {
        matches!(self, ErrorKind::NetworkTimeout | ErrorKind::ProxyUnreachable)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NetworkTimeout => "network_timeout",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::ProxyUnreachable => "proxy_unreachable",
            ErrorKind::MalformedResponse => "malformed_response",
            ErrorKind::AuthRequired => "auth_required",
            ErrorKind::TargetNotFound => "target_not_found",
            ErrorKind::Unsupported => "unsupported",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ErrorKind {
    type Err = OsintError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "network_timeout" => Ok(ErrorKind::NetworkTimeout),
            "rate_limited" => Ok(ErrorKind::RateLimited),
            "proxy_unreachable" => Ok(ErrorKind::ProxyUnreachable),
            "malformed_response" => Ok(ErrorKind::MalformedResponse),
            "auth_required" => Ok(ErrorKind::AuthRequired),
            "target_not_found" => Ok(ErrorKind::TargetNotFound),
            "unsupported" => Ok(ErrorKind::Unsupported),
            "cancelled" => Ok(ErrorKind::Cancelled),
            other => Err(OsintError::InvalidInput(format!(
                "Unknown error kind: {}",
                other
            ))),
        }
    }
}
