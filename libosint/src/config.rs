//! Configuration management
//!
//! All tunables are read once at startup from a TOML file. Every section has
//! defaults so a config containing only `[database]` is valid.
//!
//! ```toml
//! [database]
//! path = "~/.local/share/osint/osint.db"
//!
//! [collection]
//! max_attempts = 3
//! workers = 5
//!
//! [rate_limits.instagram]
//! max_requests = 30
//! window_secs = 60
//!
//! [proxy]
//! enabled = true
//!
//! [[proxy.endpoints]]
//! kind = "http"
//! host = "10.0.0.2"
//! port = 3128
//!
//! [proxy.tor]
//! port = 9050
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, OsintError, Result};
use crate::proxy::ProxyKind;
use crate::rate_limiter::RateLimit;
use crate::types::Platform;

/// Key under `[rate_limits]` that applies to unconfigured platforms
pub const DEFAULT_RATE_LIMIT_KEY: &str = "default";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub collection: CollectionConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub rate_limits: HashMap<String, RateLimitConfig>,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionConfig {
    /// Attempts per job, including the first one
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Size of the global worker pool shared by all jobs
    pub workers: usize,
    pub default_max_items: usize,
    /// Platforms served by the synthetic demo fetcher
    pub synthetic_platforms: Vec<String>,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff_ms: 1000,
            max_backoff_ms: 30_000,
            workers: 5,
            default_max_items: 20,
            synthetic_platforms: vec!["demo".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Seconds between due-task evaluations
    pub tick_interval: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { tick_interval: 60 }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub enabled: bool,
    /// Consecutive failures before an endpoint is marked unreachable
    pub failure_threshold: u32,
    pub probe_interval: u64,
    pub probe_timeout: u64,
    /// Seconds after being marked unreachable before the endpoint is re-probed
    pub reprobe_delay: u64,
    pub endpoints: Vec<ProxyEndpointConfig>,
    pub tor: Option<TorConfig>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            failure_threshold: 3,
            probe_interval: 300,
            probe_timeout: 5,
            reprobe_delay: 60,
            endpoints: Vec::new(),
            tor: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyEndpointConfig {
    pub kind: ProxyKind,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TorConfig {
    pub host: String,
    pub port: u16,
}

impl Default for TorConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9050,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Also write each result as JSON under `<dir>/<platform>/<username>/`
    pub json_dir: Option<String>,
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration text
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(ConfigError::ParseError)?;
        config.validate()?;
        Ok(config)
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            database: DatabaseConfig {
                path: "~/.local/share/osint/osint.db".to_string(),
            },
            collection: CollectionConfig::default(),
            scheduler: SchedulerConfig::default(),
            rate_limits: HashMap::new(),
            proxy: ProxyConfig::default(),
            output: OutputConfig::default(),
        }
    }

    /// Reject values that would stall or disable the pipeline
    pub fn validate(&self) -> Result<()> {
        if self.database.path.trim().is_empty() {
            return Err(ConfigError::MissingField("database.path".to_string()).into());
        }

        let positive = |field: &str, value: u64| -> Result<()> {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    reason: "must be greater than zero".to_string(),
                }
                .into());
            }
            Ok(())
        };

        positive("collection.max_attempts", u64::from(self.collection.max_attempts))?;
        positive("collection.workers", self.collection.workers as u64)?;
        positive("collection.default_max_items", self.collection.default_max_items as u64)?;
        positive("scheduler.tick_interval", self.scheduler.tick_interval)?;
        positive("proxy.failure_threshold", u64::from(self.proxy.failure_threshold))?;
        positive("proxy.probe_interval", self.proxy.probe_interval)?;
        positive("proxy.probe_timeout", self.proxy.probe_timeout)?;

        if self.collection.max_backoff_ms < self.collection.base_backoff_ms {
            return Err(ConfigError::InvalidValue {
                field: "collection.max_backoff_ms".to_string(),
                reason: "must not be smaller than base_backoff_ms".to_string(),
            }
            .into());
        }

        for (name, limit) in &self.rate_limits {
            positive(&format!("rate_limits.{}.max_requests", name), u64::from(limit.max_requests))?;
            positive(&format!("rate_limits.{}.window_secs", name), limit.window_secs)?;
            if name != DEFAULT_RATE_LIMIT_KEY {
                name.parse::<Platform>().map_err(|e| ConfigError::InvalidValue {
                    field: format!("rate_limits.{}", name),
                    reason: e.to_string(),
                })?;
            }
        }

        for name in &self.collection.synthetic_platforms {
            name.parse::<Platform>().map_err(|e| ConfigError::InvalidValue {
                field: "collection.synthetic_platforms".to_string(),
                reason: e.to_string(),
            })?;
        }

        Ok(())
    }

    /// Per-platform limits, excluding the default entry
    ///
    /// Entries that `validate` would reject are skipped.
    pub fn platform_rate_limits(&self) -> HashMap<Platform, RateLimit> {
        self.rate_limits
            .iter()
            .filter(|(name, _)| name.as_str() != DEFAULT_RATE_LIMIT_KEY)
            .filter_map(|(name, limit)| {
                Some((name.parse().ok()?, RateLimit::try_from(*limit).ok()?))
            })
            .collect()
    }

    /// Limit applied to platforms without their own entry
    pub fn default_rate_limit(&self) -> Option<RateLimit> {
        self.rate_limits
            .get(DEFAULT_RATE_LIMIT_KEY)
            .and_then(|limit| RateLimit::try_from(*limit).ok())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler.tick_interval)
    }
}

impl TryFrom<RateLimitConfig> for RateLimit {
    type Error = OsintError;

    fn try_from(config: RateLimitConfig) -> Result<Self> {
        RateLimit::new(config.max_requests, Duration::from_secs(config.window_secs))
    }
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("OSINT_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("osint").join("config.toml"))
}

/// Resolve the database path, honouring `OSINT_DB_PATH`
pub fn resolve_db_path(configured: &str) -> String {
    match std::env::var("OSINT_DB_PATH") {
        Ok(path) if !path.trim().is_empty() => path,
        _ => configured.to_string(),
    }
}
