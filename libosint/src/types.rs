//! Core types for the collection pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

use crate::error::{ErrorKind, OsintError, Result};

/// Social platform a target lives on
///
/// The set is open: anything that is not a well-known platform is carried
/// as `Other` with its lowercase name, so new fetchers can be registered
/// without touching this enum.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Platform {
    Instagram,
    Twitter,
    TikTok,
    YouTube,
    LinkedIn,
    Other(String),
}

impl Platform {
    pub fn as_str(&self) -> &str {
        match self {
            Platform::Instagram => "instagram",
            Platform::Twitter => "twitter",
            Platform::TikTok => "tiktok",
            Platform::YouTube => "youtube",
            Platform::LinkedIn => "linkedin",
            Platform::Other(name) => name,
        }
    }
}

impl FromStr for Platform {
    type Err = OsintError;

    fn from_str(s: &str) -> Result<Self> {
        let name = s.trim().to_lowercase();
        if name.is_empty() {
            return Err(OsintError::InvalidInput(
                "Platform name cannot be empty".to_string(),
            ));
        }
        if name.contains(|c: char| c.is_whitespace() || c == ':' || c == '/') {
            return Err(OsintError::InvalidInput(format!(
                "Invalid platform name: '{}'",
                s
            )));
        }

        Ok(match name.as_str() {
            "instagram" => Platform::Instagram,
            "twitter" | "x" => Platform::Twitter,
            "tiktok" => Platform::TikTok,
            "youtube" => Platform::YouTube,
            "linkedin" => Platform::LinkedIn,
            _ => Platform::Other(name),
        })
    }
}

impl TryFrom<String> for Platform {
    type Error = OsintError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Platform> for String {
    fn from(platform: Platform) -> Self {
        platform.as_str().to_string()
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A (platform, username) pair identifying a collection subject
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Target {
    platform: Platform,
    username: String,
}

impl Target {
    /// Create a target, normalizing the username
    ///
    /// Surrounding whitespace and a single leading `@` are stripped.
    ///
    /// # Errors
    ///
    /// Returns `OsintError::InvalidInput` if the username is empty after
    /// normalization or contains whitespace.
    pub fn new(platform: Platform, username: impl AsRef<str>) -> Result<Self> {
        let trimmed = username.as_ref().trim();
        let username = trimmed.strip_prefix('@').unwrap_or(trimmed);

        if username.is_empty() {
            return Err(OsintError::InvalidInput(
                "Username cannot be empty".to_string(),
            ));
        }
        if username.contains(char::is_whitespace) {
            return Err(OsintError::InvalidInput(format!(
                "Username cannot contain whitespace: '{}'",
                username
            )));
        }

        Ok(Self {
            platform,
            username: username.to_string(),
        })
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    pub fn username(&self) -> &str {
        &self.username
    }
}

/// Parses `platform:username`
impl FromStr for Target {
    type Err = OsintError;

    fn from_str(s: &str) -> Result<Self> {
        let (platform, username) = s.split_once(':').ok_or_else(|| {
            OsintError::InvalidInput(format!(
                "Target must look like 'platform:username', got '{}'",
                s
            ))
        })?;
        Target::new(platform.parse()?, username)
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.platform, self.username)
    }
}

/// Which egress path a fetch should use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyPreference {
    /// Direct connection for jobs; "any kind" when asked of the proxy pool
    #[default]
    None,
    Http,
    Socks5,
    Tor,
}

impl ProxyPreference {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyPreference::None => "none",
            ProxyPreference::Http => "http",
            ProxyPreference::Socks5 => "socks5",
            ProxyPreference::Tor => "tor",
        }
    }
}

impl FromStr for ProxyPreference {
    type Err = OsintError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "none" | "direct" | "" => Ok(ProxyPreference::None),
            "http" => Ok(ProxyPreference::Http),
            "socks5" | "socks" => Ok(ProxyPreference::Socks5),
            "tor" => Ok(ProxyPreference::Tor),
            other => Err(OsintError::InvalidInput(format!(
                "Invalid proxy preference: '{}'. Valid options: none, http, socks5, tor",
                other
            ))),
        }
    }
}

impl std::fmt::Display for ProxyPreference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One request to collect records for a target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchRequest {
    pub target: Target,
    pub max_items: usize,
    pub proxy_preference: ProxyPreference,
    pub issued_at: DateTime<Utc>,
}

impl FetchRequest {
    pub fn new(target: Target, max_items: usize) -> Result<Self> {
        if max_items == 0 {
            return Err(OsintError::InvalidInput(
                "max_items must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            target,
            max_items,
            proxy_preference: ProxyPreference::None,
            issued_at: Utc::now(),
        })
    }

    pub fn with_proxy(mut self, preference: ProxyPreference) -> Self {
        self.proxy_preference = preference;
        self
    }
}

/// Normalized output of one fetch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchResult {
    pub target: Target,
    pub items: Vec<Value>,
    pub fetched_at: DateTime<Utc>,
    pub success: bool,
    pub error: Option<ErrorKind>,
    pub message: Option<String>,
}

impl FetchResult {
    /// A complete snapshot; zero items means the profile is empty
    pub fn ok(target: Target, items: Vec<Value>) -> Self {
        Self {
            target,
            items,
            fetched_at: Utc::now(),
            success: true,
            error: None,
            message: None,
        }
    }

    pub fn failed(target: Target, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::partial(target, Vec::new(), kind, message)
    }

    /// Whatever was collected before `kind` interrupted the fetch
    pub fn partial(
        target: Target,
        items: Vec<Value>,
        kind: ErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            target,
            items,
            fetched_at: Utc::now(),
            success: false,
            error: Some(kind),
            message: Some(message.into()),
        }
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    /// Drop items past `max_items`, keeping order
    pub fn truncate(&mut self, max_items: usize) {
        self.items.truncate(max_items);
    }
}
