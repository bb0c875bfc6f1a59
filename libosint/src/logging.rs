//! Logging setup for osint-daemon and the osint-* CLIs
//!
//! Output goes to stderr so stdout stays clean for fetch results and task
//! listings.
//! `OSINT_LOG_FORMAT` selects `text`, `json` or `pretty`; `OSINT_LOG_LEVEL`
//! (or `RUST_LOG`) selects the filter.
//!
//! ```no_run
//! use libosint::logging::{LogFormat, LoggingConfig};
//!
//! LoggingConfig::new(LogFormat::Json, "info".to_string(), false).init();
//! ```

use std::str::FromStr;
use tracing_subscriber::EnvFilter;

/// How log lines are rendered on stderr
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Plain lines; the default for the CLIs and an interactive daemon
    Text,
    /// Flattened JSON events, for a daemon whose stderr feeds a log collector
    Json,
    /// Multi-line with source locations, for debugging a collection run
    Pretty,
}

impl LogFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogFormat::Text => "text",
            LogFormat::Json => "json",
            LogFormat::Pretty => "pretty",
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [LogFormat::Text, LogFormat::Json, LogFormat::Pretty]
            .into_iter()
            .find(|format| format.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                format!(
                    "Invalid log format: '{}'. OSINT_LOG_FORMAT accepts text, json or pretty",
                    s
                )
            })
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct LoggingConfig {
    pub format: LogFormat,
    pub level: String,
    pub verbose: bool,
}

impl LoggingConfig {
    /// `verbose` forces `debug` unless `RUST_LOG` says otherwise
    pub fn new(format: LogFormat, level: String, verbose: bool) -> Self {
        Self {
            format,
            level,
            verbose,
        }
    }

    /// Settings from `OSINT_LOG_FORMAT` / `OSINT_LOG_LEVEL`, text + `default_level` otherwise
    pub fn from_env(default_level: &str, verbose: bool) -> Self {
        let format = std::env::var("OSINT_LOG_FORMAT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(LogFormat::Text);
        let level = std::env::var("OSINT_LOG_LEVEL").unwrap_or_else(|_| default_level.to_string());
        Self::new(format, level, verbose)
    }

    fn filter(&self) -> EnvFilter {
        let level = if self.verbose { "debug" } else { &self.level };
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    }

    /// Install the global subscriber
    ///
    /// A second call is a no-op; the first subscriber stays in place.
    pub fn init(&self) {
        let filter = self.filter();

        let installed = match self.format {
            LogFormat::Json => tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_current_span(true)
                .flatten_event(true)
                .with_target(true)
                .try_init(),
            LogFormat::Pretty => tracing_subscriber::fmt()
                .pretty()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_line_number(true)
                .try_init(),
            LogFormat::Text => tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .try_init(),
        };

        if installed.is_err() {
            tracing::debug!("logging already initialized");
        }
    }
}

/// Logging for the short-lived CLIs: warnings only, debug with `--verbose`
pub fn init_cli(verbose: bool) {
    LoggingConfig::from_env("warn", verbose).init();
}
