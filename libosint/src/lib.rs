//! libosint - scheduled collection of public social media profiles
//!
//! This library provides the collection pipeline behind the `osint-*` tools:
//! per-platform rate limiting, a health-checked proxy pool, pluggable fetchers,
//! retrying collection jobs and a persisted task scheduler.

pub mod cancel;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod fetchers;
pub mod job;
pub mod logging;
pub mod pipeline;
pub mod proxy;
pub mod rate_limiter;
pub mod scheduler;
pub mod scheduling;
pub mod service;
pub mod sink;
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use db::Database;
pub use error::{ErrorKind, OsintError, Result};
pub use events::{Event, EventBus, ResultSummary};
pub use fetchers::{Fetcher, FetcherRegistry};
pub use job::{CollectionJob, JobOutcome, JobState};
pub use pipeline::Pipeline;
pub use proxy::{ProxyEndpoint, ProxyHealth, ProxyKind, ProxyPool};
pub use rate_limiter::{RateLimit, RateLimiter};
pub use scheduler::{NewTask, ScheduledTask, Scheduler, TaskRun};
pub use scheduling::ScheduleType;
pub use service::OsintService;
pub use types::{FetchRequest, FetchResult, Platform, ProxyPreference, Target};
