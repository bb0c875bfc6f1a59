//! Service facade
//!
//! `OsintService` wires the database, result sinks, pipeline and scheduler
//! together from a [`Config`] and is what the binaries talk to. Everything it
//! does is also reachable through the individual components.
//!
//! # Example
//!
//! ```no_run
//! use libosint::service::OsintService;
//! use libosint::types::ProxyPreference;
//!
//! # async fn example() -> libosint::error::Result<()> {
//! let service = OsintService::new().await?;
//!
//! let outcome = service
//!     .fetch_now("demo:alice".parse()?, None, ProxyPreference::None)
//!     .await?;
//! println!("{} items", outcome.result.item_count());
//!
//! service.shutdown().await;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::cancel::CancelHandle;
use crate::config::{resolve_db_path, Config};
use crate::db::Database;
use crate::error::Result;
use crate::events::{EventBus, EventReceiver};
use crate::fetchers::Fetcher;
use crate::job::JobOutcome;
use crate::pipeline::Pipeline;
use crate::proxy::{ProxyEndpoint, ProxyHealth};
use crate::rate_limiter::RateLimitStatus;
use crate::scheduler::{Scheduler, SchedulerHandle};
use crate::sink::{BackgroundSink, DatabaseSink, FanoutSink, JsonDirSink, ResultSink};
use crate::types::{FetchRequest, FetchResult, ProxyPreference, Target};

/// Queued results between the pipeline and the storage worker
const SINK_QUEUE_CAPACITY: usize = 256;

pub struct OsintService {
    config: Arc<Config>,
    db: Database,
    pipeline: Pipeline,
    scheduler: Scheduler,
    sink: Arc<BackgroundSink>,
    shutdown: CancelHandle,
}

/// Background work started by [`OsintService::start`]
pub struct ServiceHandle {
    scheduler: SchedulerHandle,
    health: Option<JoinHandle<()>>,
}

impl ServiceHandle {
    /// Stop the scheduler driver and the proxy health loop
    pub async fn stop(self, service: &OsintService) {
        service.shutdown.cancel();
        self.scheduler.stop().await;
        if let Some(health) = self.health {
            if let Err(e) = health.await {
                error!(error = %e, "proxy health loop panicked");
            }
        }
    }
}

impl OsintService {
    /// Load configuration from the default location and open the database
    pub async fn new() -> Result<Self> {
        let config = Config::load()?;
        Self::from_config(config).await
    }

    pub async fn from_config(config: Config) -> Result<Self> {
        Self::with_fetchers(config, Vec::new()).await
    }

    /// Like [`OsintService::from_config`], registering extra fetchers
    ///
    /// A fetcher for a platform that also appears in
    /// `collection.synthetic_platforms` replaces the synthetic one.
    pub async fn with_fetchers(config: Config, fetchers: Vec<Arc<dyn Fetcher>>) -> Result<Self> {
        let db_path = resolve_db_path(&config.database.path);
        let db = Database::new(&db_path).await?;

        let mut sinks: Vec<Arc<dyn ResultSink>> = vec![Arc::new(DatabaseSink::new(db.clone()))];
        if let Some(dir) = &config.output.json_dir {
            sinks.push(Arc::new(JsonDirSink::new(dir)));
        }
        let inner: Arc<dyn ResultSink> = if sinks.len() == 1 {
            sinks.remove(0)
        } else {
            Arc::new(FanoutSink::new(sinks))
        };
        let sink = Arc::new(BackgroundSink::spawn(inner, SINK_QUEUE_CAPACITY));

        let events = EventBus::default();
        let mut pipeline = Pipeline::from_config(&config, sink.clone(), events);
        for fetcher in fetchers {
            pipeline.register_fetcher(fetcher);
        }

        let scheduler = Scheduler::new(db.clone(), pipeline.clone());
        scheduler.init().await?;

        info!(
            db = %db_path,
            platforms = ?pipeline.fetchers().platforms(),
            workers = pipeline.worker_count(),
            "service ready"
        );

        Ok(Self {
            config: Arc::new(config),
            db,
            pipeline,
            scheduler,
            sink,
            shutdown: CancelHandle::new(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn events(&self) -> &EventBus {
        self.pipeline.events()
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.pipeline.events().subscribe()
    }

    /// Collect one target immediately
    ///
    /// `max_items` defaults to `collection.default_max_items`.
    pub async fn fetch_now(
        &self,
        target: Target,
        max_items: Option<usize>,
        proxy: ProxyPreference,
    ) -> Result<JobOutcome> {
        let max_items = max_items.unwrap_or_else(|| self.pipeline.default_max_items());
        let request = FetchRequest::new(target, max_items)?.with_proxy(proxy);
        self.pipeline
            .fetch_now(request, &self.shutdown.signal())
            .await
    }

    /// Most recent stored results, newest first
    pub async fn recent_results(
        &self,
        target: Option<&Target>,
        limit: usize,
    ) -> Result<Vec<FetchResult>> {
        self.db.recent_results(target, limit).await
    }

    /// Snapshot of every proxy endpoint
    pub fn proxy_status(&self) -> Vec<ProxyEndpoint> {
        self.pipeline
            .proxies()
            .map(|pool| pool.status())
            .unwrap_or_default()
    }

    /// Probe every endpoint now
    pub async fn probe_proxies(&self) -> Vec<(String, ProxyHealth)> {
        match self.pipeline.proxies() {
            Some(pool) => pool.probe_all().await,
            None => Vec::new(),
        }
    }

    pub fn rate_limit_status(&self) -> Vec<RateLimitStatus> {
        self.pipeline.limiter().status()
    }

    /// Start the scheduler driver and, if proxies are enabled, the health loop
    pub fn start(&self) -> ServiceHandle {
        let health = self.pipeline.proxies().filter(|pool| pool.is_enabled()).map(|pool| {
            pool.spawn_health_loop(
                Duration::from_secs(self.config.proxy.probe_interval),
                self.shutdown.signal(),
            )
        });

        ServiceHandle {
            scheduler: self.scheduler.start(self.config.tick_interval()),
            health,
        }
    }

    /// Cancel in-flight work and flush queued results to storage
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.scheduler.shutdown();
        self.sink.close().await;
        info!("service stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobState;
    use crate::types::Platform;
    use tempfile::TempDir;

    fn config(dir: &TempDir, json: bool) -> Config {
        let mut config = Config::default_config();
        config.database.path = dir.path().join("osint.db").to_string_lossy().to_string();
        if json {
            config.output.json_dir = Some(dir.path().join("data").to_string_lossy().to_string());
        }
        config
    }

    #[tokio::test]
    async fn test_fetch_now_stores_result() {
        let dir = TempDir::new().unwrap();
        let service = OsintService::from_config(config(&dir, true)).await.unwrap();

        let outcome = service
            .fetch_now("demo:alice".parse().unwrap(), Some(3), ProxyPreference::None)
            .await
            .unwrap();
        assert_eq!(outcome.state, JobState::Succeeded);
        assert_eq!(outcome.result.item_count(), 3);

        service.shutdown().await;

        let stored = service.recent_results(None, 10).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].target.username(), "alice");
        assert!(dir
            .path()
            .join("data")
            .join("demo")
            .join("alice")
            .join("latest.json")
            .exists());
    }

    #[tokio::test]
    async fn test_fetch_now_unknown_platform() {
        let dir = TempDir::new().unwrap();
        let service = OsintService::from_config(config(&dir, false)).await.unwrap();

        let err = service
            .fetch_now(
                Target::new(Platform::Instagram, "alice").unwrap(),
                None,
                ProxyPreference::None,
            )
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }

    #[tokio::test]
    async fn test_fetch_now_rejects_zero_items() {
        let dir = TempDir::new().unwrap();
        let service = OsintService::from_config(config(&dir, false)).await.unwrap();

        assert!(service
            .fetch_now("demo:alice".parse().unwrap(), Some(0), ProxyPreference::None)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_status_without_proxies() {
        let dir = TempDir::new().unwrap();
        let service = OsintService::from_config(config(&dir, false)).await.unwrap();

        assert!(service.proxy_status().is_empty());
        assert!(service.probe_proxies().await.is_empty());
        assert!(service.rate_limit_status().is_empty());
    }

    async fn next_stored(receiver: &mut EventReceiver) -> Option<crate::events::ResultSummary> {
        use crate::events::Event;

        let wait = async {
            loop {
                match receiver.recv().await {
                    Ok(Event::ResultStored(summary)) => return Some(summary),
                    Ok(_) => {}
                    Err(_) => return None,
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(5), wait)
            .await
            .ok()
            .flatten()
    }

    #[tokio::test]
    async fn test_result_stored_fires_after_row_exists() {
        let dir = TempDir::new().unwrap();
        let service = OsintService::from_config(config(&dir, false)).await.unwrap();
        let mut receiver = service.subscribe();

        service
            .fetch_now("demo:alice".parse().unwrap(), Some(2), ProxyPreference::None)
            .await
            .unwrap();

        let summary = next_stored(&mut receiver).await.unwrap();
        assert_eq!(summary.item_count, 2);
        assert_eq!(service.recent_results(None, 10).await.unwrap().len(), 1);

        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_no_result_stored_when_storage_fails() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let mut config = config(&dir, false);
        config.output.json_dir = Some(blocker.join("data").to_string_lossy().to_string());
        let service = OsintService::from_config(config).await.unwrap();
        let mut receiver = service.subscribe();

        let outcome = service
            .fetch_now("demo:alice".parse().unwrap(), Some(2), ProxyPreference::None)
            .await
            .unwrap();
        assert_eq!(outcome.state, JobState::Succeeded);
        service.shutdown().await;

        let mut stored = 0;
        while let Ok(event) = receiver.try_recv() {
            if matches!(event, crate::events::Event::ResultStored(_)) {
                stored += 1;
            }
        }
        assert_eq!(stored, 0);
    }
}
