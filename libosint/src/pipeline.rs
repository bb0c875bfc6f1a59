//! Collection pipeline
//!
//! Owns the shared collaborators of every job (rate limiter, proxy pool,
//! fetcher registry, sink, event bus) and the global worker pool that bounds
//! how many jobs fetch at once. Both the scheduler and one-off CLI fetches go
//! through [`Pipeline::execute`].

use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::cancel::CancelSignal;
use crate::config::Config;
use crate::error::{OsintError, Result};
use crate::events::EventBus;
use crate::fetchers::demo::DemoFetcher;
use crate::fetchers::{Fetcher, FetcherRegistry};
use crate::job::{CollectionJob, JobContext, JobOutcome, RetryPolicy};
use crate::proxy::ProxyPool;
use crate::rate_limiter::RateLimiter;
use crate::sink::ResultSink;
use crate::types::{FetchRequest, Platform};

#[derive(Clone)]
pub struct Pipeline {
    ctx: JobContext,
    workers: Arc<Semaphore>,
    worker_count: usize,
    default_max_items: usize,
}

impl Pipeline {
    pub fn new(ctx: JobContext, workers: usize, default_max_items: usize) -> Self {
        let workers = workers.max(1);
        Self {
            ctx,
            workers: Arc::new(Semaphore::new(workers)),
            worker_count: workers,
            default_max_items: default_max_items.max(1),
        }
    }

    /// Wire up limiter, proxies and synthetic fetchers from configuration
    pub fn from_config(config: &Config, sink: Arc<dyn ResultSink>, events: EventBus) -> Self {
        let limiter = RateLimiter::new(config.platform_rate_limits(), config.default_rate_limit());
        let proxies = ProxyPool::from_config(&config.proxy).with_events(events.clone());

        let mut fetchers = FetcherRegistry::new();
        for name in &config.collection.synthetic_platforms {
            match name.parse::<Platform>() {
                Ok(platform) => fetchers.register(DemoFetcher::new(platform)),
                Err(e) => debug!(platform = %name, error = %e, "skipping synthetic platform"),
            }
        }

        let ctx = JobContext {
            limiter: Arc::new(limiter),
            proxies: Some(proxies),
            fetchers,
            sink,
            events,
            retry: RetryPolicy::from_config(&config.collection),
        };
        Self::new(
            ctx,
            config.collection.workers,
            config.collection.default_max_items,
        )
    }

    /// Add or replace a fetcher; call before the pipeline is cloned into workers
    pub fn register_fetcher(&mut self, fetcher: Arc<dyn Fetcher>) {
        self.ctx.fetchers.register_arc(fetcher);
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.ctx.limiter
    }

    pub fn proxies(&self) -> Option<&ProxyPool> {
        self.ctx.proxies.as_ref()
    }

    pub fn fetchers(&self) -> &FetcherRegistry {
        &self.ctx.fetchers
    }

    pub fn events(&self) -> &EventBus {
        &self.ctx.events
    }

    pub fn default_max_items(&self) -> usize {
        self.default_max_items
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Run one job on the worker pool
    ///
    /// A job cancelled while waiting for a worker still reports (and stores)
    /// a `Cancelled` outcome.
    pub async fn execute(&self, request: FetchRequest, cancel: &CancelSignal) -> JobOutcome {
        let _worker = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            permit = Arc::clone(&self.workers).acquire_owned() => permit.ok(),
        };
        CollectionJob::new(request).run(&self.ctx, cancel).await
    }

    /// Run several jobs concurrently, bounded by the worker pool
    pub async fn execute_all(
        &self,
        requests: Vec<FetchRequest>,
        cancel: &CancelSignal,
    ) -> Vec<JobOutcome> {
        join_all(requests.into_iter().map(|request| self.execute(request, cancel))).await
    }

    /// Fetch one target now, rejecting platforms without a fetcher up front
    pub async fn fetch_now(&self, request: FetchRequest, cancel: &CancelSignal) -> Result<JobOutcome> {
        let platform = request.target.platform();
        if !self.ctx.fetchers.supports(platform) {
            return Err(OsintError::InvalidInput(format!(
                "No fetcher registered for platform '{}'",
                platform
            )));
        }
        Ok(self.execute(request, cancel).await)
    }
}
