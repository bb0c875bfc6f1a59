//! Platform fetchers
//!
//! A [`Fetcher`] knows how to collect raw records for a target on one
//! platform. Implementations never fail with an error: every problem is
//! reported on the returned [`FetchResult`] as an [`ErrorKind`], along with
//! whatever items were collected before it happened.
//!
//! Fetchers are registered in a [`FetcherRegistry`] at startup. Collection
//! jobs and the scheduler only ever look fetchers up by platform, so adding a
//! platform is a matter of registering a new implementation.
//!
//! ```no_run
//! use libosint::fetchers::{demo::DemoFetcher, FetcherRegistry};
//! use libosint::types::{Platform, Target};
//!
//! # async fn example() -> libosint::error::Result<()> {
//! let mut registry = FetcherRegistry::new();
//! registry.register(DemoFetcher::new(Platform::Other("demo".to_string())));
//!
//! let target: Target = "demo:alice".parse()?;
//! if let Some(fetcher) = registry.get(target.platform()) {
//!     let result = fetcher.fetch(&target, 10, None).await;
//!     println!("{} items", result.item_count());
//! }
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::proxy::ProxyEndpoint;
use crate::types::{FetchResult, Platform, Target};

pub mod demo;

// Not behind cfg(test): libosint/tests/ scripts fetch outcomes with it.
pub mod mock;

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Platform this fetcher serves
    fn platform(&self) -> Platform;

    /// Collect up to `max_items` records for `target`
    ///
    /// Implementations must:
    /// - return at most `max_items` items, in platform order
    /// - set `success = false` and an error kind on failure, keeping any
    ///   items already collected
    /// - be idempotent: two calls return snapshots of the same profile
    ///
    /// `proxy` is the egress endpoint chosen for this attempt, or `None` for a
    /// direct connection.
    async fn fetch(
        &self,
        target: &Target,
        max_items: usize,
        proxy: Option<&ProxyEndpoint>,
    ) -> FetchResult;
}

/// Platform → fetcher lookup
#[derive(Clone, Default)]
pub struct FetcherRegistry {
    fetchers: HashMap<Platform, Arc<dyn Fetcher>>,
}

impl FetcherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `fetcher` for its platform, replacing any previous one
    pub fn register<F: Fetcher + 'static>(&mut self, fetcher: F) {
        self.register_arc(Arc::new(fetcher));
    }

    pub fn register_arc(&mut self, fetcher: Arc<dyn Fetcher>) {
        self.fetchers.insert(fetcher.platform(), fetcher);
    }

    pub fn get(&self, platform: &Platform) -> Option<Arc<dyn Fetcher>> {
        self.fetchers.get(platform).cloned()
    }

    pub fn supports(&self, platform: &Platform) -> bool {
        self.fetchers.contains_key(platform)
    }

    /// Registered platforms, sorted
    pub fn platforms(&self) -> Vec<Platform> {
        let mut platforms: Vec<Platform> = self.fetchers.keys().cloned().collect();
        platforms.sort();
        platforms
    }
}
