//! Scriptable fetcher for tests
//!
//! Each call consumes the next [`MockResponse`] from the script; the last
//! response repeats once the script is exhausted. Call counts and the proxies
//! seen on each call are recorded for assertions.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ErrorKind;
use crate::fetchers::Fetcher;
use crate::proxy::ProxyEndpoint;
use crate::types::{FetchResult, Platform, Target};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockResponse {
    /// Succeed with this many items (capped at `max_items`)
    Items(usize),
    Fail(ErrorKind),
    /// Return this many items, then fail with the kind
    Partial(usize, ErrorKind),
}

pub struct MockFetcher {
    platform: Platform,
    script: Vec<MockResponse>,
    delay: Duration,
    calls: Arc<Mutex<usize>>,
    proxies_seen: Arc<Mutex<Vec<Option<String>>>>,
}

impl MockFetcher {
    pub fn new(platform: Platform, script: Vec<MockResponse>) -> Self {
        Self {
            platform,
            script,
            delay: Duration::ZERO,
            calls: Arc::new(Mutex::new(0)),
            proxies_seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn succeeding(platform: Platform, items: usize) -> Self {
        Self::new(platform, vec![MockResponse::Items(items)])
    }

    pub fn failing(platform: Platform, kind: ErrorKind) -> Self {
        Self::new(platform, vec![MockResponse::Fail(kind)])
    }

    /// Sleep before answering each call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Shared call counter, readable after the fetcher is moved into a registry
    pub fn call_counter(&self) -> Arc<Mutex<usize>> {
        Arc::clone(&self.calls)
    }

    /// Proxy ids seen per call (`None` for direct)
    pub fn proxy_log(&self) -> Arc<Mutex<Vec<Option<String>>>> {
        Arc::clone(&self.proxies_seen)
    }

    pub fn call_count(&self) -> usize {
        *self.calls.lock()
    }

    fn items(target: &Target, count: usize) -> Vec<serde_json::Value> {
        (0..count)
            .map(|i| json!({ "id": format!("{}-{}", target.username(), i), "n": i }))
            .collect()
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    fn platform(&self) -> Platform {
        self.platform.clone()
    }

    async fn fetch(
        &self,
        target: &Target,
        max_items: usize,
        proxy: Option<&ProxyEndpoint>,
    ) -> FetchResult {
        let call = {
            let mut calls = self.calls.lock();
            *calls += 1;
            *calls
        };
        self.proxies_seen
            .lock()
            .push(proxy.map(|endpoint| endpoint.id.clone()));

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let response = self
            .script
            .get(call - 1)
            .or_else(|| self.script.last())
            .copied()
            .unwrap_or(MockResponse::Items(0));

        match response {
            MockResponse::Items(n) => FetchResult::ok(target.clone(), Self::items(target, n.min(max_items))),
            MockResponse::Fail(kind) => {
                FetchResult::failed(target.clone(), kind, format!("scripted {}", kind))
            }
            MockResponse::Partial(n, kind) => FetchResult::partial(
                target.clone(),
                Self::items(target, n.min(max_items)),
                kind,
                format!("scripted {} after {} items", kind, n),
            ),
        }
    }
}
