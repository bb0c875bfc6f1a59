//! Rotating egress proxies
//!
//! The pool hands out endpoints round-robin per kind, skipping any endpoint
//! marked unreachable. Failures reported by jobs accumulate per endpoint;
//! after `failure_threshold` consecutive failures the endpoint is marked
//! unreachable and a delayed re-probe is scheduled. Only a successful probe
//! brings it back.
//!
//! Per-endpoint state is read-modify-written under a short lock. Probes run
//! without any lock held.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cancel::CancelSignal;
use crate::config::ProxyConfig;
use crate::error::{OsintError, Result};
use crate::events::{Event, EventBus};
use crate::types::ProxyPreference;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyKind {
    Http,
    Socks5,
    Tor,
}

impl ProxyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyKind::Http => "http",
            ProxyKind::Socks5 => "socks5",
            ProxyKind::Tor => "tor",
        }
    }

    /// `ProxyPreference::None` accepts every kind
    pub fn satisfies(&self, preference: ProxyPreference) -> bool {
        match preference {
            ProxyPreference::None => true,
            ProxyPreference::Http => *self == ProxyKind::Http,
            ProxyPreference::Socks5 => *self == ProxyKind::Socks5,
            ProxyPreference::Tor => *self == ProxyKind::Tor,
        }
    }
}

impl std::fmt::Display for ProxyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyHealth {
    Unknown,
    Healthy,
    Unreachable,
}

impl std::fmt::Display for ProxyHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ProxyHealth::Unknown => "unknown",
            ProxyHealth::Healthy => "healthy",
            ProxyHealth::Unreachable => "unreachable",
        })
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProxyEndpoint {
    pub id: String,
    pub kind: ProxyKind,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    #[serde(skip)]
    pub password: Option<String>,
    pub health: ProxyHealth,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
}

impl std::fmt::Debug for ProxyEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyEndpoint")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("health", &self.health)
            .field("last_checked_at", &self.last_checked_at)
            .field("consecutive_failures", &self.consecutive_failures)
            .finish()
    }
}

impl ProxyEndpoint {
    pub fn new(kind: ProxyKind, host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        Self {
            id: format!("{}://{}:{}", kind, host, port),
            kind,
            host,
            port,
            username: None,
            password: None,
            health: ProxyHealth::Unknown,
            last_checked_at: None,
            consecutive_failures: 0,
        }
    }

    pub fn with_credentials(mut self, username: Option<String>, password: Option<String>) -> Self {
        self.username = username;
        self.password = password;
        self
    }

    /// Proxy URL for an HTTP client
    ///
    /// Tor uses `socks5h` so hostnames resolve on the far side.
    pub fn url(&self) -> String {
        let scheme = match self.kind {
            ProxyKind::Http => "http",
            ProxyKind::Socks5 => "socks5",
            ProxyKind::Tor => "socks5h",
        };
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) => {
                format!("{}://{}:{}@{}:{}", scheme, user, pass, self.host, self.port)
            }
            (Some(user), None) => format!("{}://{}@{}:{}", scheme, user, self.host, self.port),
            _ => format!("{}://{}:{}", scheme, self.host, self.port),
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn is_selectable(&self) -> bool {
        self.health != ProxyHealth::Unreachable
    }
}

/// Reachability check used by [`ProxyPool::probe`]
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn check(&self, endpoint: &ProxyEndpoint) -> bool;
}

/// Probe that opens a TCP connection to the proxy port
pub struct TcpProbe {
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl HealthProbe for TcpProbe {
    async fn check(&self, endpoint: &ProxyEndpoint) -> bool {
        match tokio::time::timeout(self.timeout, TcpStream::connect(endpoint.address())).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!(endpoint = %endpoint.id, error = %e, "proxy connect failed");
                false
            }
            Err(_) => {
                debug!(endpoint = %endpoint.id, "proxy connect timed out");
                false
            }
        }
    }
}

struct PoolInner {
    slots: Vec<Mutex<ProxyEndpoint>>,
    cursors: HashMap<ProxyPreference, AtomicUsize>,
    enabled: bool,
    failure_threshold: u32,
    reprobe_delay: Duration,
    prober: Arc<dyn HealthProbe>,
    events: RwLock<Option<EventBus>>,
}

/// Shared, cloneable handle to the endpoint set
#[derive(Clone)]
pub struct ProxyPool {
    inner: Arc<PoolInner>,
}

impl ProxyPool {
    pub fn new(
        endpoints: Vec<ProxyEndpoint>,
        failure_threshold: u32,
        reprobe_delay: Duration,
        prober: Arc<dyn HealthProbe>,
    ) -> Self {
        Self::build(endpoints, failure_threshold, reprobe_delay, prober, true)
    }

    fn build(
        endpoints: Vec<ProxyEndpoint>,
        failure_threshold: u32,
        reprobe_delay: Duration,
        prober: Arc<dyn HealthProbe>,
        enabled: bool,
    ) -> Self {
        let mut slots: Vec<Mutex<ProxyEndpoint>> = Vec::with_capacity(endpoints.len());
        for endpoint in endpoints {
            if slots.iter().any(|slot| slot.lock().id == endpoint.id) {
                warn!(endpoint = %endpoint.id, "duplicate proxy endpoint ignored");
                continue;
            }
            slots.push(Mutex::new(endpoint));
        }

        let cursors = [
            ProxyPreference::None,
            ProxyPreference::Http,
            ProxyPreference::Socks5,
            ProxyPreference::Tor,
        ]
        .into_iter()
        .map(|pref| (pref, AtomicUsize::new(0)))
        .collect();

        Self {
            inner: Arc::new(PoolInner {
                slots,
                cursors,
                enabled,
                failure_threshold: failure_threshold.max(1),
                reprobe_delay,
                prober,
                events: RwLock::new(None),
            }),
        }
    }

    /// Build the pool from `[proxy]`, adding the Tor endpoint when configured
    pub fn from_config(config: &ProxyConfig) -> Self {
        let mut endpoints: Vec<ProxyEndpoint> = config
            .endpoints
            .iter()
            .map(|e| {
                ProxyEndpoint::new(e.kind, e.host.clone(), e.port)
                    .with_credentials(e.username.clone(), e.password.clone())
            })
            .collect();
        if let Some(tor) = &config.tor {
            endpoints.push(ProxyEndpoint::new(ProxyKind::Tor, tor.host.clone(), tor.port));
        }

        let prober = Arc::new(TcpProbe::new(Duration::from_secs(config.probe_timeout)));
        Self::build(
            endpoints,
            config.failure_threshold,
            Duration::from_secs(config.reprobe_delay),
            prober,
            config.enabled,
        )
    }

    /// Publish health transitions on `events`
    ///
    /// Applies to every clone of this pool, including ones made earlier.
    pub fn with_events(self, events: EventBus) -> Self {
        *self.inner.events.write() = Some(events);
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled
    }

    pub fn len(&self) -> usize {
        self.inner.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.slots.is_empty()
    }

    fn slot(&self, id: &str) -> Result<&Mutex<ProxyEndpoint>> {
        self.inner
            .slots
            .iter()
            .find(|slot| slot.lock().id == id)
            .ok_or_else(|| OsintError::NotFound(format!("proxy endpoint '{}'", id)))
    }

    /// Next selectable endpoint of the requested kind, round-robin
    pub fn select(&self, preference: ProxyPreference) -> Result<ProxyEndpoint> {
        let candidates: Vec<ProxyEndpoint> = self
            .inner
            .slots
            .iter()
            .filter_map(|slot| {
                let endpoint = slot.lock();
                (endpoint.kind.satisfies(preference) && endpoint.is_selectable())
                    .then(|| endpoint.clone())
            })
            .collect();

        if candidates.is_empty() {
            return Err(OsintError::NoProxyAvailable(preference));
        }

        let turn = self
            .inner
            .cursors
            .get(&preference)
            .map(|cursor| cursor.fetch_add(1, Ordering::Relaxed))
            .unwrap_or(0);
        let chosen = candidates[turn % candidates.len()].clone();
        debug!(endpoint = %chosen.id, preference = %preference, "proxy selected");
        Ok(chosen)
    }

    /// Count a failure against `id`, marking it unreachable at the threshold
    pub fn report_failure(&self, id: &str) -> Result<()> {
        let marked = {
            let mut endpoint = self.slot(id)?.lock();
            endpoint.consecutive_failures = endpoint.consecutive_failures.saturating_add(1);
            let crossed = endpoint.consecutive_failures >= self.inner.failure_threshold
                && endpoint.health != ProxyHealth::Unreachable;
            if crossed {
                endpoint.health = ProxyHealth::Unreachable;
            }
            crossed
        };

        if marked {
            warn!(
                endpoint = %id,
                failures = self.inner.failure_threshold,
                "proxy marked unreachable"
            );
            self.emit_health(id, ProxyHealth::Unreachable);
            self.schedule_reprobe(id.to_string());
        }
        Ok(())
    }

    /// Reset the failure streak of `id`
    ///
    /// An unreachable endpoint stays unreachable until a probe succeeds.
    pub fn report_success(&self, id: &str) -> Result<()> {
        let mut endpoint = self.slot(id)?.lock();
        endpoint.consecutive_failures = 0;
        if endpoint.health == ProxyHealth::Unknown {
            endpoint.health = ProxyHealth::Healthy;
        }
        Ok(())
    }

    fn schedule_reprobe(&self, id: String) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!(endpoint = %id, "no runtime, re-probe left to the health loop");
            return;
        };
        let pool = self.clone();
        let delay = self.inner.reprobe_delay;
        runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = pool.probe(&id).await {
                debug!(endpoint = %id, error = %e, "re-probe skipped");
            }
        });
    }

    /// Check reachability of `id` and record the outcome
    pub async fn probe(&self, id: &str) -> Result<ProxyHealth> {
        let snapshot = self.slot(id)?.lock().clone();
        let reachable = self.inner.prober.check(&snapshot).await;

        let health = if reachable {
            ProxyHealth::Healthy
        } else {
            ProxyHealth::Unreachable
        };
        let previous = {
            let mut endpoint = self.slot(id)?.lock();
            let previous = endpoint.health;
            endpoint.health = health;
            endpoint.last_checked_at = Some(Utc::now());
            if reachable {
                endpoint.consecutive_failures = 0;
            }
            previous
        };

        if previous != health {
            info!(endpoint = %id, from = %previous, to = %health, "proxy health changed");
            self.emit_health(id, health);
        }
        Ok(health)
    }

    /// Probe every endpoint concurrently
    pub async fn probe_all(&self) -> Vec<(String, ProxyHealth)> {
        let ids: Vec<String> = self
            .inner
            .slots
            .iter()
            .map(|slot| slot.lock().id.clone())
            .collect();

        let probes = ids.iter().map(|id| async move {
            let health = self.probe(id).await.unwrap_or(ProxyHealth::Unknown);
            (id.clone(), health)
        });
        join_all(probes).await
    }

    /// Probe every `interval` until `cancel` fires, independent of fetch traffic
    pub fn spawn_health_loop(&self, interval: Duration, cancel: CancelSignal) -> JoinHandle<()> {
        let pool = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let results = pool.probe_all().await;
                        let healthy = results
                            .iter()
                            .filter(|(_, h)| *h == ProxyHealth::Healthy)
                            .count();
                        debug!(healthy, total = results.len(), "proxy health sweep");
                    }
                }
            }
            debug!("proxy health loop stopped");
        })
    }

    /// Snapshot of every endpoint
    pub fn status(&self) -> Vec<ProxyEndpoint> {
        self.inner
            .slots
            .iter()
            .map(|slot| slot.lock().clone())
            .collect()
    }

    fn emit_health(&self, id: &str, health: ProxyHealth) {
        if let Some(events) = self.inner.events.read().as_ref() {
            events.emit(Event::ProxyHealthChanged {
                endpoint: id.to_string(),
                health,
            });
        }
    }
}
