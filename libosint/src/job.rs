//! Collection jobs
//!
//! A [`CollectionJob`] carries one [`FetchRequest`] through
//! `Pending → Running → {Succeeded, Failed, PartiallySucceeded, Cancelled}`.
//!
//! Each attempt waits for a rate-limit grant, picks an egress proxy if one was
//! asked for, and calls the platform fetcher. Transient failures are retried
//! with exponential backoff and jitter; terminal failures end the job at once.
//! When attempts run out, the largest partial collection wins. Whatever the
//! end state, the result goes to the sink exactly once.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cancel::CancelSignal;
use crate::config::CollectionConfig;
use crate::error::{ErrorKind, OsintError, Result};
use crate::events::{Event, EventBus};
use crate::fetchers::FetcherRegistry;
use crate::proxy::{ProxyEndpoint, ProxyPool};
use crate::rate_limiter::RateLimiter;
use crate::sink::ResultSink;
use crate::types::{FetchRequest, FetchResult, ProxyPreference};

/// Backoff between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &CollectionConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_backoff_ms),
            max_delay: Duration::from_millis(config.max_backoff_ms),
        }
    }

    /// `base * 2^(attempt-1)`, capped at `max_delay`
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    /// Backoff plus up to 50% random jitter
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let backoff = self.backoff(attempt);
        let jitter_cap = backoff.as_millis() as u64 / 2;
        let jitter = if jitter_cap == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_cap)
        };
        backoff + Duration::from_millis(jitter)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed,
    PartiallySucceeded,
    Cancelled,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::PartiallySucceeded => "partially_succeeded",
            JobState::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobState::Pending | JobState::Running)
    }

    /// Whether the job produced usable data
    pub fn has_data(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::PartiallySucceeded)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final report of a job
#[derive(Debug, Clone, Serialize)]
pub struct JobOutcome {
    pub job_id: Uuid,
    pub state: JobState,
    pub attempts: u32,
    pub result: FetchResult,
}

/// Shared collaborators of every job
#[derive(Clone)]
pub struct JobContext {
    pub limiter: Arc<RateLimiter>,
    pub proxies: Option<ProxyPool>,
    pub fetchers: FetcherRegistry,
    pub sink: Arc<dyn ResultSink>,
    pub events: EventBus,
    pub retry: RetryPolicy,
}

enum Step {
    Done(JobState, FetchResult),
    Retry(FetchResult),
}

pub struct CollectionJob {
    id: Uuid,
    request: FetchRequest,
    state: JobState,
    attempts: u32,
}

impl CollectionJob {
    pub fn new(request: FetchRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            request,
            state: JobState::Pending,
            attempts: 0,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    fn transition(&mut self, next: JobState) {
        if self.state != next {
            debug!(job = %self.id, from = %self.state, to = %next, "job state");
            self.state = next;
        }
    }

    /// Drive the job to a terminal state
    pub async fn run(mut self, ctx: &JobContext, cancel: &CancelSignal) -> JobOutcome {
        let target = self.request.target.clone();
        ctx.events.emit(Event::JobStarted {
            job_id: self.id,
            target: target.clone(),
        });

        let (state, result) = self.attempt_all(ctx, cancel).await;
        self.finish(ctx, state, result).await
    }

    async fn attempt_all(
        &mut self,
        ctx: &JobContext,
        cancel: &CancelSignal,
    ) -> (JobState, FetchResult) {
        let target = self.request.target.clone();
        let Some(fetcher) = ctx.fetchers.get(target.platform()) else {
            let message = format!("no fetcher registered for platform '{}'", target.platform());
            return (
                JobState::Failed,
                FetchResult::failed(target, ErrorKind::Unsupported, message),
            );
        };

        let max_attempts = ctx.retry.max_attempts.max(1);
        let max_items = self.request.max_items;
        let mut best_partial: Option<FetchResult> = None;
        let mut last_failure: Option<FetchResult> = None;

        while self.attempts < max_attempts {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => return self.cancelled(best_partial),
                permit = ctx.limiter.acquire(target.platform()) => permit,
            };
            if cancel.is_cancelled() {
                permit.release();
                return self.cancelled(best_partial);
            }

            self.attempts += 1;
            let attempt = self.attempts;

            let step = match self.pick_proxy(ctx) {
                Err(e) => {
                    // Nothing was sent, so the grant goes back
                    permit.release();
                    warn!(target = %target, attempt, error = %e, "no proxy for attempt");
                    Step::Retry(FetchResult::failed(
                        target.clone(),
                        ErrorKind::ProxyUnreachable,
                        e.to_string(),
                    ))
                }
                Ok(proxy) => {
                    self.transition(JobState::Running);
                    debug!(
                        target = %target,
                        attempt,
                        proxy = proxy.as_ref().map(|p| p.id.as_str()).unwrap_or("direct"),
                        "fetching"
                    );

                    let mut result = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            permit.release();
                            return self.cancelled(best_partial);
                        }
                        result = fetcher.fetch(&target, max_items, proxy.as_ref()) => result,
                    };
                    drop(permit);

                    result.truncate(max_items);
                    if !result.success && result.error.is_none() {
                        result.error = Some(ErrorKind::MalformedResponse);
                    }
                    self.classify(ctx, proxy.as_ref(), result)
                }
            };

            match step {
                Step::Done(state, result) => return (state, result),
                Step::Retry(result) => {
                    let kind = result.error.unwrap_or(ErrorKind::MalformedResponse);
                    if result.item_count()
                        > best_partial.as_ref().map_or(0, FetchResult::item_count)
                    {
                        best_partial = Some(result.clone());
                    }
                    last_failure = Some(result);

                    if self.attempts < max_attempts {
                        let delay = ctx.retry.delay_for(self.attempts);
                        info!(
                            target = %target,
                            attempt = self.attempts,
                            error = %kind,
                            delay_ms = delay.as_millis() as u64,
                            "transient failure, retrying"
                        );
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => return self.cancelled(best_partial),
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                }
            }
        }

        match best_partial {
            Some(partial) if partial.item_count() > 0 => (JobState::PartiallySucceeded, partial),
            _ => {
                let result = last_failure.unwrap_or_else(|| {
                    FetchResult::failed(
                        target,
                        ErrorKind::MalformedResponse,
                        "no attempt produced a result",
                    )
                });
                (JobState::Failed, result)
            }
        }
    }

    fn pick_proxy(&self, ctx: &JobContext) -> Result<Option<ProxyEndpoint>> {
        let preference = self.request.proxy_preference;
        if preference == ProxyPreference::None {
            return Ok(None);
        }
        match &ctx.proxies {
            Some(pool) if pool.is_enabled() => pool.select(preference).map(Some),
            _ => {
                debug!(preference = %preference, "proxy pool disabled, connecting directly");
                Ok(None)
            }
        }
    }

    fn classify(
        &self,
        ctx: &JobContext,
        proxy: Option<&ProxyEndpoint>,
        result: FetchResult,
    ) -> Step {
        let report = |outcome: std::result::Result<(), OsintError>| {
            if let Err(e) = outcome {
                debug!(error = %e, "proxy report ignored");
            }
        };

        if result.success {
            if let (Some(pool), Some(endpoint)) = (&ctx.proxies, proxy) {
                report(pool.report_success(&endpoint.id));
            }
            return Step::Done(JobState::Succeeded, result);
        }

        let kind = result.error.unwrap_or(ErrorKind::MalformedResponse);
        if kind == ErrorKind::Cancelled {
            return Step::Done(JobState::Cancelled, result);
        }
        if let (Some(pool), Some(endpoint)) = (&ctx.proxies, proxy) {
            if kind.blames_proxy() {
                report(pool.report_failure(&endpoint.id));
            }
        }
        if kind.is_terminal() {
            warn!(target = %result.target, error = %kind, "terminal failure");
            return Step::Done(JobState::Failed, result);
        }
        Step::Retry(result)
    }

    fn cancelled(&self, best_partial: Option<FetchResult>) -> (JobState, FetchResult) {
        info!(target = %self.request.target, attempts = self.attempts, "job cancelled");
        let result = match best_partial {
            Some(mut partial) => {
                partial.success = false;
                partial.error = Some(ErrorKind::Cancelled);
                partial.message = Some("cancelled".to_string());
                partial
            }
            None => FetchResult::failed(
                self.request.target.clone(),
                ErrorKind::Cancelled,
                "cancelled",
            ),
        };
        (JobState::Cancelled, result)
    }

    async fn finish(mut self, ctx: &JobContext, state: JobState, result: FetchResult) -> JobOutcome {
        self.transition(state);

        let handed_off = if state.has_data() {
            ctx.sink.store_and_announce(&result, &ctx.events).await
        } else {
            ctx.sink.store(&result).await
        };
        if let Err(e) = handed_off {
            warn!(target = %result.target, error = %e, "failed to hand result to sink");
        }

        info!(
            target = %result.target,
            state = %state,
            attempts = self.attempts,
            items = result.item_count(),
            "job finished"
        );
        ctx.events.emit(Event::JobFinished {
            job_id: self.id,
            target: result.target.clone(),
            state,
            attempts: self.attempts,
            item_count: result.item_count(),
        });

        JobOutcome {
            job_id: self.id,
            state,
            attempts: self.attempts,
            result,
        }
    }
}
