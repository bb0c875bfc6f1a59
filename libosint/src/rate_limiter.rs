//! Per-platform request throttling
//!
//! Each platform owns a bucket recording the instants of its recent grants.
//! A grant is allowed only while fewer than `max_requests` grants fall inside
//! the trailing `window`, so no window of that length ever sees more than
//! `max_requests` requests, including across window boundaries.
//!
//! Waiters for the same platform queue on an async mutex (FIFO), while the
//! bucket bookkeeping sits behind a short synchronous lock that is never held
//! across an `.await`.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

use crate::error::{OsintError, Result};
use crate::types::Platform;

/// Capacity of one bucket
///
/// Always admits at least one request per non-empty window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimit {
    max_requests: u32,
    window: Duration,
}

impl RateLimit {
    pub fn new(max_requests: u32, window: Duration) -> Result<Self> {
        if max_requests == 0 {
            return Err(OsintError::InvalidInput(
                "rate limit must allow at least one request".to_string(),
            ));
        }
        if window.is_zero() {
            return Err(OsintError::InvalidInput(
                "rate limit window must be longer than zero".to_string(),
            ));
        }
        Ok(Self {
            max_requests,
            window,
        })
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

#[derive(Debug)]
struct Bucket {
    limit: RateLimit,
    grants: VecDeque<Instant>,
}

impl Bucket {
    fn new(limit: RateLimit) -> Self {
        Self {
            limit,
            grants: VecDeque::with_capacity(limit.max_requests as usize),
        }
    }

    fn prune(&mut self, now: Instant) {
        while let Some(oldest) = self.grants.front() {
            if *oldest + self.limit.window <= now {
                self.grants.pop_front();
            } else {
                break;
            }
        }
    }

    fn has_capacity(&self) -> bool {
        self.grants.len() < self.limit.max_requests as usize
    }

    /// When the oldest grant leaves the window
    fn next_free_at(&self) -> Option<Instant> {
        self.grants.front().map(|oldest| *oldest + self.limit.window)
    }

    fn refund(&mut self, granted_at: Instant) {
        if let Some(pos) = self.grants.iter().rposition(|at| *at == granted_at) {
            self.grants.remove(pos);
        }
    }
}

#[derive(Debug)]
struct BucketCell {
    queue: tokio::sync::Mutex<()>,
    state: Mutex<Bucket>,
}

/// Proof that a request was admitted
///
/// Dropping the permit keeps the grant consumed. Call [`RateLimitPermit::release`]
/// when the request was never sent so the token returns to the bucket.
#[derive(Debug)]
#[must_use]
pub struct RateLimitPermit {
    bucket: Option<Arc<BucketCell>>,
    granted_at: Instant,
}

impl RateLimitPermit {
    fn unlimited() -> Self {
        Self {
            bucket: None,
            granted_at: Instant::now(),
        }
    }

    pub fn granted_at(&self) -> Instant {
        self.granted_at
    }

    /// Return the token to its bucket
    pub fn release(self) {
        if let Some(bucket) = self.bucket {
            bucket.state.lock().refund(self.granted_at);
        }
    }
}

/// Snapshot of one bucket for status reporting
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitStatus {
    pub platform: Platform,
    pub max_requests: u32,
    pub window_secs: u64,
    pub tokens_remaining: u32,
    /// Seconds until the oldest grant in the window expires
    pub resets_in_secs: Option<u64>,
}

/// Rate limiter keyed by platform
pub struct RateLimiter {
    limits: HashMap<Platform, RateLimit>,
    default_limit: Option<RateLimit>,
    buckets: Mutex<HashMap<Platform, Arc<BucketCell>>>,
}

impl RateLimiter {
    /// Platforms missing from `limits` use `default_limit`, or are unthrottled without one
    pub fn new(limits: HashMap<Platform, RateLimit>, default_limit: Option<RateLimit>) -> Self {
        Self {
            limits,
            default_limit,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// A limiter that admits everything
    pub fn unlimited() -> Self {
        Self::new(HashMap::new(), None)
    }

    pub fn limit_for(&self, platform: &Platform) -> Option<RateLimit> {
        self.limits.get(platform).copied().or(self.default_limit)
    }

    fn bucket(&self, platform: &Platform) -> Option<Arc<BucketCell>> {
        let limit = self.limit_for(platform)?;
        let mut buckets = self.buckets.lock();
        let cell = buckets.entry(platform.clone()).or_insert_with(|| {
            Arc::new(BucketCell {
                queue: tokio::sync::Mutex::new(()),
                state: Mutex::new(Bucket::new(limit)),
            })
        });
        Some(Arc::clone(cell))
    }

    /// Wait for a token
    ///
    /// Never fails: the caller is suspended until the bucket has room.
    /// Dropping the returned future before it completes leaves the bucket
    /// untouched.
    pub async fn acquire(&self, platform: &Platform) -> RateLimitPermit {
        let Some(cell) = self.bucket(platform) else {
            return RateLimitPermit::unlimited();
        };

        let _turn = cell.queue.lock().await;
        loop {
            let wake_at = {
                let now = Instant::now();
                let mut bucket = cell.state.lock();
                bucket.prune(now);
                if bucket.has_capacity() {
                    bucket.grants.push_back(now);
                    return RateLimitPermit {
                        bucket: Some(Arc::clone(&cell)),
                        granted_at: now,
                    };
                }
                bucket.next_free_at().unwrap_or(now)
            };

            debug!(
                platform = %platform,
                wait_ms = wake_at.saturating_duration_since(Instant::now()).as_millis() as u64,
                "rate limit reached, waiting for a token"
            );
            sleep_until(wake_at).await;
        }
    }

    /// Take a token only if one is free right now
    ///
    /// Returns `false` when the bucket is full or other callers are already
    /// queued for it.
    pub fn try_acquire(&self, platform: &Platform) -> bool {
        let Some(cell) = self.bucket(platform) else {
            return true;
        };
        let Ok(_turn) = cell.queue.try_lock() else {
            return false;
        };

        let now = Instant::now();
        let mut bucket = cell.state.lock();
        bucket.prune(now);
        if bucket.has_capacity() {
            bucket.grants.push_back(now);
            true
        } else {
            false
        }
    }

    /// Status of every configured platform
    pub fn status(&self) -> Vec<RateLimitStatus> {
        let now = Instant::now();
        let buckets = self.buckets.lock();

        let mut statuses: Vec<RateLimitStatus> = self
            .limits
            .iter()
            .map(|(platform, limit)| (platform, *limit))
            .chain(
                buckets
                    .iter()
                    .filter(|(platform, _)| !self.limits.contains_key(platform))
                    .filter_map(|(platform, _)| Some((platform, self.default_limit?))),
            )
            .map(|(platform, limit)| {
                let (used, resets_in) = match buckets.get(platform) {
                    Some(cell) => {
                        let mut bucket = cell.state.lock();
                        bucket.prune(now);
                        let resets_in = bucket
                            .next_free_at()
                            .map(|at| at.saturating_duration_since(now).as_secs());
                        (bucket.grants.len() as u32, resets_in)
                    }
                    None => (0, None),
                };
                RateLimitStatus {
                    platform: platform.clone(),
                    max_requests: limit.max_requests,
                    window_secs: limit.window.as_secs(),
                    tokens_remaining: limit.max_requests.saturating_sub(used),
                    resets_in_secs: resets_in,
                }
            })
            .collect();

        statuses.sort_by(|a, b| a.platform.cmp(&b.platform));
        statuses
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn demo() -> Platform {
        Platform::Other("demo".to_string())
    }

    fn limiter(max_requests: u32, window_secs: u64) -> RateLimiter {
        let mut limits = HashMap::new();
        limits.insert(
            demo(),
            RateLimit::new(max_requests, Duration::from_secs(window_secs)).unwrap(),
        );
        RateLimiter::new(limits, None)
    }

    #[tokio::test(start_paused = true)]
    async fn test_allows_requests_under_limit() {
        let limiter = limiter(5, 60);
        let start = Instant::now();

        for _ in 0..5 {
            let _permit = limiter.acquire(&demo()).await;
        }

        assert_eq!(start.elapsed(), Duration::ZERO, "no waiting under the limit");
    }

    #[tokio::test(start_paused = true)]
    async fn test_third_request_waits_for_window() {
        let limiter = limiter(2, 60);
        let start = Instant::now();

        let _a = limiter.acquire(&demo()).await;
        let _b = limiter.acquire(&demo()).await;
        let _c = limiter.acquire(&demo()).await;

        let waited = start.elapsed();
        assert!(waited >= Duration::from_secs(60), "waited {:?}", waited);
        assert!(waited < Duration::from_secs(61), "waited {:?}", waited);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_window_exceeds_max_requests() {
        let limiter = Arc::new(limiter(3, 10));
        let mut handles = Vec::new();

        for _ in 0..12 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move {
                limiter.acquire(&demo()).await.granted_at()
            }));
        }

        let mut grants = Vec::new();
        for handle in handles {
            grants.push(handle.await.unwrap());
        }
        grants.sort();

        for (i, start) in grants.iter().enumerate() {
            let in_window = grants[i..]
                .iter()
                .take_while(|at| **at < *start + Duration::from_secs(10))
                .count();
            assert!(in_window <= 3, "{} grants inside one window", in_window);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_try_acquire_reports_exhaustion() {
        let limiter = limiter(2, 60);

        assert!(limiter.try_acquire(&demo()));
        assert!(limiter.try_acquire(&demo()));
        assert!(!limiter.try_acquire(&demo()));

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(limiter.try_acquire(&demo()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_refunds_token() {
        let limiter = limiter(1, 60);

        let permit = limiter.acquire(&demo()).await;
        assert!(!limiter.try_acquire(&demo()));

        permit.release();
        assert!(limiter.try_acquire(&demo()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_waiter_does_not_consume() {
        let limiter = limiter(1, 60);
        let _held = limiter.acquire(&demo()).await;

        let waited =
            tokio::time::timeout(Duration::from_secs(5), limiter.acquire(&demo())).await;
        assert!(waited.is_err(), "second acquire should still be waiting");

        let status = limiter.status();
        assert_eq!(status[0].tokens_remaining, 0);

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(limiter.try_acquire(&demo()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_independent_platforms() {
        let limiter = limiter(1, 60);
        let _permit = limiter.acquire(&demo()).await;

        // Unconfigured platform without a default limit is unthrottled
        for _ in 0..10 {
            assert!(limiter.try_acquire(&Platform::Instagram));
        }
        assert!(!limiter.try_acquire(&demo()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_limit_applies_to_unconfigured_platforms() {
        let limiter = RateLimiter::new(
            HashMap::new(),
            Some(RateLimit::new(1, Duration::from_secs(30)).unwrap()),
        );

        assert!(limiter.try_acquire(&Platform::TikTok));
        assert!(!limiter.try_acquire(&Platform::TikTok));
        assert!(limiter.try_acquire(&Platform::YouTube));

        let status = limiter.status();
        assert_eq!(status.len(), 2);
        assert!(status.iter().all(|s| s.tokens_remaining == 0));
    }

    #[test]
    fn test_rejects_empty_limits() {
        assert!(matches!(
            RateLimit::new(0, Duration::from_secs(60)),
            Err(OsintError::InvalidInput(_))
        ));
        assert!(RateLimit::new(5, Duration::ZERO).is_err());

        let limit = RateLimit::new(1, Duration::from_secs(60)).unwrap();
        assert_eq!(limit.max_requests(), 1);
        assert_eq!(limit.window(), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_reports_remaining_tokens() {
        let limiter = limiter(3, 60);
        let _permit = limiter.acquire(&demo()).await;

        let status = limiter.status();
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].platform, demo());
        assert_eq!(status[0].tokens_remaining, 2);
        assert_eq!(status[0].resets_in_secs, Some(60));
    }
}
