//! Synthetic fetcher
//!
//! Produces a plausible profile record followed by posts, derived from a
//! seed computed from the username. The same username always yields the same
//! snapshot, which keeps the pipeline testable end to end without network
//! access.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};
use std::time::Duration;

use crate::fetchers::Fetcher;
use crate::proxy::ProxyEndpoint;
use crate::types::{FetchResult, Platform, Target};

/// Posts generated per profile before `max_items` is applied
pub const DEFAULT_POSTS_PER_PROFILE: usize = 10;

pub struct DemoFetcher {
    platform: Platform,
    posts_per_profile: usize,
    latency: Duration,
}

impl DemoFetcher {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            posts_per_profile: DEFAULT_POSTS_PER_PROFILE,
            latency: Duration::ZERO,
        }
    }

    pub fn with_posts_per_profile(mut self, posts: usize) -> Self {
        self.posts_per_profile = posts;
        self
    }

    /// Sleep this long per fetch to mimic a remote call
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn seed(username: &str) -> u64 {
        username.chars().map(|c| u64::from(c as u32)).sum()
    }

    fn profile(&self, username: &str, rng: &mut StdRng) -> Value {
        let followers: u64 = rng.gen_range(100..100_000);
        json!({
            "kind": "profile",
            "platform": self.platform.as_str(),
            "username": username,
            "display_name": username,
            "followers": followers,
            "following": rng.gen_range(50..5_000u64),
            "post_count": rng.gen_range(100..10_000u64),
            "verified": followers > 50_000,
            "joined": format!("{}-{:02}", rng.gen_range(2010..=2020), rng.gen_range(1..=12)),
        })
    }

    fn post(&self, username: &str, index: usize, rng: &mut StdRng) -> Value {
        json!({
            "kind": "post",
            "id": format!("{}_{}_{}", self.platform, username, index + 1),
            "text": format!("Post #{} from @{}", index + 1, username),
            "posted_at": format!(
                "2024-{:02}-{:02}T{:02}:00:00Z",
                rng.gen_range(1..=12),
                rng.gen_range(1..=28),
                rng.gen_range(0..24)
            ),
            "likes": rng.gen_range(10..10_000u64),
            "shares": rng.gen_range(1..1_000u64),
            "replies": rng.gen_range(0..500u64),
            "tags": [username, self.platform.as_str(), "osint"],
        })
    }
}

#[async_trait]
impl Fetcher for DemoFetcher {
    fn platform(&self) -> Platform {
        self.platform.clone()
    }

    async fn fetch(
        &self,
        target: &Target,
        max_items: usize,
        _proxy: Option<&ProxyEndpoint>,
    ) -> FetchResult {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let username = target.username();
        let mut rng = StdRng::seed_from_u64(Self::seed(username));

        let mut items = Vec::with_capacity(max_items.min(self.posts_per_profile + 1));
        items.push(self.profile(username, &mut rng));
        for index in 0..self.posts_per_profile {
            items.push(self.post(username, index, &mut rng));
        }
        items.truncate(max_items);

        FetchResult::ok(target.clone(), items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn demo() -> Platform {
        Platform::Other("demo".to_string())
    }

    #[tokio::test]
    async fn test_snapshot_is_deterministic() {
        let fetcher = DemoFetcher::new(demo());
        let target = Target::new(demo(), "alice").unwrap();

        let first = fetcher.fetch(&target, 20, None).await;
        let second = fetcher.fetch(&target, 20, None).await;

        assert!(first.success);
        assert_eq!(first.items, second.items);
        assert_eq!(first.item_count(), DEFAULT_POSTS_PER_PROFILE + 1);
        assert_eq!(first.items[0]["kind"], "profile");
        assert_eq!(first.items[1]["kind"], "post");
    }

    #[tokio::test]
    async fn test_respects_max_items() {
        let fetcher = DemoFetcher::new(demo());
        let target = Target::new(demo(), "bob").unwrap();

        let result = fetcher.fetch(&target, 3, None).await;
        assert_eq!(result.item_count(), 3);
    }

    #[tokio::test]
    async fn test_different_users_differ() {
        let fetcher = DemoFetcher::new(demo()).with_posts_per_profile(2);
        let alice = fetcher
            .fetch(&Target::new(demo(), "alice").unwrap(), 10, None)
            .await;
        let zed = fetcher
            .fetch(&Target::new(demo(), "zed").unwrap(), 10, None)
            .await;

        assert_eq!(alice.item_count(), 3);
        assert_ne!(alice.items, zed.items);
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_is_simulated() {
        let fetcher = DemoFetcher::new(demo()).with_latency(Duration::from_secs(2));
        let start = tokio::time::Instant::now();
        fetcher
            .fetch(&Target::new(demo(), "alice").unwrap(), 1, None)
            .await;
        assert!(start.elapsed() >= Duration::from_secs(2));
    }
}
