//! Composed rate limiter (spec.md §4.3): a global token bucket plus a
//! per-entity backoff/spacing map, used as a singleton per external
//! collaborator (chat-platform client, cloud-drive REST, forum HTTP).

use crate::backoff_map::EntityBackoffMap;
use crate::error::RateLimitExceeded;
use crate::token_bucket::TokenBucket;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

pub struct RateLimiterStats {
    pub rpm: u32,
    pub remaining_tokens: f64,
    pub total_acquires: u64,
    pub total_backoffs: u64,
    pub entities_in_backoff: usize,
}

pub struct RateLimiter {
    rpm: u32,
    bucket: TokenBucket,
    backoff: EntityBackoffMap,
    total_acquires: AtomicU64,
    total_backoffs: AtomicU64,
}

impl RateLimiter {
    pub fn new(rpm: u32, min_spacing: Duration, max_wait: Duration) -> Self {
        Self {
            rpm,
            bucket: TokenBucket::new(rpm),
            backoff: EntityBackoffMap::new(min_spacing, max_wait),
            total_acquires: AtomicU64::new(0),
            total_backoffs: AtomicU64::new(0),
        }
    }

    /// Acquires a global token then waits out the entity's backoff and
    /// spacing window. Call site passes whatever id identifies the
    /// remote entity being called (channel id, file id, board url, ...).
    pub async fn acquire(&self, entity: &str) -> Result<(), RateLimitExceeded> {
        self.bucket.acquire().await;
        self.total_acquires.fetch_add(1, Ordering::Relaxed);
        self.backoff.acquire(entity).await
    }

    pub async fn signal_rate_limited(&self, entity: &str, retry_after: Duration) {
        self.total_backoffs.fetch_add(1, Ordering::Relaxed);
        self.backoff.set_backoff(entity, retry_after).await;
    }

    pub async fn stats(&self) -> RateLimiterStats {
        RateLimiterStats {
            rpm: self.rpm,
            remaining_tokens: self.bucket.remaining().await,
            total_acquires: self.total_acquires.load(Ordering::Relaxed),
            total_backoffs: self.total_backoffs.load(Ordering::Relaxed),
            entities_in_backoff: self.backoff.entities_in_backoff().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn signal_rate_limited_is_reflected_in_stats() {
        let limiter = RateLimiter::new(600, Duration::ZERO, Duration::from_secs(60));
        limiter.signal_rate_limited("chan-1", Duration::from_secs(5)).await;

        let stats = limiter.stats().await;
        assert_eq!(stats.total_backoffs, 1);
        assert_eq!(stats.entities_in_backoff, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_increments_total_acquires() {
        let limiter = RateLimiter::new(600, Duration::ZERO, Duration::from_secs(60));
        limiter.acquire("chan-1").await.unwrap();
        limiter.acquire("chan-1").await.unwrap();

        assert_eq!(limiter.stats().await.total_acquires, 2);
    }
}
