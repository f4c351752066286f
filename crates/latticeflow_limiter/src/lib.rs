mod backoff_map;
mod error;
mod limiter;
mod token_bucket;

use std::sync::Arc;

pub use error::RateLimitExceeded;
pub use limiter::{RateLimiter, RateLimiterStats};
pub use token_bucket::TokenBucket;

/// The process-wide limiter singletons, one per external collaborator
/// (spec.md §4.3). Built once at startup and shared by every worker
/// handler and the health/dashboard endpoints that report on them.
#[derive(Clone)]
pub struct RateLimiters {
    pub telegram: Arc<RateLimiter>,
    pub google_drive: Arc<RateLimiter>,
    pub forum: Arc<RateLimiter>,
    pub ai: Arc<RateLimiter>,
}

impl RateLimiters {
    /// spec.md §7: "degraded ... >5 entities in rate-limit backoff",
    /// summed across every collaborator rather than per-limiter.
    pub async fn total_entities_in_backoff(&self) -> usize {
        let mut total = 0;
        for limiter in [&self.telegram, &self.google_drive, &self.forum, &self.ai] {
            total += limiter.stats().await.entities_in_backoff;
        }
        total
    }
}
