//! Per-entity backoff map and call spacing (spec.md §4.3).
//!
//! Generalized from the teacher's `Sentinel::check_circuit_breaker` /
//! `record_success` / `record_failure` (a single global pause/resume
//! flag per parser) into a per-entity map: each entity key (channel id,
//! drive file id, forum board url, ...) gets its own backoff deadline
//! and last-call timestamp.

use crate::error::RateLimitExceeded;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

struct EntityState {
    backoff_until: Option<Instant>,
    last_call: Option<Instant>,
}

pub struct EntityBackoffMap {
    min_spacing: Duration,
    max_wait: Duration,
    entities: Mutex<HashMap<String, EntityState>>,
}

impl EntityBackoffMap {
    pub fn new(min_spacing: Duration, max_wait: Duration) -> Self {
        Self {
            min_spacing,
            max_wait,
            entities: Mutex::new(HashMap::new()),
        }
    }

    /// Signals the remote rate-limited this entity for `retry_after`;
    /// future `acquire` calls for it wait out the deadline.
    pub async fn set_backoff(&self, entity: &str, retry_after: Duration) {
        let mut entities = self.entities.lock().await;
        let state = entities.entry(entity.to_string()).or_insert(EntityState {
            backoff_until: None,
            last_call: None,
        });
        state.backoff_until = Some(Instant::now() + retry_after);
    }

    /// Waits out any active backoff and the per-entity minimum spacing,
    /// then records this call as the new `last_call`. Fails fast with
    /// `RateLimitExceeded` if the remaining backoff exceeds `max_wait`.
    pub async fn acquire(&self, entity: &str) -> Result<(), RateLimitExceeded> {
        let wait = {
            let mut entities = self.entities.lock().await;
            let state = entities.entry(entity.to_string()).or_insert(EntityState {
                backoff_until: None,
                last_call: None,
            });

            let now = Instant::now();
            let backoff_wait = state
                .backoff_until
                .filter(|&until| until > now)
                .map(|until| until - now);

            if let Some(remaining) = backoff_wait {
                if remaining > self.max_wait {
                    return Err(RateLimitExceeded { retry_after: remaining });
                }
            } else {
                state.backoff_until = None;
            }

            let spacing_wait = state
                .last_call
                .map(|last| {
                    let elapsed = now.duration_since(last);
                    self.min_spacing.saturating_sub(elapsed)
                })
                .unwrap_or_default();

            let wait = backoff_wait.unwrap_or_default().max(spacing_wait);
            state.last_call = Some(now + wait);
            wait
        };

        if !wait.is_zero() {
            sleep(wait).await;
        }
        Ok(())
    }

    pub async fn entities_in_backoff(&self) -> usize {
        let entities = self.entities.lock().await;
        let now = Instant::now();
        entities
            .values()
            .filter(|s| s.backoff_until.is_some_and(|until| until > now))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn acquire_waits_out_a_short_backoff() {
        let map = EntityBackoffMap::new(Duration::ZERO, Duration::from_secs(60));
        map.set_backoff("chan-1", Duration::from_secs(2)).await;

        let start = Instant::now();
        map.acquire("chan-1").await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_fails_fast_when_backoff_exceeds_max_wait() {
        let map = EntityBackoffMap::new(Duration::ZERO, Duration::from_secs(60));
        map.set_backoff("chan-1", Duration::from_secs(120)).await;

        let err = map.acquire("chan-1").await.unwrap_err();
        assert!(err.retry_after >= Duration::from_secs(119));
    }

    #[tokio::test(start_paused = true)]
    async fn spacing_enforces_a_minimum_gap_between_calls() {
        let map = EntityBackoffMap::new(Duration::from_millis(500), Duration::from_secs(60));
        map.acquire("chan-1").await.unwrap();

        let start = Instant::now();
        map.acquire("chan-1").await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(400));
    }
}
