//! Global token bucket (spec.md §4.3): capacity `rpm`, refill `rpm/60`
//! tokens per second, `acquire` waits until a token is available.

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    pub fn new(rpm: u32) -> Self {
        let capacity = rpm as f64;
        Self {
            capacity,
            refill_per_sec: capacity / 60.0,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        state.last_refill = now;
    }

    /// Blocks until at least one token is available, then consumes it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                self.refill(&mut state);
                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return;
                }
                let deficit = 1.0 - state.tokens;
                deficit / self.refill_per_sec
            };
            sleep(std::time::Duration::from_secs_f64(wait.max(0.001))).await;
        }
    }

    pub async fn remaining(&self) -> f64 {
        let mut state = self.state.lock().await;
        self.refill(&mut state);
        state.tokens
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn acquire_drains_then_refills_over_time() {
        let bucket = TokenBucket::new(60); // 1 token/sec
        for _ in 0..60 {
            bucket.acquire().await;
        }
        assert!(bucket.remaining().await < 1.0);

        tokio::time::advance(std::time::Duration::from_secs(5)).await;
        assert!(bucket.remaining().await >= 4.0);
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_waits_for_a_token_when_empty() {
        let bucket = TokenBucket::new(60);
        for _ in 0..60 {
            bucket.acquire().await;
        }

        let start = tokio::time::Instant::now();
        bucket.acquire().await;
        assert!(start.elapsed() >= std::time::Duration::from_millis(900));
    }
}
