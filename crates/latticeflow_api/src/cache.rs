//! A tiny TTL cache for the two spec-mandated cached endpoints: health
//! (5s) and dashboard storage stats (5min). Grounded on the teacher's
//! settings-cache shape (`latticeflow::config`), generalized to hold
//! any serializable value rather than just settings rows.

use std::time::{Duration, Instant};

pub struct TtlCache<T> {
    ttl: Duration,
    entry: Option<(Instant, T)>,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, entry: None }
    }

    pub fn get(&self) -> Option<T> {
        self.entry
            .as_ref()
            .filter(|(stamped_at, _)| stamped_at.elapsed() < self.ttl)
            .map(|(_, value)| value.clone())
    }

    pub fn set(&mut self, value: T) {
        self.entry = Some((Instant::now(), value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_none_before_first_set() {
        let cache: TtlCache<i32> = TtlCache::new(Duration::from_secs(5));
        assert_eq!(cache.get(), None);
    }

    #[test]
    fn returns_cached_value_within_ttl() {
        let mut cache = TtlCache::new(Duration::from_secs(5));
        cache.set(42);
        assert_eq!(cache.get(), Some(42));
    }

    #[test]
    fn expires_after_ttl() {
        let mut cache = TtlCache::new(Duration::from_millis(1));
        cache.set(42);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get(), None);
    }
}
