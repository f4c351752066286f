//! Settings resolution (spec.md §6 "Config"): database row overrides an
//! environment variable, which overrides a built-in default. Resolved
//! values are cached briefly so a hot job loop doesn't hit the database
//! on every lookup.

use latticeflow_api::cache::TtlCache;
use latticeflow_db::Store;
use serde::de::DeserializeOwned;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::RwLock;

const SETTINGS_CACHE_TTL: Duration = Duration::from_secs(30);

pub struct SettingsResolver {
    store: std::sync::Arc<Store>,
    cache: RwLock<TtlCache<serde_json::Value>>,
}

impl SettingsResolver {
    pub fn new(store: std::sync::Arc<Store>) -> Self {
        Self { store, cache: RwLock::new(TtlCache::new(SETTINGS_CACHE_TTL)) }
    }

    /// Database row > `env_var` > `default`. `env_var` is parsed with
    /// `FromStr`; a row or env value that fails to parse falls through to
    /// the next source rather than erroring the caller.
    pub async fn resolve<T>(&self, key: &str, env_var: &str, default: T) -> T
    where
        T: DeserializeOwned + FromStr + Clone,
    {
        if let Some(cached) = self.cached(key).await {
            if let Ok(value) = serde_json::from_value(cached) {
                return value;
            }
        }

        let resolved = match self.store.get_setting::<T>(key).await {
            Ok(Some(value)) => value,
            _ => match std::env::var(env_var).ok().and_then(|raw| raw.parse().ok()) {
                Some(value) => value,
                None => default,
            },
        };

        if let Ok(value) = serde_json::to_value(resolved.clone()) {
            self.cache_write(key, value).await;
        }
        resolved
    }

    async fn cached(&self, key: &str) -> Option<serde_json::Value> {
        match self.cache.read().await.get() {
            Some(serde_json::Value::Object(map)) => map.get(key).cloned(),
            _ => None,
        }
    }

    async fn cache_write(&self, key: &str, value: serde_json::Value) {
        let mut map = match self.cache.read().await.get() {
            Some(serde_json::Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        };
        map.insert(key.to_string(), value);
        self.cache.write().await.set(serde_json::Value::Object(map));
    }

    pub async fn sync_enabled(&self) -> bool {
        self.resolve("sync_enabled", "LATTICEFLOW_SYNC_ENABLED", true).await
    }

    pub async fn sync_poll_interval_secs(&self) -> u64 {
        self.resolve("sync_poll_interval", "LATTICEFLOW_SYNC_POLL_INTERVAL", 300u64).await
    }

    pub async fn max_concurrent_downloads(&self) -> u32 {
        self.resolve("max_concurrent_downloads", "LATTICEFLOW_MAX_CONCURRENT_DOWNLOADS", 3u32).await
    }

    pub async fn telegram_rate_limit_rpm(&self) -> u32 {
        self.resolve("telegram_rate_limit_rpm", "LATTICEFLOW_TELEGRAM_RATE_LIMIT_RPM", 20u32).await
    }

    pub async fn google_requests_per_minute(&self) -> u32 {
        self.resolve("google_requests_per_minute", "LATTICEFLOW_GOOGLE_REQUESTS_PER_MINUTE", 100u32).await
    }

    pub async fn ai_rate_limit_rpm(&self) -> u32 {
        self.resolve("ai_rate_limit_rpm", "LATTICEFLOW_AI_RATE_LIMIT_RPM", 15u32).await
    }

    pub async fn library_template_global(&self) -> String {
        self.resolve(
            "library_template_global",
            "LATTICEFLOW_LIBRARY_TEMPLATE_GLOBAL",
            "{title}".to_string(),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn falls_back_to_default_when_unset() {
        let store = std::sync::Arc::new(Store::open_in_memory().await.unwrap());
        let resolver = SettingsResolver::new(store);
        assert!(resolver.sync_enabled().await);
        assert_eq!(resolver.max_concurrent_downloads().await, 3);
    }

    #[tokio::test]
    async fn database_row_wins_over_default() {
        let store = std::sync::Arc::new(Store::open_in_memory().await.unwrap());
        store.set_setting("max_concurrent_downloads", &7u32).await.unwrap();
        let resolver = SettingsResolver::new(store);
        assert_eq!(resolver.max_concurrent_downloads().await, 7);
    }
}
