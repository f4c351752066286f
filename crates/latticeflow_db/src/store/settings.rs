//! Settings repository (spec.md §2 item 14, §6).
//!
//! Stores one JSON value per key; precedence (database row > environment
//! variable > built-in default) and the TTL cache layer live in
//! `latticeflow`'s config module, which is the only caller.

use super::Store;
use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;

impl Store {
    pub async fn get_setting_raw(&self, key: &str) -> Result<Option<String>> {
        sqlx::query_scalar("SELECT value_json FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(self.pool())
            .await
            .map_err(Into::into)
    }

    pub async fn get_setting<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get_setting_raw(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn set_setting<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        sqlx::query(
            "INSERT INTO settings (key, value_json, updated_at) VALUES (?, ?, datetime('now'))
             ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(raw)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn delete_setting(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM settings WHERE key = ?")
            .bind(key)
            .execute(self.pool())
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_round_trips_json() {
        let store = Store::open_in_memory().await.unwrap();
        store.set_setting("sync_interval_hours", &6u32).await.unwrap();
        let value: Option<u32> = store.get_setting("sync_interval_hours").await.unwrap();
        assert_eq!(value, Some(6));
    }

    #[tokio::test]
    async fn set_overwrites_existing_value() {
        let store = Store::open_in_memory().await.unwrap();
        store.set_setting("k", &1u32).await.unwrap();
        store.set_setting("k", &2u32).await.unwrap();
        let value: Option<u32> = store.get_setting("k").await.unwrap();
        assert_eq!(value, Some(2));
    }

    #[tokio::test]
    async fn missing_key_returns_none() {
        let store = Store::open_in_memory().await.unwrap();
        let value: Option<u32> = store.get_setting("missing").await.unwrap();
        assert_eq!(value, None);
    }
}
