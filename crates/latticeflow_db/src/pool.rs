//! Pool creation and SQLite pragma tuning.
//!
//! Grounded on the teacher's `casparian_db::pool`: a concrete pool type
//! (not `sqlx::AnyPool`) so `#[derive(sqlx::FromRow)]` works with
//! `chrono::DateTime<Utc>` and our own `sqlx::Type` enums, plus the same
//! WAL/NORMAL pragma pair applied right after connecting.

use crate::error::{DbError, Result};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tracing::info;

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub url: String,
    pub max_connections: u32,
}

impl DbConfig {
    pub fn file(path: impl AsRef<std::path::Path>) -> Self {
        Self {
            url: format!("sqlite:{}?mode=rwc", path.as_ref().display()),
            // §5: the store is the only concurrency-safe shared mutable
            // state; SQLite write concurrency is the reason download
            // workers default to 1 (spec.md §9).
            max_connections: 5,
        }
    }

    pub fn memory() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
        }
    }
}

pub async fn create_pool(config: DbConfig) -> Result<SqlitePool> {
    if !config.url.starts_with("sqlite:") {
        return Err(DbError::InvalidUrl(config.url));
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url)
        .await?;

    apply_sqlite_pragmas(&pool).await?;
    info!(url = %redact(&config.url), "connected to sqlite store");
    Ok(pool)
}

async fn apply_sqlite_pragmas(pool: &SqlitePool) -> Result<()> {
    sqlx::query("PRAGMA journal_mode=WAL").execute(pool).await?;
    sqlx::query("PRAGMA synchronous=NORMAL").execute(pool).await?;
    sqlx::query("PRAGMA foreign_keys=ON").execute(pool).await?;
    Ok(())
}

fn redact(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_pool_connects() {
        let pool = create_pool(DbConfig::memory()).await.unwrap();
        let one: i32 = sqlx::query_scalar("SELECT 1").fetch_one(&pool).await.unwrap();
        assert_eq!(one, 1);
    }
}
