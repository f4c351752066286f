//! `Store` is the single handle the rest of the workspace holds onto the
//! SQLite pool. Repository methods are split across sibling modules by
//! entity family, mirroring the teacher's `CasparianDb` impl-block split.

mod catalog;
mod credentials;
mod discovery;
mod duplicates;
mod imports;
mod ingest;
pub mod jobs;
mod settings;
mod tags;

pub use catalog::NewDesignFile;

use crate::error::Result;
use crate::pool::{create_pool, DbConfig};
use crate::schema::ensure_schema;
use sqlx::SqlitePool;

#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub async fn open(config: DbConfig) -> Result<Self> {
        let pool = create_pool(config).await?;
        ensure_schema(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn open_in_memory() -> Result<Self> {
        Self::open(DbConfig::memory()).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
