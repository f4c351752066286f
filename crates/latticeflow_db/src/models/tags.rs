//! Tag (spec.md §4.11, §4.13): free-text labels attached to a Design,
//! tracked by who/what attached them so AI re-tagging can be skipped
//! once it has already run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TagSource {
    Manual,
    AutoImport,
    AutoAi,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Tag {
    pub id: String,
    pub design_id: String,
    pub value: String,
    pub source: TagSource,
    pub created_at: DateTime<Utc>,
}
