//! ImportSource / ImportRecord / ImportProfile (spec.md §3, §4.5, §4.6).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImportSourceKind {
    BulkFolder,
    CloudDrive,
    Forum,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImportSourceStatus {
    Active,
    Paused,
    Error,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ImportSource {
    pub id: String,
    pub kind: ImportSourceKind,
    pub display_name: String,
    pub status: ImportSourceStatus,
    /// JSON blob, shape depends on `kind` (root path, OAuth folder id, forum board url, ...).
    pub config_json: String,
    /// Encrypted credential blob, see `latticeflow_security::credentials`.
    pub credential_id: Option<String>,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_sync_cursor: Option<String>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImportRecordStatus {
    Discovered,
    Wanted,
    Ignored,
    Imported,
    Failed,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ImportRecord {
    pub id: String,
    pub import_source_id: String,
    /// Stable per-source handle: relative path for bulk-folder, file/folder
    /// id for cloud-drive, topic id for forum.
    pub upstream_ref: String,
    pub title: String,
    pub status: ImportRecordStatus,
    /// spec.md §4.12 content fingerprint, used for duplicate-free re-sync.
    pub content_fingerprint: Option<String>,
    pub design_id: Option<String>,
    pub discovered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Detected archetype for a bulk-folder import source (spec.md §4.5):
/// governs how `ImportRecord`s are carved out of the folder tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImportProfileShape {
    /// Each immediate child directory is one design.
    OneDirPerDesign,
    /// Model files sit loose at the root; each file is its own design.
    FlatFiles,
    /// Mixture of both; the scanner falls back to per-entry heuristics.
    Mixed,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ImportProfile {
    pub id: String,
    pub import_source_id: String,
    pub shape: ImportProfileShape,
    pub sample_size: i64,
    pub confidence: f64,
    pub detected_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn import_record_status_round_trips_serde() {
        let json = serde_json::to_string(&ImportRecordStatus::Discovered).unwrap();
        assert_eq!(json, "\"DISCOVERED\"");
    }
}
