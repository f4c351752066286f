//! Channel / Message / Attachment (spec.md §3, chat-platform ingest).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DownloadMode {
    Manual,
    DownloadAllNew,
    DownloadAll,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    pub peer_id: String,
    pub username: Option<String>,
    pub title: String,
    pub last_ingested_message_id: Option<i64>,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub download_mode: DownloadMode,
    pub download_mode_enabled_at: Option<DateTime<Utc>>,
    pub enabled: bool,
    pub template_override: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Channel {
    /// Invariant from spec.md §3: `enabled ∧ mode ≠ MANUAL ⇒ subscribed`.
    pub fn should_subscribe(&self) -> bool {
        self.enabled && self.download_mode != DownloadMode::Manual
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub channel_id: String,
    pub upstream_message_id: i64,
    pub caption_raw: Option<String>,
    pub caption_normalized: Option<String>,
    pub posted_at: DateTime<Utc>,
    pub author_label: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
pub enum AttachmentType {
    Photo,
    Video,
    Document,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttachmentDownloadStatus {
    None,
    Downloading,
    Downloaded,
    Failed,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    pub message_id: String,
    pub upstream_file_id: String,
    pub attachment_type: AttachmentType,
    pub filename: Option<String>,
    pub extension: Option<String>,
    pub size_bytes: Option<i64>,
    pub mime_type: Option<String>,
    pub is_candidate_design_file: bool,
    pub download_status: AttachmentDownloadStatus,
    pub content_hash: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Extensions spec.md §3 treats as plausible 3D-print model payloads,
/// driving `Attachment.is_candidate_design_file`.
pub const CANDIDATE_DESIGN_EXTENSIONS: &[&str] = &[
    "stl", "3mf", "obj", "step", "stp", "zip", "7z", "rar", "tar", "gz",
];

pub fn is_candidate_design_extension(ext: &str) -> bool {
    CANDIDATE_DESIGN_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_mode_does_not_subscribe() {
        let ch = Channel {
            id: "c".into(),
            peer_id: "p".into(),
            username: None,
            title: "t".into(),
            last_ingested_message_id: None,
            last_sync_at: None,
            download_mode: DownloadMode::Manual,
            download_mode_enabled_at: None,
            enabled: true,
            template_override: None,
            created_at: Utc::now(),
        };
        assert!(!ch.should_subscribe());
    }

    #[test]
    fn candidate_extensions_are_case_insensitive() {
        assert!(is_candidate_design_extension("ZIP"));
        assert!(!is_candidate_design_extension("mp4"));
    }
}
