//! Job Queue row shape (spec.md §3 Job, §4.1).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    DownloadDesign,
    DownloadImportRecord,
    ExtractArchive,
    ImportToLibrary,
    GenerateRender,
    DownloadTelegramImages,
    AiAnalyze,
    SyncImportSource,
}

impl JobType {
    /// Spec §4.1: "design-related type" — governs orphan cleanup and
    /// the terminal-failure → Design FAILED transition (§4.1, §7).
    pub fn is_design_related(self) -> bool {
        !matches!(self, JobType::SyncImportSource)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Queued,
    Running,
    Success,
    Failed,
    Canceled,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    #[sqlx(rename = "job_type")]
    pub job_type: JobType,
    pub status: JobStatus,
    pub priority: i64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub attempts: i64,
    pub max_attempts: i64,
    pub last_error: Option<String>,
    pub progress_current: i64,
    pub progress_total: Option<i64>,
    pub design_id: Option<String>,
    pub channel_id: Option<String>,
    pub payload_json: Option<String>,
    pub result_json: Option<String>,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, FromRow)]
pub struct QueueStatsByStatus {
    pub queued: i64,
    pub running: i64,
    pub success: i64,
    pub failed: i64,
    pub canceled: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_import_source_is_not_design_related() {
        assert!(!JobType::SyncImportSource.is_design_related());
        assert!(JobType::DownloadDesign.is_design_related());
    }
}
