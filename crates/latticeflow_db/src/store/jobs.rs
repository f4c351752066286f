//! Job queue repository (spec.md §4.1).
//!
//! `dequeue` is the atomic-claim seam the whole worker fleet depends on:
//! grounded on the teacher's conditional `UPDATE ... WHERE status =
//! 'QUEUED'` claim pattern (`casparian_sentinel::db::queue::JobQueue::pop_job`),
//! run inside a transaction so the candidate-select and the claiming
//! update observe the same row under SQLite's single-writer semantics.

use super::Store;
use crate::error::Result;
use crate::models::jobs::{Job, JobStatus, JobType, QueueStatsByStatus};
use chrono::Utc;
use latticeflow_core::backoff::job_retry_backoff_secs;
use latticeflow_core::error::Retry;
use latticeflow_core::ids::JobId;

pub struct EnqueueRequest {
    pub job_type: JobType,
    pub design_id: Option<String>,
    pub channel_id: Option<String>,
    pub payload_json: Option<String>,
    pub priority: i64,
    pub max_attempts: i64,
    pub display_name: Option<String>,
}

impl Default for EnqueueRequest {
    fn default() -> Self {
        Self {
            job_type: JobType::DownloadDesign,
            design_id: None,
            channel_id: None,
            payload_json: None,
            priority: 0,
            max_attempts: 3,
            display_name: None,
        }
    }
}

impl Store {
    pub async fn enqueue(&self, req: EnqueueRequest) -> Result<Job> {
        let id = JobId::new().to_string();
        sqlx::query(
            "INSERT INTO jobs
                (id, job_type, status, priority, max_attempts, design_id, channel_id, payload_json, display_name)
             VALUES (?, ?, 'QUEUED', ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(req.job_type)
        .bind(req.priority)
        .bind(req.max_attempts)
        .bind(&req.design_id)
        .bind(&req.channel_id)
        .bind(&req.payload_json)
        .bind(&req.display_name)
        .execute(self.pool())
        .await?;

        self.get_job(&id).await
    }

    pub async fn get_job(&self, id: &str) -> Result<Job> {
        sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_one(self.pool())
            .await
            .map_err(Into::into)
    }

    /// Claims the single highest-priority-then-oldest QUEUED job whose
    /// type is in `types` (any type when empty) and whose backoff window
    /// has elapsed. Returns `None` when nothing is eligible.
    pub async fn dequeue(&self, types: &[JobType]) -> Result<Option<Job>> {
        let mut tx = self.pool().begin().await?;

        let candidates: Vec<(String, i64)> =
            sqlx::query_as("SELECT id, attempts FROM jobs WHERE status = 'QUEUED' ORDER BY priority DESC, created_at ASC")
                .fetch_all(&mut *tx)
                .await?;

        let mut claimed_id = None;
        for (id, attempts) in candidates {
            if !types.is_empty() {
                let job_type: JobType =
                    sqlx::query_scalar("SELECT job_type FROM jobs WHERE id = ?")
                        .bind(&id)
                        .fetch_one(&mut *tx)
                        .await?;
                if !types.contains(&job_type) {
                    continue;
                }
            }

            let retry_index = attempts.saturating_sub(1).max(0) as u32;
            let backoff_secs = job_retry_backoff_secs(retry_index);
            let eligible: bool = sqlx::query_scalar(
                "SELECT finished_at IS NULL
                    OR (julianday('now') - julianday(finished_at)) * 86400.0 > ?
                 FROM jobs WHERE id = ?",
            )
            .bind(backoff_secs as f64)
            .bind(&id)
            .fetch_one(&mut *tx)
            .await?;
            if !eligible {
                continue;
            }

            let affected = sqlx::query(
                "UPDATE jobs SET status = 'RUNNING', started_at = datetime('now'), attempts = attempts + 1
                 WHERE id = ? AND status = 'QUEUED'",
            )
            .bind(&id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

            if affected == 1 {
                claimed_id = Some(id);
                break;
            }
        }

        tx.commit().await?;

        match claimed_id {
            Some(id) => Ok(Some(self.get_job(&id).await?)),
            None => Ok(None),
        }
    }

    /// Success marks SUCCESS. Failure requeues (status <- QUEUED) while
    /// `attempts < max_attempts`, otherwise marks FAILED; a
    /// `Retry::NonRetryable` failure marks FAILED immediately regardless
    /// of the attempt count. Terminal failure of a design-related job
    /// fails the owning Design too.
    pub async fn complete(
        &self,
        job_id: &str,
        success: bool,
        error: Option<String>,
        result_json: Option<String>,
        retry: Retry,
    ) -> Result<Job> {
        let job = self.get_job(job_id).await?;

        if success {
            sqlx::query(
                "UPDATE jobs SET status = 'SUCCESS', finished_at = datetime('now'),
                    last_error = NULL, result_json = ? WHERE id = ?",
            )
            .bind(&result_json)
            .bind(job_id)
            .execute(self.pool())
            .await?;
            return self.get_job(job_id).await;
        }

        let truncated = error
            .as_deref()
            .map(|e| latticeflow_core::error::truncate(e, 500));

        if job.attempts < job.max_attempts && retry == Retry::Retryable {
            sqlx::query(
                "UPDATE jobs SET status = 'QUEUED', started_at = NULL,
                    finished_at = datetime('now'), last_error = ? WHERE id = ?",
            )
            .bind(&truncated)
            .bind(job_id)
            .execute(self.pool())
            .await?;
        } else {
            sqlx::query(
                "UPDATE jobs SET status = 'FAILED', finished_at = datetime('now'),
                    last_error = ? WHERE id = ?",
            )
            .bind(&truncated)
            .bind(job_id)
            .execute(self.pool())
            .await?;

            if job.job_type.is_design_related() {
                if let Some(design_id) = &job.design_id {
                    sqlx::query(
                        "UPDATE designs SET status = 'FAILED', updated_at = datetime('now') WHERE id = ?",
                    )
                    .bind(design_id)
                    .execute(self.pool())
                    .await?;
                }
            }
        }

        self.get_job(job_id).await
    }

    pub async fn update_progress(
        &self,
        job_id: &str,
        current: i64,
        total: Option<i64>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE jobs SET progress_current = ?, progress_total = COALESCE(?, progress_total) WHERE id = ?",
        )
        .bind(current)
        .bind(total)
        .bind(job_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn requeue_stale(&self, threshold_minutes: i64) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'QUEUED', started_at = NULL
             WHERE status = 'RUNNING'
               AND started_at IS NOT NULL
               AND (julianday('now') - julianday(started_at)) * 1440.0 > ?",
        )
        .bind(threshold_minutes as f64)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected())
    }

    /// Every RUNNING job unconditionally requeues; run once at process
    /// start so a crash never leaves a job claimed forever.
    pub async fn recover_orphaned(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'QUEUED', started_at = NULL,
                last_error = 'interrupted by restart'
             WHERE status = 'RUNNING'",
        )
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn cancel_jobs_for_design(&self, design_id: &str) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'CANCELED', finished_at = datetime('now')
             WHERE design_id = ? AND status IN ('QUEUED', 'RUNNING')",
        )
        .bind(design_id)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn cancel_jobs_for_import_source(
        &self,
        source_id: &str,
        record_ids: Option<&[String]>,
    ) -> Result<u64> {
        let source_needle = format!("%\"import_source_id\":\"{source_id}\"%");
        let record_ids = record_ids.unwrap_or(&[]);

        if record_ids.is_empty() {
            let result = sqlx::query(
                "UPDATE jobs SET status = 'CANCELED', finished_at = datetime('now')
                 WHERE status IN ('QUEUED', 'RUNNING') AND payload_json LIKE ?",
            )
            .bind(&source_needle)
            .execute(self.pool())
            .await?;
            return Ok(result.rows_affected());
        }

        let record_clauses = record_ids
            .iter()
            .map(|_| "payload_json LIKE ?")
            .collect::<Vec<_>>()
            .join(" OR ");
        let sql = format!(
            "UPDATE jobs SET status = 'CANCELED', finished_at = datetime('now')
             WHERE status IN ('QUEUED', 'RUNNING') AND payload_json LIKE ? AND ({record_clauses})"
        );
        let mut query = sqlx::query(&sql).bind(&source_needle);
        for id in record_ids {
            query = query.bind(format!("%\"import_record_id\":\"{id}\"%"));
        }
        let result = query.execute(self.pool()).await?;
        Ok(result.rows_affected())
    }

    pub async fn get_queue_stats(&self) -> Result<QueueStatsByStatus> {
        sqlx::query_as(
            "SELECT
                SUM(CASE WHEN status = 'QUEUED' THEN 1 ELSE 0 END) AS queued,
                SUM(CASE WHEN status = 'RUNNING' THEN 1 ELSE 0 END) AS running,
                SUM(CASE WHEN status = 'SUCCESS' THEN 1 ELSE 0 END) AS success,
                SUM(CASE WHEN status = 'FAILED' THEN 1 ELSE 0 END) AS failed,
                SUM(CASE WHEN status = 'CANCELED' THEN 1 ELSE 0 END) AS canceled
             FROM jobs",
        )
        .fetch_one(self.pool())
        .await
        .map_err(Into::into)
    }

    /// spec.md §4.14 step 1: design-related jobs that never got a
    /// design id attached are dead weight, not retryable work.
    pub async fn delete_orphan_jobs(&self) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM jobs
             WHERE design_id IS NULL
               AND job_type != 'SYNC_IMPORT_SOURCE'
               AND status IN ('FAILED', 'QUEUED')",
        )
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected())
    }

    /// spec.md §4.14 step 5: FAILED jobs whose error looks transient and
    /// that still have retry budget get one more chance.
    pub async fn retry_transient_failures(&self, older_than_minutes: i64) -> Result<u64> {
        const TRANSIENT_MARKERS: &[&str] =
            &["timeout", "timed out", "rate limit", "connection", "network", "temporarily unavailable"];

        let candidates: Vec<(String, Option<String>)> = sqlx::query_as(
            "SELECT id, last_error FROM jobs
             WHERE status = 'FAILED'
               AND attempts < max_attempts
               AND finished_at IS NOT NULL
               AND (julianday('now') - julianday(finished_at)) * 1440.0 > ?",
        )
        .bind(older_than_minutes as f64)
        .fetch_all(self.pool())
        .await?;

        let mut retried = 0u64;
        for (id, last_error) in candidates {
            let is_transient = last_error
                .as_deref()
                .map(|e| {
                    let lower = e.to_ascii_lowercase();
                    TRANSIENT_MARKERS.iter().any(|marker| lower.contains(marker))
                })
                .unwrap_or(false);
            if !is_transient {
                continue;
            }
            sqlx::query(
                "UPDATE jobs SET status = 'QUEUED', started_at = NULL, finished_at = NULL WHERE id = ?",
            )
            .bind(&id)
            .execute(self.pool())
            .await?;
            retried += 1;
        }
        Ok(retried)
    }

    /// spec.md §6 `/queue` list: newest-first, optionally filtered by
    /// status, paginated.
    pub async fn list_jobs(
        &self,
        status: Option<JobStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Job>> {
        match status {
            Some(status) => sqlx::query_as::<_, Job>(
                "SELECT * FROM jobs WHERE status = ? ORDER BY created_at DESC LIMIT ? OFFSET ?",
            )
            .bind(status)
            .bind(limit)
            .bind(offset)
            .fetch_all(self.pool())
            .await
            .map_err(Into::into),
            None => sqlx::query_as::<_, Job>(
                "SELECT * FROM jobs ORDER BY created_at DESC LIMIT ? OFFSET ?",
            )
            .bind(limit)
            .bind(offset)
            .fetch_all(self.pool())
            .await
            .map_err(Into::into),
        }
    }

    /// spec.md §6 `/queue` update priority: only a still-QUEUED job can
    /// have its place in line changed; a RUNNING or terminal job ignores it.
    pub async fn set_job_priority(&self, job_id: &str, priority: i64) -> Result<bool> {
        let result = sqlx::query("UPDATE jobs SET priority = ? WHERE id = ? AND status = 'QUEUED'")
            .bind(priority)
            .bind(job_id)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() == 1)
    }

    /// spec.md §4.1: cancels the job and, for design-related jobs,
    /// resets the owning Design back to DISCOVERED.
    pub async fn cancel_job(&self, job_id: &str) -> Result<bool> {
        let job = self.get_job(job_id).await?;
        let result = sqlx::query(
            "UPDATE jobs SET status = 'CANCELED', finished_at = datetime('now')
             WHERE id = ? AND status IN ('QUEUED', 'RUNNING')",
        )
        .bind(job_id)
        .execute(self.pool())
        .await?;
        let canceled = result.rows_affected() == 1;

        if canceled && job.job_type.is_design_related() {
            if let Some(design_id) = &job.design_id {
                sqlx::query(
                    "UPDATE designs SET status = 'DISCOVERED', updated_at = datetime('now') WHERE id = ?",
                )
                .bind(design_id)
                .execute(self.pool())
                .await?;
            }
        }

        Ok(canceled)
    }

    /// spec.md §7: "degraded ... >50 failed jobs in last 24 h".
    pub async fn count_failed_jobs_since(&self, hours: i64) -> Result<i64> {
        sqlx::query_scalar(
            "SELECT count(*) FROM jobs
             WHERE status = 'FAILED'
               AND finished_at IS NOT NULL
               AND (julianday('now') - julianday(finished_at)) * 24.0 <= ?",
        )
        .bind(hours as f64)
        .fetch_one(self.pool())
        .await
        .map_err(Into::into)
    }

    pub async fn has_pending_sync_job(&self, import_source_id: &str) -> Result<bool> {
        let needle = format!("%\"import_source_id\":\"{import_source_id}\"%");
        let count: i64 = sqlx::query_scalar(
            "SELECT count(*) FROM jobs
             WHERE job_type = 'SYNC_IMPORT_SOURCE'
               AND status IN ('QUEUED', 'RUNNING')
               AND payload_json LIKE ?",
        )
        .bind(needle)
        .fetch_one(self.pool())
        .await?;
        Ok(count > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> Store {
        Store::open_in_memory().await.unwrap()
    }

    #[tokio::test]
    async fn enqueue_then_dequeue_claims_exactly_once() {
        let store = store().await;
        store
            .enqueue(EnqueueRequest {
                job_type: JobType::DownloadDesign,
                ..Default::default()
            })
            .await
            .unwrap();

        let claimed = store.dequeue(&[]).await.unwrap().expect("one job");
        assert_eq!(claimed.status, JobStatus::Running);
        assert_eq!(claimed.attempts, 1);

        let second = store.dequeue(&[]).await.unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn dequeue_respects_type_filter() {
        let store = store().await;
        store
            .enqueue(EnqueueRequest {
                job_type: JobType::SyncImportSource,
                ..Default::default()
            })
            .await
            .unwrap();

        let claimed = store.dequeue(&[JobType::DownloadDesign]).await.unwrap();
        assert!(claimed.is_none());
    }

    #[tokio::test]
    async fn dequeue_prefers_higher_priority() {
        let store = store().await;
        store
            .enqueue(EnqueueRequest {
                priority: 0,
                display_name: Some("low".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        store
            .enqueue(EnqueueRequest {
                priority: 5,
                display_name: Some("high".into()),
                ..Default::default()
            })
            .await
            .unwrap();

        let claimed = store.dequeue(&[]).await.unwrap().unwrap();
        assert_eq!(claimed.display_name.as_deref(), Some("high"));
    }

    #[tokio::test]
    async fn failed_attempt_under_cap_requeues() {
        let store = store().await;
        let job = store
            .enqueue(EnqueueRequest {
                max_attempts: 3,
                ..Default::default()
            })
            .await
            .unwrap();
        store.dequeue(&[]).await.unwrap();
        let after = store
            .complete(&job.id, false, Some("boom".into()), None, Retry::Retryable)
            .await
            .unwrap();
        assert_eq!(after.status, JobStatus::Queued);
        assert_eq!(after.last_error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn failed_attempt_at_cap_fails_terminally() {
        let store = store().await;
        let job = store
            .enqueue(EnqueueRequest {
                max_attempts: 1,
                ..Default::default()
            })
            .await
            .unwrap();
        store.dequeue(&[]).await.unwrap();
        let after = store
            .complete(&job.id, false, Some("boom".into()), None, Retry::Retryable)
            .await
            .unwrap();
        assert_eq!(after.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn non_retryable_failure_fails_immediately_under_cap() {
        let store = store().await;
        let job = store
            .enqueue(EnqueueRequest {
                max_attempts: 3,
                ..Default::default()
            })
            .await
            .unwrap();
        store.dequeue(&[]).await.unwrap();
        let after = store
            .complete(&job.id, false, Some("corrupted".into()), None, Retry::NonRetryable)
            .await
            .unwrap();
        assert_eq!(after.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn recover_orphaned_requeues_running_jobs() {
        let store = store().await;
        store.enqueue(EnqueueRequest::default()).await.unwrap();
        store.dequeue(&[]).await.unwrap();

        let recovered = store.recover_orphaned().await.unwrap();
        assert_eq!(recovered, 1);

        let stats = store.get_queue_stats().await.unwrap();
        assert_eq!(stats.queued, 1);
        assert_eq!(stats.running, 0);
    }

    #[tokio::test]
    async fn priority_change_is_rejected_once_running() {
        let store = store().await;
        let job = store.enqueue(EnqueueRequest::default()).await.unwrap();
        store.dequeue(&[]).await.unwrap();

        let applied = store.set_job_priority(&job.id, 9).await.unwrap();
        assert!(!applied);
        assert_eq!(store.get_job(&job.id).await.unwrap().priority, 0);
    }

    #[tokio::test]
    async fn priority_change_applies_while_queued() {
        let store = store().await;
        let job = store.enqueue(EnqueueRequest::default()).await.unwrap();

        let applied = store.set_job_priority(&job.id, 9).await.unwrap();
        assert!(applied);
        assert_eq!(store.get_job(&job.id).await.unwrap().priority, 9);
    }

    #[tokio::test]
    async fn list_jobs_filters_by_status_and_paginates() {
        let store = store().await;
        for _ in 0..3 {
            store.enqueue(EnqueueRequest::default()).await.unwrap();
        }
        let page = store.list_jobs(Some(JobStatus::Queued), 2, 0).await.unwrap();
        assert_eq!(page.len(), 2);
    }
}
