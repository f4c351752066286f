//! Cleanup/Maintenance actions (spec.md §4.14): run periodically by the
//! worker manager's maintenance loop and callable on demand.

use latticeflow_core::paths::DataLayout;
use latticeflow_db::Store;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const STUCK_RUNNING_THRESHOLD_MINUTES: i64 = 4 * 60;
const TRANSIENT_RETRY_AGE_MINUTES: i64 = 30;
const STALE_STAGING_DIR_AGE: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Default, Clone, Copy)]
pub struct CleanupReport {
    pub orphan_jobs_deleted: u64,
    pub stuck_jobs_requeued: u64,
    pub import_records_reset: u64,
    pub staging_dirs_removed: u64,
    pub transient_failures_retried: u64,
}

/// Grounded on the teacher's `casparian_sentinel` maintenance sweep:
/// a handful of independent idempotent passes run back-to-back, each
/// logging what it did rather than failing the whole sweep on one error.
pub struct CleanupService {
    store: Arc<Store>,
    layout: Arc<DataLayout>,
}

impl CleanupService {
    pub fn new(store: Arc<Store>, layout: Arc<DataLayout>) -> Self {
        Self { store, layout }
    }

    pub async fn run_once(&self) -> CleanupReport {
        let mut report = CleanupReport::default();

        match self.store.delete_orphan_jobs().await {
            Ok(n) => report.orphan_jobs_deleted = n,
            Err(e) => warn!(error = %e, "cleanup: deleting orphan jobs failed"),
        }

        match self.store.requeue_stale(STUCK_RUNNING_THRESHOLD_MINUTES).await {
            Ok(n) => report.stuck_jobs_requeued = n,
            Err(e) => warn!(error = %e, "cleanup: requeuing stuck jobs failed"),
        }

        match self.store.reset_orphaned_import_records().await {
            Ok(n) => report.import_records_reset = n,
            Err(e) => warn!(error = %e, "cleanup: resetting orphaned import records failed"),
        }

        match self.store.retry_transient_failures(TRANSIENT_RETRY_AGE_MINUTES).await {
            Ok(n) => report.transient_failures_retried = n,
            Err(e) => warn!(error = %e, "cleanup: retrying transient failures failed"),
        }

        report.staging_dirs_removed = self.remove_stale_staging_dirs().await;

        info!(
            orphan_jobs_deleted = report.orphan_jobs_deleted,
            stuck_jobs_requeued = report.stuck_jobs_requeued,
            import_records_reset = report.import_records_reset,
            staging_dirs_removed = report.staging_dirs_removed,
            transient_failures_retried = report.transient_failures_retried,
            "cleanup sweep complete",
        );
        report
    }

    /// Removes `staging/*` directories older than 24h that don't match a
    /// live Design id, skipping `gdrive_*` directories (an in-progress
    /// cloud-drive download has no Design yet, so it would always look
    /// orphaned by id alone).
    async fn remove_stale_staging_dirs(&self) -> u64 {
        let live_ids: std::collections::HashSet<String> =
            match self.store.list_design_ids().await {
                Ok(ids) => ids.into_iter().collect(),
                Err(e) => {
                    warn!(error = %e, "cleanup: listing live design ids failed");
                    return 0;
                }
            };

        let staging_root = self.layout.staging_root();
        let mut removed = 0u64;
        let mut read_dir = match tokio::fs::read_dir(&staging_root).await {
            Ok(rd) => rd,
            Err(_) => return 0,
        };

        while let Ok(Some(entry)) = read_dir.next_entry().await {
            let Ok(file_type) = entry.file_type().await else { continue };
            if !file_type.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with("gdrive_") {
                continue;
            }
            if live_ids.contains(&name) {
                continue;
            }
            let Ok(metadata) = entry.metadata().await else { continue };
            let Ok(age) = metadata.modified().and_then(|m| m.elapsed().map_err(std::io::Error::other)) else {
                continue;
            };
            if age < STALE_STAGING_DIR_AGE {
                continue;
            }
            if tokio::fs::remove_dir_all(entry.path()).await.is_ok() {
                removed += 1;
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_once_deletes_orphan_jobs() {
        let store = Arc::new(Store::open_in_memory().await.unwrap());
        let layout = Arc::new(DataLayout::from_root(std::env::temp_dir().join(format!(
            "latticeflow-cleanup-test-{}",
            uuid::Uuid::new_v4()
        ))));
        tokio::fs::create_dir_all(layout.staging_root()).await.unwrap();

        store
            .enqueue(latticeflow_db::store::jobs::EnqueueRequest {
                job_type: latticeflow_db::models::jobs::JobType::ExtractArchive,
                design_id: None,
                ..Default::default()
            })
            .await
            .unwrap();

        let service = CleanupService::new(store, layout);
        let report = service.run_once().await;
        assert_eq!(report.orphan_jobs_deleted, 1);
    }
}
