//! Job queue facade (spec.md §4.1).
//!
//! Grounded on the teacher's `casparian_sentinel::db::queue::JobQueue`
//! wrapper around its store: a thin layer over `latticeflow_db::Store`
//! that additionally publishes a `DomainEvent` on every status
//! transition, since the store itself has no knowledge of the event bus.

use crate::events::{DomainEvent, EventBus};
use latticeflow_core::error::Retry;
use latticeflow_db::models::jobs::{Job, JobType, QueueStatsByStatus};
use latticeflow_db::store::jobs::EnqueueRequest;
use latticeflow_db::{Result, Store};
use std::sync::Arc;

#[derive(Clone)]
pub struct JobQueue {
    store: Arc<Store>,
    events: Arc<EventBus>,
}

impl JobQueue {
    pub fn new(store: Arc<Store>, events: Arc<EventBus>) -> Self {
        Self { store, events }
    }

    pub async fn enqueue(&self, req: EnqueueRequest) -> Result<Job> {
        let job = self.store.enqueue(req).await?;
        self.publish_transition(&job);
        Ok(job)
    }

    pub async fn dequeue(&self, types: &[JobType]) -> Result<Option<Job>> {
        let claimed = self.store.dequeue(types).await?;
        if let Some(job) = &claimed {
            self.publish_transition(job);
        }
        Ok(claimed)
    }

    pub async fn complete(
        &self,
        job_id: &str,
        success: bool,
        error: Option<String>,
        result_json: Option<String>,
        retry: Retry,
    ) -> Result<Job> {
        let job = self.store.complete(job_id, success, error, result_json, retry).await?;
        self.publish_transition(&job);
        Ok(job)
    }

    pub async fn update_progress(&self, job_id: &str, current: i64, total: Option<i64>) -> Result<()> {
        self.store.update_progress(job_id, current, total).await
    }

    pub async fn requeue_stale(&self, threshold_minutes: i64) -> Result<u64> {
        self.store.requeue_stale(threshold_minutes).await
    }

    pub async fn recover_orphaned(&self) -> Result<u64> {
        self.store.recover_orphaned().await
    }

    pub async fn cancel_jobs_for_design(&self, design_id: &str) -> Result<u64> {
        self.store.cancel_jobs_for_design(design_id).await
    }

    pub async fn cancel_jobs_for_import_source(
        &self,
        source_id: &str,
        record_ids: Option<&[String]>,
    ) -> Result<u64> {
        self.store.cancel_jobs_for_import_source(source_id, record_ids).await
    }

    pub async fn get_queue_stats(&self) -> Result<QueueStatsByStatus> {
        self.store.get_queue_stats().await
    }

    pub async fn list_jobs(
        &self,
        status: Option<latticeflow_db::models::jobs::JobStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Job>> {
        self.store.list_jobs(status, limit, offset).await
    }

    /// spec.md §6 `/queue` update priority: only QUEUED jobs accept a
    /// change, so a caller can't silently reorder something already RUNNING.
    pub async fn set_priority(&self, job_id: &str, priority: i64) -> Result<bool> {
        self.store.set_job_priority(job_id, priority).await
    }

    pub async fn cancel_job(&self, job_id: &str) -> Result<bool> {
        let canceled = self.store.cancel_job(job_id).await?;
        if canceled {
            let job = self.store.get_job(job_id).await?;
            self.publish_transition(&job);
        }
        Ok(canceled)
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    fn publish_transition(&self, job: &Job) {
        self.events.publish(DomainEvent::JobTransitioned {
            job_id: job.id.clone(),
            job_type: job.job_type,
            status: job.status,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use latticeflow_db::models::jobs::JobStatus;

    async fn queue() -> JobQueue {
        let store = Arc::new(Store::open_in_memory().await.unwrap());
        JobQueue::new(store, Arc::new(EventBus::new()))
    }

    #[tokio::test]
    async fn enqueue_publishes_a_queued_transition() {
        let q = queue().await;
        let mut rx = q.events.subscribe();
        q.enqueue(EnqueueRequest::default()).await.unwrap();

        let DomainEvent::JobTransitioned { status, .. } = rx.recv().await.unwrap() else {
            panic!("wrong variant");
        };
        assert_eq!(status, JobStatus::Queued);
    }

    #[tokio::test]
    async fn dequeue_publishes_a_running_transition() {
        let q = queue().await;
        q.enqueue(EnqueueRequest::default()).await.unwrap();
        let mut rx = q.events.subscribe();

        q.dequeue(&[]).await.unwrap();

        let DomainEvent::JobTransitioned { status, .. } = rx.recv().await.unwrap() else {
            panic!("wrong variant");
        };
        assert_eq!(status, JobStatus::Running);
    }
}
