//! Worker loop and manager (spec.md §4.2).
//!
//! Grounded on the teacher's `casparian_worker::worker::Worker` for the
//! poll → claim → process → complete loop shape and the `running: bool`
//! flag flipped by a signal handler, with the ZeroMQ dealer-socket
//! transport replaced by direct `JobQueue` polling (spec.md's worker
//! fleet is in-process, single-node).

use async_trait::async_trait;
use latticeflow_core::error::{JobError, Retry};
use latticeflow_db::models::jobs::{Job, JobType};
use latticeflow_queue::JobQueue;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[async_trait]
pub trait JobHandler: Send + Sync {
    fn job_types(&self) -> &[JobType];

    async fn process(&self, job: &Job) -> Result<Option<String>, JobError>;
}

pub struct WorkerLoop {
    name: String,
    queue: JobQueue,
    handler: Arc<dyn JobHandler>,
    poll_interval: Duration,
    shutdown: Arc<AtomicBool>,
}

impl WorkerLoop {
    pub fn new(
        name: impl Into<String>,
        queue: JobQueue,
        handler: Arc<dyn JobHandler>,
        poll_interval: Duration,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            name: name.into(),
            queue,
            handler,
            poll_interval,
            shutdown,
        }
    }

    pub async fn run(&self) {
        info!(worker = %self.name, "worker loop started");
        while !self.shutdown.load(Ordering::Relaxed) {
            match self.queue.dequeue(self.handler.job_types()).await {
                Ok(Some(job)) => self.process_one(job).await,
                Ok(None) => tokio::time::sleep(self.poll_interval).await,
                Err(err) => {
                    error!(worker = %self.name, error = %err, "dequeue failed");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
        info!(worker = %self.name, "worker loop stopped");
    }

    async fn process_one(&self, job: Job) {
        let job_id = job.id.clone();
        let outcome = self.handler.process(&job).await;
        let result = match outcome {
            Ok(result_json) => {
                self.queue
                    .complete(&job_id, true, None, result_json, Retry::Retryable)
                    .await
            }
            Err(err) => {
                warn!(worker = %self.name, job = %job_id, error = %err.truncated_message(), "job failed");
                self.queue
                    .complete(&job_id, false, Some(err.truncated_message()), None, err.retry)
                    .await
            }
        };
        if let Err(err) = result {
            error!(worker = %self.name, job = %job_id, error = %err, "failed to record job completion");
        }
    }
}

/// Owns every worker loop and the shared shutdown flag; grounded on the
/// teacher's signal-hook wiring (`casparian/src/cli`, `signal-hook`).
pub struct WorkerManager {
    shutdown: Arc<AtomicBool>,
    handles: Vec<tokio::task::JoinHandle<()>>,
}

impl WorkerManager {
    pub fn new() -> Self {
        Self {
            shutdown: Arc::new(AtomicBool::new(false)),
            handles: Vec::new(),
        }
    }

    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    pub fn spawn(
        &mut self,
        name: impl Into<String>,
        queue: JobQueue,
        handler: Arc<dyn JobHandler>,
        poll_interval: Duration,
    ) {
        let loop_ = WorkerLoop::new(name, queue, handler, poll_interval, self.shutdown.clone());
        self.handles.push(tokio::spawn(async move { loop_.run().await }));
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Waits for every worker to notice shutdown and finish its current
    /// job, forcing a hard stop after `grace` (default 30s, spec.md §4.2).
    pub async fn join_with_grace(self, grace: Duration) {
        let join_all = futures::future::join_all(self.handles);
        if tokio::time::timeout(grace, join_all).await.is_err() {
            warn!("worker manager grace period elapsed; some workers may still be running");
        }
    }
}

impl Default for WorkerManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use latticeflow_db::store::jobs::EnqueueRequest;
    use latticeflow_queue::EventBus;
    use std::sync::atomic::AtomicUsize;

    struct CountingHandler {
        types: Vec<JobType>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl JobHandler for CountingHandler {
        fn job_types(&self) -> &[JobType] {
            &self.types
        }

        async fn process(&self, _job: &Job) -> Result<Option<String>, JobError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Ok(None)
        }
    }

    #[tokio::test]
    async fn worker_loop_processes_one_enqueued_job_then_stops() {
        let store = Arc::new(latticeflow_db::Store::open_in_memory().await.unwrap());
        let queue = JobQueue::new(store, Arc::new(EventBus::new()));
        queue.enqueue(EnqueueRequest::default()).await.unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let handler = Arc::new(CountingHandler {
            types: vec![JobType::DownloadDesign],
            calls: calls.clone(),
        });
        let shutdown = Arc::new(AtomicBool::new(false));
        let loop_ = WorkerLoop::new("test", queue.clone(), handler, Duration::from_millis(10), shutdown.clone());

        let handle = tokio::spawn(async move { loop_.run().await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.store(true, Ordering::Relaxed);
        handle.await.unwrap();

        assert_eq!(calls.load(Ordering::Relaxed), 1);
        let stats = queue.get_queue_stats().await.unwrap();
        assert_eq!(stats.success, 1);
    }
}
