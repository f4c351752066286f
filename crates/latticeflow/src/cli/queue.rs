//! `latticeflow queue` — inspect or edit the job queue without going
//! through the REST API.

use clap::{Args, Subcommand};
use latticeflow_core::paths::DataLayout;
use latticeflow_db::models::jobs::JobStatus;
use latticeflow_db::pool::DbConfig;
use latticeflow_db::Store;
use latticeflow_queue::{events::EventBus, JobQueue};
use std::sync::Arc;

#[derive(Args)]
pub struct QueueArgs {
    #[command(subcommand)]
    command: QueueCommand,
}

#[derive(Subcommand)]
enum QueueCommand {
    /// List jobs, optionally filtered by status (queued/running/success/failed/canceled).
    List {
        #[arg(long)]
        status: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },
    /// Print queue counts per status.
    Stats,
    /// Cancel a QUEUED or RUNNING job.
    Cancel { job_id: String },
    /// Change a QUEUED job's priority.
    Priority { job_id: String, priority: i64 },
}

fn parse_status(raw: &str) -> anyhow::Result<JobStatus> {
    match raw.to_ascii_lowercase().as_str() {
        "queued" => Ok(JobStatus::Queued),
        "running" => Ok(JobStatus::Running),
        "success" => Ok(JobStatus::Success),
        "failed" => Ok(JobStatus::Failed),
        "canceled" | "cancelled" => Ok(JobStatus::Canceled),
        other => anyhow::bail!("unknown job status '{other}'"),
    }
}

pub async fn run(layout: DataLayout, args: QueueArgs) -> anyhow::Result<()> {
    let store = Arc::new(Store::open(DbConfig::file(layout.db_path())).await?);
    let queue = JobQueue::new(store.clone(), Arc::new(EventBus::new()));

    match args.command {
        QueueCommand::List { status, limit } => {
            let status = status.map(|s| parse_status(&s)).transpose()?;
            for job in queue.list_jobs(status, limit, 0).await? {
                println!("{}\t{:?}\t{:?}\tpriority={}", job.id, job.job_type, job.status, job.priority);
            }
        }
        QueueCommand::Stats => {
            let stats = queue.get_queue_stats().await?;
            println!("{stats:#?}");
        }
        QueueCommand::Cancel { job_id } => {
            let canceled = queue.cancel_job(&job_id).await?;
            println!("{}", if canceled { "canceled" } else { "not cancelable (not queued/running)" });
        }
        QueueCommand::Priority { job_id, priority } => {
            let updated = queue.set_priority(&job_id, priority).await?;
            println!("{}", if updated { "updated" } else { "not updatable (not queued)" });
        }
    }
    Ok(())
}
