//! `/queue` (spec.md §6, §4.1).

use axum::extract::{Path, Query, State};
use axum::Json;
use latticeflow_db::models::jobs::JobStatus;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::state::AppState;

const DEFAULT_PAGE_SIZE: i64 = 50;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    status: Option<JobStatus>,
    #[serde(default)]
    page: Option<i64>,
    #[serde(default)]
    page_size: Option<i64>,
}

#[derive(Serialize)]
pub struct ListResponse {
    jobs: Vec<latticeflow_db::models::jobs::Job>,
    page: i64,
    page_size: i64,
}

pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ListResponse>, ApiError> {
    let page = query.page.unwrap_or(0).max(0);
    let page_size = query.page_size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, 200);
    let jobs = state.queue.list_jobs(query.status, page_size, page * page_size).await?;
    Ok(Json(ListResponse { jobs, page, page_size }))
}

pub async fn stats(
    State(state): State<AppState>,
) -> Result<Json<latticeflow_db::models::jobs::QueueStatsByStatus>, ApiError> {
    Ok(Json(state.queue.get_queue_stats().await?))
}

#[derive(Debug, Deserialize)]
pub struct UpdatePriorityRequest {
    priority: i64,
}

/// spec.md §6: "priority change allowed only on QUEUED".
pub async fn update_priority(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Json(req): Json<UpdatePriorityRequest>,
) -> Result<(), ApiError> {
    let applied = state.queue.set_priority(&job_id, req.priority).await?;
    if !applied {
        return Err(ApiError::BadRequest(format!(
            "job {job_id} is not QUEUED, priority can no longer be changed"
        )));
    }
    Ok(())
}

pub async fn cancel(State(state): State<AppState>, Path(job_id): Path<String>) -> Result<(), ApiError> {
    let canceled = state.queue.cancel_job(&job_id).await?;
    if !canceled {
        return Err(ApiError::NotFound(format!("job {job_id} not found or already terminal")));
    }
    Ok(())
}
