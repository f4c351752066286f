//! `/health`, `/health/detailed` (spec.md §6, §7): a 5s cache over a
//! handful of cheap probes, combined per the critical/degraded rules.

use axum::extract::State;
use axum::Json;
use serde::Serialize;
use std::time::Duration;
use sysinfo::Disks;

use crate::error::ApiError;
use crate::state::AppState;

/// spec.md §6: "5 s cache" for `/health` and `/health/detailed`.
pub const HEALTH_CACHE_TTL: Duration = Duration::from_secs(5);
const LOW_STORAGE_THRESHOLD_BYTES: u64 = 10 * 1024 * 1024 * 1024;
const FAILED_JOBS_DEGRADED_THRESHOLD: i64 = 50;
const BACKOFF_ENTITIES_DEGRADED_THRESHOLD: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct SubsystemStatus {
    pub name: String,
    pub status: Status,
    pub detail: Option<String>,
    pub critical: bool,
}

#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct HealthReport {
    pub status: Status,
    pub subsystems: Vec<SubsystemStatus>,
}

async fn probe_database(state: &AppState) -> SubsystemStatus {
    let status = match sqlx::query("SELECT 1").execute(state.store.pool()).await {
        Ok(_) => Status::Healthy,
        Err(e) => {
            return SubsystemStatus {
                name: "database".into(),
                status: Status::Unhealthy,
                detail: Some(e.to_string()),
                critical: true,
            }
        }
    };
    SubsystemStatus { name: "database".into(), status, detail: None, critical: true }
}

fn probe_workers(state: &AppState) -> SubsystemStatus {
    let status = if state.worker_shutdown_flag.load(std::sync::atomic::Ordering::Relaxed) {
        Status::Unhealthy
    } else {
        Status::Healthy
    };
    SubsystemStatus { name: "workers".into(), status, detail: None, critical: true }
}

async fn probe_queue_backlog(state: &AppState) -> SubsystemStatus {
    match state.store.count_failed_jobs_since(24).await {
        Ok(failed) if failed > FAILED_JOBS_DEGRADED_THRESHOLD => SubsystemStatus {
            name: "queue".into(),
            status: Status::Degraded,
            detail: Some(format!("{failed} failed jobs in the last 24h")),
            critical: false,
        },
        Ok(_) => SubsystemStatus { name: "queue".into(), status: Status::Healthy, detail: None, critical: false },
        Err(e) => SubsystemStatus {
            name: "queue".into(),
            status: Status::Unhealthy,
            detail: Some(e.to_string()),
            critical: false,
        },
    }
}

async fn probe_rate_limiters(state: &AppState) -> SubsystemStatus {
    let total = state.limiters.total_entities_in_backoff().await;
    if total > BACKOFF_ENTITIES_DEGRADED_THRESHOLD {
        SubsystemStatus {
            name: "rate_limiters".into(),
            status: Status::Degraded,
            detail: Some(format!("{total} entities in backoff")),
            critical: false,
        }
    } else {
        SubsystemStatus { name: "rate_limiters".into(), status: Status::Healthy, detail: None, critical: false }
    }
}

fn probe_storage(state: &AppState) -> SubsystemStatus {
    let disks = Disks::new_with_refreshed_list();
    let mut best_match: Option<u64> = None;
    for disk in disks.list() {
        if state.layout.root.starts_with(disk.mount_point()) {
            best_match = Some(match best_match {
                Some(current) => current.max(disk.available_space()),
                None => disk.available_space(),
            });
        }
    }
    match best_match {
        Some(available) if available < LOW_STORAGE_THRESHOLD_BYTES => SubsystemStatus {
            name: "storage".into(),
            status: Status::Degraded,
            detail: Some(format!("{} bytes free", available)),
            critical: false,
        },
        Some(_) => SubsystemStatus { name: "storage".into(), status: Status::Healthy, detail: None, critical: false },
        None => SubsystemStatus {
            name: "storage".into(),
            status: Status::Degraded,
            detail: Some("could not determine free space".into()),
            critical: false,
        },
    }
}

/// spec.md §7: overall is unhealthy iff any critical subsystem is
/// unhealthy; else degraded if anything is degraded or a non-critical
/// subsystem is unhealthy; else healthy.
fn overall(subsystems: &[SubsystemStatus]) -> Status {
    if subsystems.iter().any(|s| s.critical && s.status == Status::Unhealthy) {
        return Status::Unhealthy;
    }
    if subsystems.iter().any(|s| s.status != Status::Healthy) {
        return Status::Degraded;
    }
    Status::Healthy
}

async fn build_report(state: &AppState) -> HealthReport {
    let subsystems = vec![
        probe_database(state).await,
        probe_workers(state),
        probe_queue_backlog(state).await,
        probe_rate_limiters(state).await,
        probe_storage(state),
    ];
    let status = overall(&subsystems);
    HealthReport { status, subsystems }
}

async fn cached_report(state: &AppState) -> HealthReport {
    if let Some(cached) = state.health_cache.read().await.get() {
        if let Ok(report) = serde_json::from_value(cached) {
            return report;
        }
    }
    let report = build_report(state).await;
    let value = serde_json::to_value(&report).unwrap_or(serde_json::Value::Null);
    state.health_cache.write().await.set(value);
    report
}

/// `/health`: overall status only, no per-subsystem breakdown.
pub async fn health(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let report = cached_report(&state).await;
    Ok(Json(serde_json::json!({ "status": report.status })))
}

pub async fn health_detailed(State(state): State<AppState>) -> Result<Json<HealthReport>, ApiError> {
    Ok(Json(cached_report(&state).await))
}
