//! `/stats/dashboard[/calendar|/queue|/storage]` (spec.md §6): answers
//! cached 5 minutes, same `TtlCache` shape as the health endpoints.

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ApiError;
use crate::state::AppState;

pub const DASHBOARD_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

async fn cached<F, Fut>(state: &AppState, key: &str, build: F) -> Result<serde_json::Value, ApiError>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<serde_json::Value, ApiError>>,
{
    let cache_key = format!("dashboard:{key}");
    if let Some(serde_json::Value::Object(map)) = state.dashboard_cache.read().await.get() {
        if let Some(value) = map.get(&cache_key) {
            return Ok(value.clone());
        }
    }
    let value = build().await?;
    let mut map = match state.dashboard_cache.read().await.get() {
        Some(serde_json::Value::Object(map)) => map,
        _ => serde_json::Map::new(),
    };
    map.insert(cache_key, value.clone());
    state.dashboard_cache.write().await.set(serde_json::Value::Object(map));
    Ok(value)
}

#[derive(Serialize)]
struct DashboardResponse {
    designs_by_status: Vec<(String, i64)>,
    total_designs: i64,
}

pub async fn dashboard(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let value = cached(&state, "dashboard", || async {
        let by_status = state.store.count_designs_by_status().await?;
        let total = by_status.iter().map(|(_, n)| n).sum();
        let designs_by_status = by_status
            .into_iter()
            .map(|(status, n)| {
                let label = match serde_json::to_value(status) {
                    Ok(serde_json::Value::String(s)) => s,
                    _ => "unknown".to_string(),
                };
                (label, n)
            })
            .collect();
        let response = DashboardResponse { designs_by_status, total_designs: total };
        serde_json::to_value(response).map_err(|e| ApiError::Internal(e.to_string()))
    })
    .await?;
    Ok(Json(value))
}

#[derive(Deserialize)]
pub struct CalendarQuery {
    #[serde(default = "default_calendar_days")]
    days: i64,
}

fn default_calendar_days() -> i64 {
    30
}

#[derive(Serialize)]
struct CalendarResponse {
    days: Vec<(String, i64)>,
}

pub async fn calendar(
    State(state): State<AppState>,
    Query(query): Query<CalendarQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let days = query.days.clamp(1, 365);
    let value = cached(&state, &format!("calendar:{days}"), || async {
        let rows = state.store.designs_discovered_per_day(days).await?;
        serde_json::to_value(CalendarResponse { days: rows }).map_err(|e| ApiError::Internal(e.to_string()))
    })
    .await?;
    Ok(Json(value))
}

pub async fn queue(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let value = cached(&state, "queue", || async {
        let stats = state.store.get_queue_stats().await?;
        serde_json::to_value(stats).map_err(|e| ApiError::Internal(e.to_string()))
    })
    .await?;
    Ok(Json(value))
}

#[derive(Serialize)]
struct StorageResponse {
    total_library_bytes: i64,
}

pub async fn storage(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let value = cached(&state, "storage", || async {
        let total_library_bytes = state.store.total_library_bytes().await?;
        serde_json::to_value(StorageResponse { total_library_bytes }).map_err(|e| ApiError::Internal(e.to_string()))
    })
    .await?;
    Ok(Json(value))
}
