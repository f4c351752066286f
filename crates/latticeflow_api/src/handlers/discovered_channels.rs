//! `/discovered-channels` (spec.md §6, §4.11).

use axum::extract::{Path, Query, State};
use axum::Json;
use latticeflow_db::models::ingest::DownloadMode;
use latticeflow_db::models::misc::DiscoveredChannelSort;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::state::AppState;

const DEFAULT_PAGE_SIZE: i64 = 50;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    sort: Option<String>,
    #[serde(default)]
    page: Option<i64>,
    #[serde(default)]
    page_size: Option<i64>,
}

#[derive(Serialize)]
pub struct ListResponse {
    channels: Vec<latticeflow_db::models::misc::DiscoveredChannel>,
    total: i64,
    page: i64,
    page_size: i64,
}

fn parse_sort(raw: Option<&str>) -> DiscoveredChannelSort {
    match raw {
        Some("last_seen") => DiscoveredChannelSort::LastSeen,
        Some("first_seen") => DiscoveredChannelSort::FirstSeen,
        _ => DiscoveredChannelSort::ReferenceCount,
    }
}

pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ListResponse>, ApiError> {
    let page = query.page.unwrap_or(0).max(0);
    let page_size = query.page_size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, 200);
    let sort = parse_sort(query.sort.as_deref());

    let channels = state
        .store
        .list_discovered_channels_page(sort, page_size, page * page_size)
        .await?;
    let total = state.store.count_discovered_channels().await?;

    Ok(Json(ListResponse { channels, total, page, page_size }))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<latticeflow_db::models::misc::DiscoveredChannel>, ApiError> {
    Ok(Json(state.store.get_discovered_channel(&id).await?))
}

pub async fn delete(State(state): State<AppState>, Path(id): Path<String>) -> Result<(), ApiError> {
    state.store.delete_discovered_channel(&id).await?;
    Ok(())
}

#[derive(Serialize)]
pub struct StatsResponse {
    total: i64,
}

pub async fn stats(State(state): State<AppState>) -> Result<Json<StatsResponse>, ApiError> {
    let total = state.store.count_discovered_channels().await?;
    Ok(Json(StatsResponse { total }))
}

#[derive(Debug, Deserialize)]
pub struct AddRequest {
    /// Either a raw peer id/username to resolve fresh, or the id of an
    /// already-discovered row to promote without a second platform hit.
    #[serde(default)]
    peer_id_or_username: Option<String>,
    #[serde(default)]
    discovered_channel_id: Option<String>,
    #[serde(default)]
    download_mode: Option<DownloadMode>,
}

/// spec.md §6: "add resolves via chat-platform and promotes to Channel".
pub async fn add(
    State(state): State<AppState>,
    Json(req): Json<AddRequest>,
) -> Result<Json<latticeflow_db::models::ingest::Channel>, ApiError> {
    let download_mode = req.download_mode.unwrap_or(DownloadMode::Manual);

    if let Some(discovered_id) = req.discovered_channel_id {
        let channel = state.store.promote_discovered_channel(&discovered_id, download_mode).await?;
        return Ok(Json(channel));
    }

    let peer = req
        .peer_id_or_username
        .ok_or_else(|| ApiError::BadRequest("peer_id_or_username or discovered_channel_id required".into()))?;

    let remote = state
        .chat
        .resolve_channel(&peer)
        .await
        .map_err(|e| ApiError::Unavailable(e.to_string()))?;

    let channel = state
        .store
        .upsert_channel(&remote.peer_id, &remote.title, remote.username.as_deref())
        .await?;
    state.store.set_channel_download_mode(&channel.id, download_mode).await?;
    Ok(Json(state.store.get_channel(&channel.id).await?))
}
