//! `/telegram/auth/*` (spec.md §6, §7 Auth/Config errors).

use axum::extract::State;
use axum::Json;
use latticeflow_scan::chat_platform::ChatPlatformError;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::state::AppState;

fn map_chat_error(err: ChatPlatformError) -> ApiError {
    match err {
        ChatPlatformError::PhoneCodeInvalid
        | ChatPlatformError::PhoneCodeExpired
        | ChatPlatformError::PhoneNumberInvalid => ApiError::BadRequest(err.to_string()),
        ChatPlatformError::SessionPasswordNeeded => ApiError::Unauthorized(err.to_string()),
        ChatPlatformError::NotAuthorized | ChatPlatformError::AuthKeyError => {
            ApiError::Unauthorized(err.to_string())
        }
        ChatPlatformError::FloodWait { .. } | ChatPlatformError::Transport(_) => {
            ApiError::Unavailable(err.to_string())
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StartRequest {
    phone: String,
}

#[derive(Serialize)]
pub struct StartResponse {
    requested: bool,
}

pub async fn start(
    State(state): State<AppState>,
    Json(req): Json<StartRequest>,
) -> Result<Json<StartResponse>, ApiError> {
    let phone_code_hash = state.chat.send_code_request(&req.phone).await.map_err(map_chat_error)?;
    state.pending_telegram_logins.write().await.insert(req.phone, phone_code_hash);
    Ok(Json(StartResponse { requested: true }))
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    phone: String,
    code: String,
    #[serde(default)]
    password: Option<String>,
}

#[derive(Serialize)]
pub struct VerifyResponse {
    authenticated: bool,
}

pub async fn verify(
    State(state): State<AppState>,
    Json(req): Json<VerifyRequest>,
) -> Result<Json<VerifyResponse>, ApiError> {
    let phone_code_hash = state
        .pending_telegram_logins
        .read()
        .await
        .get(&req.phone)
        .cloned()
        .ok_or_else(|| ApiError::BadRequest("no auth start in progress for this phone".into()))?;

    state
        .chat
        .sign_in(&req.phone, &req.code, &phone_code_hash, req.password.as_deref())
        .await
        .map_err(map_chat_error)?;

    state.pending_telegram_logins.write().await.remove(&req.phone);
    Ok(Json(VerifyResponse { authenticated: true }))
}

pub async fn logout(State(state): State<AppState>) -> Result<(), ApiError> {
    state.chat.log_out().await.map_err(map_chat_error)?;
    Ok(())
}

#[derive(Serialize)]
pub struct StatusResponse {
    authenticated: bool,
}

pub async fn status(State(state): State<AppState>) -> Result<Json<StatusResponse>, ApiError> {
    let authenticated = state.chat.is_authenticated().await.map_err(map_chat_error)?;
    Ok(Json(StatusResponse { authenticated }))
}
