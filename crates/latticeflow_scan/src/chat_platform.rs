//! Chat-platform client seam (spec.md §6): the surface a concrete
//! MTProto client (`grammers-client`, behind a feature flag) implements.
//! The sync service and download workers depend only on this trait.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct RemoteChannel {
    pub peer_id: String,
    pub username: Option<String>,
    pub title: String,
    pub member_count: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct RemoteAttachment {
    pub upstream_file_id: String,
    pub filename: Option<String>,
    pub mime_type: Option<String>,
    pub size_bytes: Option<i64>,
    pub is_photo: bool,
}

#[derive(Debug, Clone)]
pub struct RemoteMessage {
    pub upstream_message_id: i64,
    pub caption: Option<String>,
    pub posted_at: DateTime<Utc>,
    pub author_label: Option<String>,
    pub forwarded_from: Option<RemoteChannel>,
    pub attachments: Vec<RemoteAttachment>,
}

#[derive(Debug, Error)]
pub enum ChatPlatformError {
    #[error("flood wait: retry after {retry_after_secs}s")]
    FloodWait { retry_after_secs: u64 },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("not authorized")]
    NotAuthorized,
    #[error("phone code is invalid")]
    PhoneCodeInvalid,
    #[error("phone code has expired")]
    PhoneCodeExpired,
    #[error("two-factor password required")]
    SessionPasswordNeeded,
    #[error("phone number is invalid")]
    PhoneNumberInvalid,
    #[error("auth key error, session must be recreated")]
    AuthKeyError,
}

/// Implemented by the concrete MTProto client. Methods mirror the
/// `connect` / `iter_messages` / `download_media` surface spec.md §6
/// enumerates for the chat-platform collaborator.
#[async_trait]
pub trait ChatPlatformClient: Send + Sync {
    async fn connect(&self, session_path: &std::path::Path) -> Result<(), ChatPlatformError>;

    async fn is_authenticated(&self) -> Result<bool, ChatPlatformError>;

    /// Starts the login flow for `phone`; returns the `phone_code_hash`
    /// the caller must echo back into `sign_in`.
    async fn send_code_request(&self, phone: &str) -> Result<String, ChatPlatformError>;

    /// Completes login. `password` is required only when the account has
    /// two-factor auth enabled, signalled by a prior `SessionPasswordNeeded`.
    async fn sign_in(
        &self,
        phone: &str,
        code: &str,
        phone_code_hash: &str,
        password: Option<&str>,
    ) -> Result<(), ChatPlatformError>;

    async fn log_out(&self) -> Result<(), ChatPlatformError>;

    async fn resolve_channel(&self, peer_id_or_username: &str) -> Result<RemoteChannel, ChatPlatformError>;

    /// Yields messages newer than `after_message_id`, oldest first.
    async fn iter_messages(
        &self,
        peer_id: &str,
        after_message_id: Option<i64>,
    ) -> Result<Vec<RemoteMessage>, ChatPlatformError>;

    async fn download_media(&self, upstream_file_id: &str) -> Result<Bytes, ChatPlatformError>;

    async fn subscribe_new_messages(&self) -> Result<tokio::sync::mpsc::UnboundedReceiver<(String, RemoteMessage)>, ChatPlatformError>;
}
