//! Placeholder chat-platform client. No MTProto backend is wired into
//! this build; every call reports the account as unauthenticated so the
//! REST auth endpoints and sync service fail loudly and safely instead
//! of silently doing nothing.

use async_trait::async_trait;
use bytes::Bytes;
use latticeflow_scan::chat_platform::{
    ChatPlatformClient, ChatPlatformError, RemoteChannel, RemoteMessage,
};
use std::path::Path;
use tokio::sync::mpsc::UnboundedReceiver;

pub struct StubChatClient;

#[async_trait]
impl ChatPlatformClient for StubChatClient {
    async fn connect(&self, _session_path: &Path) -> Result<(), ChatPlatformError> {
        Ok(())
    }

    async fn is_authenticated(&self) -> Result<bool, ChatPlatformError> {
        Ok(false)
    }

    async fn send_code_request(&self, _phone: &str) -> Result<String, ChatPlatformError> {
        Err(ChatPlatformError::Transport(
            "no chat-platform backend is configured in this build".into(),
        ))
    }

    async fn sign_in(
        &self,
        _phone: &str,
        _code: &str,
        _phone_code_hash: &str,
        _password: Option<&str>,
    ) -> Result<(), ChatPlatformError> {
        Err(ChatPlatformError::Transport(
            "no chat-platform backend is configured in this build".into(),
        ))
    }

    async fn log_out(&self) -> Result<(), ChatPlatformError> {
        Ok(())
    }

    async fn resolve_channel(&self, _peer_id_or_username: &str) -> Result<RemoteChannel, ChatPlatformError> {
        Err(ChatPlatformError::NotAuthorized)
    }

    async fn iter_messages(
        &self,
        _peer_id: &str,
        _after_message_id: Option<i64>,
    ) -> Result<Vec<RemoteMessage>, ChatPlatformError> {
        Err(ChatPlatformError::NotAuthorized)
    }

    async fn download_media(&self, _upstream_file_id: &str) -> Result<Bytes, ChatPlatformError> {
        Err(ChatPlatformError::NotAuthorized)
    }

    async fn subscribe_new_messages(&self) -> Result<UnboundedReceiver<(String, RemoteMessage)>, ChatPlatformError> {
        Err(ChatPlatformError::NotAuthorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reports_unauthenticated() {
        let client = StubChatClient;
        assert!(!client.is_authenticated().await.unwrap());
    }

    #[tokio::test]
    async fn send_code_request_fails_loudly() {
        let client = StubChatClient;
        assert!(client.send_code_request("+15551234567").await.is_err());
    }
}
