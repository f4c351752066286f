//! REST surface over the job queue, catalog, and discovery state
//! (spec.md §6). The router factory mirrors the shape of an axum
//! service built from an `AppState` plus a tower middleware stack.

pub mod cache;
pub mod error;
pub mod handlers;
pub mod state;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use state::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/discovered-channels", get(handlers::discovered_channels::list))
        .route("/discovered-channels/stats", get(handlers::discovered_channels::stats))
        .route("/discovered-channels", post(handlers::discovered_channels::add))
        .route(
            "/discovered-channels/:id",
            get(handlers::discovered_channels::get).delete(handlers::discovered_channels::delete),
        )
        .route("/queue", get(handlers::queue::list))
        .route("/queue/stats", get(handlers::queue::stats))
        .route("/queue/:job_id/priority", post(handlers::queue::update_priority))
        .route("/queue/:job_id/cancel", post(handlers::queue::cancel))
        .route("/health", get(handlers::health::health))
        .route("/health/detailed", get(handlers::health::health_detailed))
        .route("/telegram/auth/start", post(handlers::telegram_auth::start))
        .route("/telegram/auth/verify", post(handlers::telegram_auth::verify))
        .route("/telegram/auth/logout", post(handlers::telegram_auth::logout))
        .route("/telegram/auth/status", get(handlers::telegram_auth::status))
        .route("/stats/dashboard", get(handlers::stats::dashboard))
        .route("/stats/dashboard/calendar", get(handlers::stats::calendar))
        .route("/stats/dashboard/queue", get(handlers::stats::queue))
        .route("/stats/dashboard/storage", get(handlers::stats::storage))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use latticeflow_core::paths::DataLayout;
    use latticeflow_db::Store;
    use latticeflow_limiter::{RateLimiter, RateLimiters};
    use latticeflow_queue::JobQueue;
    use latticeflow_scan::chat_platform::{
        ChatPlatformClient, ChatPlatformError, RemoteChannel, RemoteMessage,
    };
    use latticeflow_security::credentials::CredentialCipher;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::RwLock;
    use tower::ServiceExt;

    struct NoopChatClient;

    #[async_trait::async_trait]
    impl ChatPlatformClient for NoopChatClient {
        async fn connect(&self, _session_path: &std::path::Path) -> Result<(), ChatPlatformError> {
            Ok(())
        }
        async fn is_authenticated(&self) -> Result<bool, ChatPlatformError> {
            Ok(false)
        }
        async fn send_code_request(&self, _phone: &str) -> Result<String, ChatPlatformError> {
            Ok("hash".into())
        }
        async fn sign_in(
            &self,
            _phone: &str,
            _code: &str,
            _phone_code_hash: &str,
            _password: Option<&str>,
        ) -> Result<(), ChatPlatformError> {
            Ok(())
        }
        async fn log_out(&self) -> Result<(), ChatPlatformError> {
            Ok(())
        }
        async fn resolve_channel(&self, peer_id_or_username: &str) -> Result<RemoteChannel, ChatPlatformError> {
            Ok(RemoteChannel {
                peer_id: peer_id_or_username.to_string(),
                username: None,
                title: "Test Channel".into(),
                member_count: None,
            })
        }
        async fn iter_messages(
            &self,
            _peer_id: &str,
            _after_message_id: Option<i64>,
        ) -> Result<Vec<RemoteMessage>, ChatPlatformError> {
            Ok(vec![])
        }
        async fn download_media(&self, _upstream_file_id: &str) -> Result<bytes::Bytes, ChatPlatformError> {
            Ok(bytes::Bytes::new())
        }
        async fn subscribe_new_messages(
            &self,
        ) -> Result<tokio::sync::mpsc::UnboundedReceiver<(String, RemoteMessage)>, ChatPlatformError> {
            let (_tx, rx) = tokio::sync::mpsc::unbounded_channel();
            Ok(rx)
        }
    }

    async fn test_state() -> AppState {
        let store = Arc::new(Store::open_in_memory().await.unwrap());
        let events = Arc::new(latticeflow_queue::events::EventBus::new());
        let queue = JobQueue::new(store.clone(), events);
        let limiters = RateLimiters {
            telegram: Arc::new(RateLimiter::new(20, Duration::from_millis(500), Duration::from_secs(60))),
            google_drive: Arc::new(RateLimiter::new(100, Duration::from_millis(100), Duration::from_secs(60))),
            forum: Arc::new(RateLimiter::new(30, Duration::from_millis(200), Duration::from_secs(60))),
            ai: Arc::new(RateLimiter::new(15, Duration::from_millis(500), Duration::from_secs(60))),
        };
        AppState {
            store,
            queue,
            layout: Arc::new(DataLayout::from_root(std::env::temp_dir().join("latticeflow-api-test"))),
            chat: Arc::new(NoopChatClient),
            credential_cipher: Arc::new(CredentialCipher::from_key_bytes(&[0u8; 32]).unwrap()),
            limiters,
            worker_shutdown_flag: Arc::new(AtomicBool::new(false)),
            health_cache: Arc::new(RwLock::new(cache::TtlCache::new(Duration::from_secs(5)))),
            dashboard_cache: Arc::new(RwLock::new(cache::TtlCache::new(Duration::from_secs(300)))),
            pending_telegram_logins: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    #[tokio::test]
    async fn health_endpoint_reports_healthy_on_fresh_store() {
        let app = create_router(test_state().await);
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn discovered_channels_list_starts_empty() {
        let app = create_router(test_state().await);
        let response = app
            .oneshot(Request::builder().uri("/discovered-channels").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
