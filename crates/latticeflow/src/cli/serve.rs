//! `latticeflow serve` (spec.md §5): the one long-running command. Wires
//! the store, rate limiters, collaborator clients, worker manager, sync
//! service, cleanup service, and REST API together and runs them until a
//! shutdown signal arrives.

use clap::Args;
use latticeflow_core::paths::DataLayout;
use latticeflow_db::pool::DbConfig;
use latticeflow_db::Store;
use latticeflow_limiter::{RateLimiter, RateLimiters};
use latticeflow_queue::{events::EventBus, JobQueue};
use latticeflow_scan::chat_platform::ChatPlatformClient;
use latticeflow_scan::cloud_drive::{oauth_client, DriveClient};
use latticeflow_scan::forum::ForumClient;
use latticeflow_security::credentials::CredentialCipher;
use latticeflow_worker::ai::{AiAnalyzeHandler, AiVisionClient};
use latticeflow_worker::cleanup::CleanupService;
use latticeflow_worker::download::{DownloadDesignHandler, DownloadImportRecordHandler};
use latticeflow_worker::extract::ExtractArchiveHandler;
use latticeflow_worker::import::ImportToLibraryHandler;
use latticeflow_worker::preview::{DownloadTelegramImagesHandler, GenerateRenderHandler};
use latticeflow_worker::runtime::WorkerManager;
use latticeflow_worker::sync::{SyncImportSourceHandler, SyncService};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::ai_client::GeminiVisionClient;
use crate::config::SettingsResolver;
use crate::telegram_client::StubChatClient;

const WORKER_POLL_INTERVAL: Duration = Duration::from_secs(2);
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[derive(Args)]
pub struct ServeArgs {
    /// Address the REST API listens on.
    #[arg(long, env = "LATTICEFLOW_BIND_ADDR", default_value = "0.0.0.0:8787")]
    bind_addr: String,
}

pub async fn run(layout: DataLayout, args: ServeArgs) -> anyhow::Result<()> {
    let layout = Arc::new(layout);
    let store = Arc::new(Store::open(DbConfig::file(layout.db_path())).await?);

    let cipher = Arc::new(CredentialCipher::from_base64_key(
        &std::env::var("LATTICEFLOW_CREDENTIAL_KEY")
            .map_err(|_| anyhow::anyhow!("LATTICEFLOW_CREDENTIAL_KEY must be set (32 random bytes, base64-encoded)"))?,
    )?);

    let settings = SettingsResolver::new(store.clone());
    let limiters = RateLimiters {
        telegram: Arc::new(RateLimiter::new(
            settings.telegram_rate_limit_rpm().await,
            Duration::from_millis(500),
            Duration::from_secs(300),
        )),
        google_drive: Arc::new(RateLimiter::new(
            settings.google_requests_per_minute().await,
            Duration::from_millis(100),
            Duration::from_secs(300),
        )),
        forum: Arc::new(RateLimiter::new(30, Duration::from_millis(200), Duration::from_secs(300))),
        ai: Arc::new(RateLimiter::new(
            settings.ai_rate_limit_rpm().await,
            Duration::from_millis(500),
            Duration::from_secs(300),
        )),
    };

    let events = Arc::new(EventBus::new());
    let queue = JobQueue::new(store.clone(), events);

    let chat: Arc<dyn ChatPlatformClient> = Arc::new(StubChatClient);

    let oauth = oauth_client(
        &std::env::var("GOOGLE_OAUTH_CLIENT_ID").unwrap_or_default(),
        &std::env::var("GOOGLE_OAUTH_CLIENT_SECRET").unwrap_or_default(),
        &std::env::var("GOOGLE_OAUTH_REDIRECT_URL").unwrap_or_else(|_| format!("http://{}/oauth/google/callback", args.bind_addr)),
    )?;
    let drive = Arc::new(DriveClient::new(oauth));

    let forum = Arc::new(ForumClient::new(
        std::env::var("LATTICEFLOW_FORUM_BASE_URL").unwrap_or_default(),
        Arc::new(reqwest::cookie::Jar::default()),
    )?);

    let ai_client: Arc<dyn AiVisionClient> = match std::env::var("LATTICEFLOW_AI_API_KEY") {
        Ok(key) => Arc::new(GeminiVisionClient::new(key, "gemini-1.5-flash")),
        Err(_) => {
            warn!("LATTICEFLOW_AI_API_KEY is not set; AI_ANALYZE jobs will fail until it is configured");
            Arc::new(GeminiVisionClient::new(String::new(), "gemini-1.5-flash"))
        }
    };

    let mut workers = WorkerManager::new();
    let shutdown = workers.shutdown_flag();

    workers.spawn(
        "download_design",
        queue.clone(),
        Arc::new(DownloadDesignHandler::new(store.clone(), queue.clone(), chat.clone(), layout.clone())),
        WORKER_POLL_INTERVAL,
    );
    workers.spawn(
        "download_import_record",
        queue.clone(),
        Arc::new(DownloadImportRecordHandler::new(
            store.clone(),
            queue.clone(),
            layout.clone(),
            drive.clone(),
            forum.clone(),
            cipher.clone(),
        )),
        WORKER_POLL_INTERVAL,
    );
    workers.spawn(
        "extract_archive",
        queue.clone(),
        Arc::new(ExtractArchiveHandler::new(store.clone(), queue.clone(), layout.clone())),
        WORKER_POLL_INTERVAL,
    );
    workers.spawn(
        "import_to_library",
        queue.clone(),
        Arc::new(ImportToLibraryHandler::new(store.clone(), layout.clone())),
        WORKER_POLL_INTERVAL,
    );
    workers.spawn(
        "download_telegram_images",
        queue.clone(),
        Arc::new(DownloadTelegramImagesHandler::new(store.clone(), chat.clone(), layout.clone())),
        WORKER_POLL_INTERVAL,
    );
    workers.spawn(
        "generate_render",
        queue.clone(),
        Arc::new(GenerateRenderHandler::new(
            store.clone(),
            layout.clone(),
            std::env::var("LATTICEFLOW_RENDERER_BIN").ok(),
        )),
        WORKER_POLL_INTERVAL,
    );
    workers.spawn(
        "ai_analyze",
        queue.clone(),
        Arc::new(AiAnalyzeHandler::new(store.clone(), layout.clone(), ai_client, limiters.ai.clone())),
        WORKER_POLL_INTERVAL,
    );
    workers.spawn(
        "sync_import_source",
        queue.clone(),
        Arc::new(SyncImportSourceHandler::new(store.clone())),
        WORKER_POLL_INTERVAL,
    );

    let sync_service = Arc::new(SyncService::new(store.clone(), queue.clone(), chat.clone()));
    let sync_realtime_handle = {
        let sync_service = sync_service.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { sync_service.run_realtime(shutdown).await })
    };
    let sync_catchup_handle = {
        let sync_service = sync_service.clone();
        let shutdown = shutdown.clone();
        let settings = SettingsResolver::new(store.clone());
        tokio::spawn(async move { run_catchup_loop(sync_service, settings, shutdown).await })
    };

    let cleanup_service = CleanupService::new(store.clone(), layout.clone());
    let cleanup_handle = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { run_cleanup_loop(cleanup_service, shutdown).await })
    };

    let state = latticeflow_api::AppState {
        store: store.clone(),
        queue: queue.clone(),
        layout: layout.clone(),
        chat: chat.clone(),
        credential_cipher: cipher,
        limiters,
        worker_shutdown_flag: shutdown.clone(),
        health_cache: Arc::new(tokio::sync::RwLock::new(latticeflow_api::cache::TtlCache::new(
            latticeflow_api::handlers::health::HEALTH_CACHE_TTL,
        ))),
        dashboard_cache: Arc::new(tokio::sync::RwLock::new(latticeflow_api::cache::TtlCache::new(
            latticeflow_api::handlers::stats::DASHBOARD_CACHE_TTL,
        ))),
        pending_telegram_logins: Arc::new(tokio::sync::RwLock::new(std::collections::HashMap::new())),
    };
    let router = latticeflow_api::create_router(state);

    let listener = tokio::net::TcpListener::bind(&args.bind_addr).await?;
    info!(addr = %args.bind_addr, "listening");

    let shutdown_notify = Arc::new(Notify::new());
    let signal_handle = {
        let shutdown = shutdown.clone();
        let shutdown_notify = shutdown_notify.clone();
        tokio::spawn(async move {
            crate::signals::wait_for_shutdown_signal(shutdown).await;
            shutdown_notify.notify_waiters();
        })
    };

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown_notify.notified().await })
        .await?;

    info!("REST API stopped, draining workers and background services");
    workers.request_shutdown();
    workers.join_with_grace(SHUTDOWN_GRACE).await;
    let _ = tokio::time::timeout(SHUTDOWN_GRACE, sync_realtime_handle).await;
    let _ = tokio::time::timeout(SHUTDOWN_GRACE, sync_catchup_handle).await;
    let _ = tokio::time::timeout(SHUTDOWN_GRACE, cleanup_handle).await;
    let _ = signal_handle.await;

    Ok(())
}

async fn run_catchup_loop(sync_service: Arc<SyncService>, settings: SettingsResolver, shutdown: Arc<AtomicBool>) {
    use std::sync::atomic::Ordering;
    while !shutdown.load(Ordering::Relaxed) {
        if settings.sync_enabled().await {
            sync_service.catch_up_once().await;
        }
        let interval = Duration::from_secs(settings.sync_poll_interval_secs().await);
        tokio::time::sleep(interval).await;
    }
}

async fn run_cleanup_loop(service: CleanupService, shutdown: Arc<AtomicBool>) {
    use std::sync::atomic::Ordering;
    while !shutdown.load(Ordering::Relaxed) {
        tokio::time::sleep(CLEANUP_INTERVAL).await;
        if shutdown.load(Ordering::Relaxed) {
            break;
        }
        let report = service.run_once().await;
        info!(?report, "cleanup sweep finished");
    }
}
