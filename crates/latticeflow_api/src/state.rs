//! Shared application state handed to every handler (spec.md §6).

use latticeflow_core::paths::DataLayout;
use latticeflow_limiter::RateLimiters;
use latticeflow_queue::JobQueue;
use latticeflow_scan::chat_platform::ChatPlatformClient;
use latticeflow_security::credentials::CredentialCipher;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::cache::TtlCache;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<latticeflow_db::Store>,
    pub queue: JobQueue,
    pub layout: Arc<DataLayout>,
    pub chat: Arc<dyn ChatPlatformClient>,
    pub credential_cipher: Arc<CredentialCipher>,
    pub limiters: RateLimiters,
    /// Shared with `WorkerManager::shutdown_flag()`; a worker probe is
    /// unhealthy once this flips, since the process is tearing down.
    pub worker_shutdown_flag: Arc<AtomicBool>,
    /// spec.md §6 `/health`, `/health/detailed`: 5s cache.
    pub health_cache: Arc<RwLock<TtlCache<serde_json::Value>>>,
    /// spec.md §6 `/stats/dashboard*`: storage answers cached 5 min.
    pub dashboard_cache: Arc<RwLock<TtlCache<serde_json::Value>>>,
    /// In-progress Telegram login, keyed by phone number, holding the
    /// `phone_code_hash` `sign_in` must echo back.
    pub pending_telegram_logins: Arc<RwLock<std::collections::HashMap<String, String>>>,
}
