//! Cooperative shutdown (spec.md §5): SIGTERM/SIGINT flips a shared flag
//! and wakes anything awaiting the notify; the worker manager is then
//! given a grace window to drain in-flight jobs before being dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

pub async fn wait_for_shutdown_signal(flag: Arc<AtomicBool>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }

    flag.store(true, Ordering::SeqCst);
}
