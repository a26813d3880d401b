//! Periodic cleanup and graceful shutdown (§4.G). Owns nothing of its own —
//! it just drives `Directory::prune` and `sessions::expire_idle_sessions`
//! on a timer, and on a shutdown signal broadcasts a `system_notification`
//! to every live connection before the listener stops accepting.

use std::sync::atomic::Ordering;

use tracing::{info, warn};

use msg_protocol::Envelope;

use crate::handlers::now_iso8601;
use crate::state::AppState;
use crate::storage::sessions;

/// Runs forever, waking every `config.cleanup_interval` to prune stale
/// endpoint hints from the directory and expire idle persistent sessions.
/// Intended to be spawned once at startup and left running until the
/// process exits.
pub async fn cleanup_loop(state: AppState) {
    let mut ticker = tokio::time::interval(state.config.cleanup_interval);
    ticker.tick().await; // first tick fires immediately; skip it

    loop {
        ticker.tick().await;
        state.directory.prune(state.config.heartbeat_timeout).await;

        let ttl_secs = state.config.idle_session_ttl.as_secs() as i64;
        match sessions::expire_idle_sessions(&state.pool, ttl_secs).await {
            Ok(count) if count > 0 => info!(count, "expired idle sessions"),
            Ok(_) => {}
            Err(err) => warn!(error = %err, "failed to expire idle sessions"),
        }
    }
}

/// Waits for SIGTERM or Ctrl-C, then broadcasts a shutdown notice to every
/// live connection and gives writers `shutdown_grace_period` to drain
/// before returning (which lets `axum::serve`'s graceful shutdown close the
/// listener).
pub async fn shutdown_signal(state: AppState) {
    wait_for_signal().await;
    info!("shutdown signal received, notifying live connections");

    let notice = Envelope::system_notification(
        "shutdown",
        env!("CARGO_PKG_VERSION"),
        "",
        now_iso8601(),
    );
    for connection_id in state.directory.all_connection_ids().await {
        if let Some(handle) = state.directory.connection(connection_id).await {
            let _ = handle.writer_tx.try_send(notice.clone());
        }
    }

    tokio::time::sleep(state.config.shutdown_grace_period).await;

    for connection_id in state.directory.all_connection_ids().await {
        if let Some(handle) = state.directory.connection(connection_id).await {
            handle.force_close();
        }
    }

    info!(
        remaining = state.directory.total_connections().await,
        routed = state.metrics.messages_routed.load(Ordering::Relaxed),
        "graceful shutdown complete"
    );
}

async fn wait_for_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("received Ctrl+C"); },
        _ = terminate => { info!("received SIGTERM"); },
    }
}
