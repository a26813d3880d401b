use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use rand::RngCore;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use server::config::{CliArgs, Config};
use server::state::AppState;
use server::{db, router, supervisor};

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();
    let _log_guard = init_logging(&args.log_level, args.log_file.as_deref());

    let server_secret = load_server_secret();
    let config = Config::from_cli(args, server_secret);

    info!("connecting to database...");
    let pool = db::create_pool(&config.database_url, 20).await;
    db::run_migrations(&pool).await;
    info!("migrations applied");

    // No connections are live at startup, so clear any stale online=true
    // rows left behind by a previous unclean shutdown.
    if let Err(err) = sqlx::query("UPDATE users SET online = false WHERE online = true")
        .execute(&pool)
        .await
    {
        error!(error = %err, "failed to reset online status at startup");
        std::process::exit(1);
    }

    let mut state = AppState::new(pool, config, Vec::new());
    let worker_senders = router::spawn_worker_pool(&state);
    state.workers = Arc::new(worker_senders);

    tokio::spawn(supervisor::cleanup_loop(state.clone()));

    let bind_addr = state.config.bind_addr.clone();
    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(addr = %bind_addr, error = %err, "failed to bind");
            std::process::exit(1);
        }
    };
    info!(addr = %bind_addr, workers = state.workers.len(), "server listening");

    let app = server::build_router(state.clone());
    let result = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(supervisor::shutdown_signal(state))
    .await;

    match result {
        Ok(()) => {
            info!("server shut down gracefully");
            std::process::exit(130);
        }
        Err(err) => {
            error!(error = %err, "server error");
            std::process::exit(1);
        }
    }
}

/// Loads the HMAC signing key for opaque session tokens from
/// `SERVER_SECRET`. A missing secret is tolerated with a randomly
/// generated, process-lifetime-only key — fine for a single dev instance,
/// unsafe across a restart or a multi-replica deployment, hence the
/// warning.
fn load_server_secret() -> Vec<u8> {
    match std::env::var("SERVER_SECRET") {
        Ok(secret) => secret.into_bytes(),
        Err(_) => {
            let mut buf = [0u8; 32];
            rand::rngs::OsRng.fill_bytes(&mut buf);
            warn!("SERVER_SECRET not set; generated an ephemeral secret for this process");
            buf.to_vec()
        }
    }
}

fn init_logging(log_level: &str, log_file: Option<&str>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::new(log_level.to_owned());
    match log_file {
        Some(path) => {
            let path = std::path::Path::new(path);
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| std::path::Path::new("."));
            let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("server.log");
            let file_appender = tracing_appender::rolling::daily(dir, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(non_blocking)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        }
    }
}
