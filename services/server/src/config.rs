//! Typed configuration assembled from CLI flags with environment-variable
//! fallbacks, mirroring how the host project wires `env::var(...)` defaults
//! behind a `#[derive(Parser)]` CLI.

use clap::Parser;
use std::time::Duration;

/// Server core for the chat session router.
#[derive(Debug, Clone, Parser)]
#[command(name = "msg-server", version)]
pub struct CliArgs {
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    #[arg(long = "max-connections", env = "MAX_CONNECTIONS", default_value_t = 10_000)]
    pub max_connections: usize,

    /// Postgres connection string. Named `--db-path` for parity with the
    /// distilled spec's flag set; it is a `DATABASE_URL`, not a filesystem path.
    #[arg(long = "db-path", env = "DATABASE_URL")]
    pub db_path: String,

    #[arg(long, env = "WORKERS", default_value_t = 8)]
    pub workers: usize,

    #[arg(long = "log-level", env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[arg(long = "log-file", env = "LOG_FILE")]
    pub log_file: Option<String>,

    #[arg(long = "enable-compression", env = "ENABLE_COMPRESSION", default_value_t = true)]
    pub enable_compression: bool,

    #[arg(long = "cleanup-interval", env = "CLEANUP_INTERVAL_SECS", default_value_t = 30)]
    pub cleanup_interval_secs: u64,
}

/// Fully resolved runtime configuration, derived from [`CliArgs`] plus the
/// fixed policy constants the spec calls out (§4.D, §4.F, §5).
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub database_url: String,
    pub worker_count: usize,
    pub log_level: String,
    pub log_file: Option<String>,
    pub enable_compression: bool,
    pub cleanup_interval: Duration,

    pub max_connections: usize,
    pub max_connections_per_ip: usize,
    pub max_connections_per_user: usize,

    pub max_frame_size: usize,
    pub worker_queue_capacity: usize,
    pub writer_channel_capacity: usize,
    pub slow_consumer_close_after: u32,

    pub heartbeat_timeout: Duration,
    pub idle_session_ttl: Duration,
    pub shutdown_grace_period: Duration,

    pub max_username_len: usize,
    pub min_password_len: usize,
    pub max_malformed_frames: u32,

    /// HMAC signing key for opaque session tokens. Loaded from
    /// `SERVER_SECRET`; generated randomly (and logged once as a warning)
    /// when absent, matching the teacher's startup-invariant `expect()`
    /// style for genuinely unrecoverable misconfiguration versus soft
    /// defaults for everything else.
    pub server_secret: Vec<u8>,
}

impl Config {
    pub fn from_cli(args: CliArgs, server_secret: Vec<u8>) -> Self {
        Self {
            bind_addr: format!("{}:{}", args.host, args.port),
            database_url: args.db_path,
            worker_count: args.workers.max(1),
            log_level: args.log_level,
            log_file: args.log_file,
            enable_compression: args.enable_compression,
            cleanup_interval: Duration::from_secs(args.cleanup_interval_secs.max(1)),
            max_connections: args.max_connections,
            max_connections_per_ip: 32,
            max_connections_per_user: 8,
            max_frame_size: msg_protocol::frame::DEFAULT_MAX_FRAME_SIZE,
            worker_queue_capacity: 4096,
            writer_channel_capacity: 256,
            slow_consumer_close_after: 8,
            heartbeat_timeout: Duration::from_secs(120),
            idle_session_ttl: Duration::from_secs(60 * 60 * 24),
            shutdown_grace_period: Duration::from_secs(10),
            max_username_len: 50,
            min_password_len: 8,
            max_malformed_frames: 5,
            server_secret,
        }
    }

    #[cfg(test)]
    pub fn for_tests(database_url: impl Into<String>) -> Self {
        Self::from_cli(
            CliArgs {
                host: "127.0.0.1".to_owned(),
                port: 0,
                max_connections: 1000,
                db_path: database_url.into(),
                workers: 2,
                log_level: "info".to_owned(),
                log_file: None,
                enable_compression: true,
                cleanup_interval_secs: 30,
            },
            b"test-secret".to_vec(),
        )
    }
}
