//! Shared application state: the database pool, the in-memory directory,
//! resolved configuration, and process metrics, all behind cheap `Arc`
//! clones so every accepted connection's tasks can hold their own handle.

use std::sync::Arc;

use sqlx::PgPool;

use crate::config::Config;
use crate::directory::Directory;
use crate::metrics::Metrics;
use crate::router::WorkSender;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub directory: Directory,
    pub config: Arc<Config>,
    pub metrics: Arc<Metrics>,
    pub workers: Arc<Vec<WorkSender>>,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config, workers: Vec<WorkSender>) -> Self {
        let config = Arc::new(config);
        let directory = Directory::new(
            config.max_connections,
            config.max_connections_per_ip,
            config.max_connections_per_user,
        );
        Self {
            pool,
            directory,
            config,
            metrics: Arc::new(Metrics::default()),
            workers: Arc::new(workers),
        }
    }
}
