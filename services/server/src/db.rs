//! Connection pool creation and migration runner. Both are startup
//! invariants: a failure here means the process cannot do anything useful,
//! so they `expect()` rather than propagate, exactly as the teacher's
//! `main.rs` bootstrap does.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

pub async fn create_pool(database_url: &str, max_connections: u32) -> PgPool {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .expect("failed to connect to Postgres")
}

pub async fn run_migrations(pool: &PgPool) {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .expect("failed to run database migrations")
}
