use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

/// Shared pool for registry reads, seeding and API queries.
pub const DEFAULT_POOL_SIZE: u32 = 10;

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

pub async fn connect(database_url: &str, max_connections: u32) -> sqlx::Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await
}

/// Dedicated single-connection pool for one sink worker. Never shared, so
/// batch inserts are not starved by other callers.
pub async fn priority_connect(database_url: &str) -> sqlx::Result<PgPool> {
    connect(database_url, 1).await
}
