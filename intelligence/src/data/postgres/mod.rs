//! PostgreSQL storage backend.

pub mod error;
pub mod migrations;
pub mod repositories;
pub mod schema;

pub use error::PostgresError;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;

/// Pool sizing matches a worker-per-analysis model plus the API.
const MAX_CONNECTIONS: u32 = 16;
const ACQUIRE_TIMEOUT_SECS: u64 = 10;

/// Connect and migrate.
pub async fn connect(database_url: &str) -> Result<PgPool, PostgresError> {
    let pool = PgPoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .acquire_timeout(Duration::from_secs(ACQUIRE_TIMEOUT_SECS))
        .connect(database_url)
        .await?;

    migrations::run_migrations(&pool).await?;
    Ok(pool)
}

/// `SELECT 1` reachability check for the health endpoint.
pub async fn ping(pool: &PgPool) -> bool {
    sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(pool)
        .await
        .is_ok()
}

/// Whether the vector extension is installed (health endpoint).
pub async fn vector_ready(pool: &PgPool) -> bool {
    sqlx::query_scalar::<_, String>("SELECT extname FROM pg_extension WHERE extname = 'vector'")
        .fetch_optional(pool)
        .await
        .map(|row| row.is_some())
        .unwrap_or(false)
}
