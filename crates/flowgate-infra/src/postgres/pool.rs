//! PostgreSQL connection pool for the admission queue.

use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};

/// Open a pool and apply the queue migrations.
pub async fn connect_queue_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await?;

    sqlx::migrate!("../../migrations/postgres").run(&pool).await?;

    tracing::debug!("postgres queue pool opened");
    Ok(pool)
}
