//! Database module for PostgreSQL persistence
//!
//! Holds the worker's processed-unit ledger and the parsed diplomas in
//! `ocr_db`.

mod diplomas;
mod processed;
mod schema;

pub use diplomas::*;
pub use processed::*;
pub use schema::*;

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

use crate::error::Result;

/// Create a new database connection pool
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await?;

    // Run migrations
    initialize_schema(&pool).await?;

    Ok(pool)
}

/// Retry `create_pool` while Postgres is starting up
pub async fn wait_for_pool(database_url: &str, attempts: u32, delay: Duration) -> Result<PgPool> {
    let mut attempt = 1;
    loop {
        match create_pool(database_url).await {
            Ok(pool) => return Ok(pool),
            Err(e) if attempt < attempts => {
                tracing::warn!(
                    "Database not ready (attempt {}/{}): {}",
                    attempt,
                    attempts,
                    e
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
