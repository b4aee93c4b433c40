//! PostgreSQL access: pool setup, schema, upserts and integrity checks.

pub mod integrity;
pub mod schema;
pub mod store;

use anyhow::{anyhow, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::DatabaseConfig;

pub use store::{MemoryStatStore, PgStatStore, StatStore};

/// Connect with exponential backoff between attempts.
pub async fn connect_with_retry(config: &DatabaseConfig) -> Result<PgPool> {
    let max_retries = config.connect_attempts.max(1);
    let mut attempt = 0;
    loop {
        match PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(&config.database_url)
            .await
        {
            Ok(pool) => {
                info!("Connected to PostgreSQL");
                return Ok(pool);
            }
            Err(e) => {
                attempt += 1;
                if attempt >= max_retries {
                    return Err(anyhow!(
                        "Failed to connect to database after {} attempts: {}",
                        max_retries,
                        e
                    ));
                }
                warn!("Database connection attempt {} failed: {}. Retrying...", attempt, e);
                tokio::time::sleep(Duration::from_secs(2u64.pow(attempt))).await;
            }
        }
    }
}
