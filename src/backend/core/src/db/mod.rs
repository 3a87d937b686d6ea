//! Database layer.
//!
//! Uses PostgreSQL for the event log and projection checkpoints with sqlx.

use std::time::Instant;

use sqlx::{postgres::PgPoolOptions, PgPool};

use crate::config::DatabaseConfig;
use crate::error::Result;

/// Database connection pool.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new connection pool.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.url)
            .await?;

        tracing::info!(
            max_connections = config.max_connections,
            "Database pool created"
        );
        Ok(Self { pool })
    }

    /// Run the embedded migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        tracing::info!("Database migrations applied");
        Ok(())
    }

    /// Get the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Round-trip a trivial query, returning its latency in milliseconds.
    pub async fn ping(&self) -> Result<u64> {
        let start = Instant::now();
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(start.elapsed().as_millis() as u64)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
