//! Database connection handling
//!
//! This module provides functionality to establish and manage the
//! PostgreSQL connection pool. The physical mapping (views over a shared
//! relationship table, partial unique indexes, procedures) targets
//! PostgreSQL; other drivers are rejected at connect time.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::config::DatabaseConfig;
use crate::error::{Error, Result};

/// Wrapper around the PostgreSQL connection pool
#[derive(Debug, Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection from configuration
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        if config.driver != "postgres" {
            return Err(Error::Config(format!(
                "Unsupported database driver: {}",
                config.driver
            )));
        }

        let pool_size = config.pool_size.unwrap_or(10);
        let timeout_seconds = config.timeout_seconds.unwrap_or(30);

        let pool = PgPoolOptions::new()
            .max_connections(pool_size)
            .acquire_timeout(std::time::Duration::from_secs(timeout_seconds))
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Execute a single SQL statement
    pub async fn execute(&self, sql: &str) -> Result<()> {
        sqlx::query(sql).execute(&self.pool).await?;
        Ok(())
    }
}
