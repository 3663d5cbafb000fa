//! Database connection pool management.

use crate::target::DatabaseTarget;
use herald_config::DatabaseConfig;
use herald_core::{Dependency, HeraldError, HeraldResult};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{info, warn};

/// Maximum connections used by bootstrap steps.
const BOOTSTRAP_CONNECTIONS: u32 = 2;

/// Database pool wrapper.
pub struct DatabasePool {
    pool: PgPool,
}

impl DatabasePool {
    /// Connects to the application database named in the configuration.
    pub async fn connect(config: &DatabaseConfig) -> HeraldResult<Self> {
        let target = DatabaseTarget::parse(&config.url, &config.admin_database)?;
        info!(database = %target.database, "Connecting to PostgreSQL database...");

        let pool = PgPoolOptions::new()
            .max_connections(BOOTSTRAP_CONNECTIONS)
            .acquire_timeout(config.connect_timeout())
            .connect(target.url.as_str())
            .await
            .map_err(|e| {
                warn!("Failed to connect to database: {}", e);
                HeraldError::unavailable(Dependency::Database, format!("Failed to connect: {e}"))
            })?;

        info!("PostgreSQL connection pool established");
        Ok(Self { pool })
    }

    /// Returns a reference to the underlying pool.
    #[must_use]
    pub fn inner(&self) -> &PgPool {
        &self.pool
    }

    /// Closes the database pool.
    pub async fn close(&self) {
        info!("Closing database connection pool...");
        self.pool.close().await;
    }
}
