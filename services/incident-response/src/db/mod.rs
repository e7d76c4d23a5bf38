//! Relational storage for devices and readings.
//!
//! This module provides:
//! - Connection pool management
//! - `PgDeviceDirectory`, the `devices` table behind `DeviceDirectory`
//! - `PgReadingStore`, the `readings` table behind `ReadingQuarantine`
//!
//! Queries are built at runtime with SQLx; no compile-time database access
//! is needed.

mod devices;
mod error;
mod readings;

pub use devices::PgDeviceDirectory;
pub use error::DbError;
pub use readings::PgReadingStore;

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

/// Database configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Database connection URL.
    pub database_url: String,

    /// Maximum number of connections in the pool.
    pub max_connections: u32,

    /// Minimum number of idle connections.
    pub min_connections: u32,

    /// Connection acquire timeout.
    pub acquire_timeout: Duration,

    /// Idle connection timeout.
    pub idle_timeout: Duration,

    /// Maximum lifetime of a connection.
    pub max_lifetime: Duration,
}

impl DbConfig {
    /// Pool settings for `database_url` with default sizing.
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            max_connections: 10,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
        }
    }
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    pub async fn connect(config: &DbConfig) -> Result<Self, DbError> {
        info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "Connecting to database"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(Some(config.idle_timeout))
            .max_lifetime(Some(config.max_lifetime))
            .connect(&config.database_url)
            .await
            .map_err(DbError::Connect)?;

        info!("Database connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check if the database is reachable.
    pub async fn health_check(&self) -> Result<(), DbError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(DbError::Query)?;
        Ok(())
    }

    /// Create the `devices` and `readings` tables if missing.
    ///
    /// Migrations are looked up relative to the working directory first, so
    /// a deployed binary can ship them beside itself.
    pub async fn run_migrations(&self) -> Result<(), DbError> {
        info!("Running database migrations");

        let candidates = migration_dirs();
        let mut last_error: Option<sqlx::migrate::MigrateError> = None;

        for dir in &candidates {
            match sqlx::migrate::Migrator::new(dir.clone()).await {
                Ok(migrator) => {
                    info!(migrations_dir = %dir.display(), "Loaded migrations");
                    migrator.run(&self.pool).await.map_err(DbError::Migration)?;
                    info!("Database migrations complete");
                    return Ok(());
                }
                Err(e) => {
                    last_error = Some(e);
                }
            }
        }

        let tried = candidates
            .iter()
            .map(|dir| dir.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");

        Err(DbError::MigrationDirNotFound {
            tried,
            last_error: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".to_string()),
        })
    }

    /// Device directory over this pool.
    pub fn device_directory(&self) -> PgDeviceDirectory {
        PgDeviceDirectory::new(self.pool.clone())
    }

    /// Reading store over this pool.
    pub fn reading_store(&self) -> PgReadingStore {
        PgReadingStore::new(self.pool.clone())
    }
}

fn migration_dirs() -> Vec<PathBuf> {
    vec![
        PathBuf::from("./migrations"),
        PathBuf::from("services/incident-response/migrations"),
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("migrations"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_config_defaults() {
        let config = DbConfig::new("postgres://localhost/rootstock");
        assert_eq!(config.database_url, "postgres://localhost/rootstock");
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.min_connections, 1);
        assert_eq!(config.acquire_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_migration_dirs_prefer_working_directory() {
        let dirs = migration_dirs();
        assert_eq!(dirs[0], PathBuf::from("./migrations"));
        assert!(dirs.last().unwrap().ends_with("incident-response/migrations"));
    }

    #[tokio::test]
    async fn test_source_tree_migrations_load() {
        let dir = migration_dirs().pop().unwrap();
        let migrator = sqlx::migrate::Migrator::new(dir).await.unwrap();
        assert_eq!(migrator.iter().count(), 1);
    }
}
