//! Database layer for Atabot
//!
//! Provides:
//! - Connection pool management (sqlx + PostgreSQL)
//! - Audited identifier quoting for dynamic SQL
//! - Dynamic row decoding into JSON maps
//! - information_schema introspection
//! - Bootstrap DDL for the `atabot` storage schema

mod bootstrap;
mod casts;
mod introspect;

pub use bootstrap::ensure_storage;
pub use casts::row_to_json;
pub use introspect::{ColumnInfo, ForeignKey, TableInfo};

use crate::config::DatabaseConfig;
use crate::errors::{AppError, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;

/// Database connection pool wrapper
#[derive(Clone)]
pub struct DbPool {
    pool: PgPool,
}

impl DbPool {
    /// Create a new database pool from configuration
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        info!("Connecting to database...");

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .connect(&config.url)
            .await
            .map_err(|e| AppError::DatabaseConnection {
                message: format!("Failed to connect: {}", e),
            })?;

        info!(
            max_connections = config.max_connections,
            "Database connection established"
        );

        Ok(Self { pool })
    }

    /// Wrap an existing pool (used by tests)
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Access the underlying sqlx pool
    pub fn inner(&self) -> &PgPool {
        &self.pool
    }

    /// Ping the database to check connectivity
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseConnection {
                message: format!("Ping failed: {}", e),
            })?;
        Ok(())
    }

    /// Close the pool (reverse-order teardown)
    pub async fn close(&self) {
        self.pool.close().await;
        info!("Database pool closed");
    }
}

/// Quote a PostgreSQL identifier for dynamic SQL.
///
/// This is the single audited path for interpolating schema, table and column
/// names. Names containing anything outside `[A-Za-z0-9_]` are rejected, so a
/// quoted identifier can never terminate its own quoting.
pub fn quote_ident(name: &str) -> Result<String> {
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(AppError::Validation {
            message: format!("Invalid identifier: {:?}", name),
        });
    }
    Ok(format!("\"{}\"", name))
}

/// Quote a `schema.table` pair
pub fn quote_qualified(schema: &str, table: &str) -> Result<String> {
    Ok(format!("{}.{}", quote_ident(schema)?, quote_ident(table)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident_accepts_plain_names() {
        assert_eq!(quote_ident("products").unwrap(), "\"products\"");
        assert_eq!(quote_ident("im_stock_2024").unwrap(), "\"im_stock_2024\"");
    }

    #[test]
    fn test_quote_ident_rejects_injection() {
        assert!(quote_ident("products\"; DROP TABLE x; --").is_err());
        assert!(quote_ident("a.b").is_err());
        assert!(quote_ident("").is_err());
        assert!(quote_ident("name with space").is_err());
    }

    #[test]
    fn test_quote_qualified() {
        assert_eq!(
            quote_qualified("public", "orders").unwrap(),
            "\"public\".\"orders\""
        );
    }
}
