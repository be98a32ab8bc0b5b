//! information_schema introspection for user schemas
//!
//! The sync pipeline and query branches need column metadata, table lists and
//! foreign keys for schemas the service has never seen before.

use super::DbPool;
use crate::errors::Result;
use serde::{Deserialize, Serialize};
use sqlx::Row;

/// Column metadata for a user table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub column_name: String,
    pub data_type: String,
    pub is_nullable: bool,
}

impl ColumnInfo {
    /// True for textual columns (candidates for display/searchable fields)
    pub fn is_textual(&self) -> bool {
        let t = self.data_type.to_lowercase();
        t.contains("char") || t.contains("text")
    }

    /// True for timestamp/date columns (candidates for the sync watermark)
    pub fn is_timestamp(&self) -> bool {
        let t = self.data_type.to_lowercase();
        t.contains("timestamp") || t.contains("date")
    }
}

/// Table metadata with an estimated row count
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableInfo {
    pub table_name: String,
    pub estimated_row_count: i64,
}

/// A foreign-key edge between two tables in the same schema
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForeignKey {
    pub table_name: String,
    pub column_name: String,
    pub foreign_table_name: String,
    pub foreign_column_name: String,
}

impl DbPool {
    /// List all non-system schemas
    pub async fn get_schemas(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT schema_name
            FROM information_schema.schemata
            WHERE schema_name NOT IN ('pg_catalog', 'information_schema', 'pg_toast', 'atabot')
            ORDER BY schema_name
            "#,
        )
        .fetch_all(self.inner())
        .await?;

        Ok(rows.iter().map(|r| r.get("schema_name")).collect())
    }

    /// List base tables in a schema with estimated row counts
    pub async fn get_tables(&self, schema: &str) -> Result<Vec<TableInfo>> {
        let rows = sqlx::query(
            r#"
            SELECT
                t.table_name,
                COALESCE(
                    (SELECT n_live_tup FROM pg_stat_user_tables
                     WHERE schemaname = $1 AND relname = t.table_name),
                    0
                )::int8 AS estimated_row_count
            FROM information_schema.tables t
            WHERE t.table_schema = $1
              AND t.table_type = 'BASE TABLE'
            ORDER BY t.table_name
            "#,
        )
        .bind(schema)
        .fetch_all(self.inner())
        .await?;

        Ok(rows
            .iter()
            .map(|r| TableInfo {
                table_name: r.get("table_name"),
                estimated_row_count: r.get("estimated_row_count"),
            })
            .collect())
    }

    /// Get column information for a table, in ordinal order
    pub async fn get_table_columns(&self, schema: &str, table: &str) -> Result<Vec<ColumnInfo>> {
        let rows = sqlx::query(
            r#"
            SELECT column_name, data_type, is_nullable
            FROM information_schema.columns
            WHERE table_schema = $1 AND table_name = $2
            ORDER BY ordinal_position
            "#,
        )
        .bind(schema)
        .bind(table)
        .fetch_all(self.inner())
        .await?;

        Ok(rows
            .iter()
            .map(|r| ColumnInfo {
                column_name: r.get("column_name"),
                data_type: r.get("data_type"),
                is_nullable: r.get::<String, _>("is_nullable") == "YES",
            })
            .collect())
    }

    /// Get all foreign-key relationships in a schema
    pub async fn get_foreign_keys(&self, schema: &str) -> Result<Vec<ForeignKey>> {
        let rows = sqlx::query(
            r#"
            SELECT
                tc.table_name,
                kcu.column_name,
                ccu.table_name AS foreign_table_name,
                ccu.column_name AS foreign_column_name
            FROM information_schema.table_constraints AS tc
            JOIN information_schema.key_column_usage AS kcu
                ON tc.constraint_name = kcu.constraint_name
                AND tc.table_schema = kcu.table_schema
            JOIN information_schema.constraint_column_usage AS ccu
                ON ccu.constraint_name = tc.constraint_name
                AND ccu.table_schema = tc.table_schema
            WHERE tc.constraint_type = 'FOREIGN KEY'
              AND tc.table_schema = $1
            "#,
        )
        .bind(schema)
        .fetch_all(self.inner())
        .await?;

        Ok(rows
            .iter()
            .map(|r| ForeignKey {
                table_name: r.get("table_name"),
                column_name: r.get("column_name"),
                foreign_table_name: r.get("foreign_table_name"),
                foreign_column_name: r.get("foreign_column_name"),
            })
            .collect())
    }

    /// Check if the pgvector extension is installed
    pub async fn check_vector_extension(&self) -> Result<bool> {
        let row = sqlx::query(
            "SELECT EXISTS (SELECT 1 FROM pg_extension WHERE extname = 'vector') AS present",
        )
        .fetch_one(self.inner())
        .await?;
        Ok(row.get("present"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_kind_helpers() {
        let c = ColumnInfo {
            column_name: "name".into(),
            data_type: "character varying".into(),
            is_nullable: true,
        };
        assert!(c.is_textual());
        assert!(!c.is_timestamp());

        let c = ColumnInfo {
            column_name: "updated_at".into(),
            data_type: "timestamp with time zone".into(),
            is_nullable: true,
        };
        assert!(c.is_timestamp());
        assert!(!c.is_textual());
    }
}
