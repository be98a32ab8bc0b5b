//! Managed schema registry
//!
//! A schema must be registered in `atabot.managed_schemas` before any of its
//! tables can be synced. Registration stores per-table patterns (entity type,
//! display and searchable fields, terminology, primary key) that drive row
//! rendering and search. When a schema has never been analyzed, a minimal
//! registration is derived from column heuristics.

use crate::db::{ColumnInfo, DbPool};
use crate::errors::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::Row;
use std::collections::HashMap;
use tracing::info;

/// Learned per-table metadata driving rendering and search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TablePatterns {
    #[serde(default = "default_entity_type")]
    pub entity_type: String,
    #[serde(default)]
    pub display_fields: Vec<String>,
    #[serde(default)]
    pub searchable_fields: Vec<String>,
    #[serde(default)]
    pub terminology: HashMap<String, String>,
    #[serde(default)]
    pub primary_key: Option<String>,
}

fn default_entity_type() -> String {
    "record".to_string()
}

impl Default for TablePatterns {
    fn default() -> Self {
        Self {
            entity_type: default_entity_type(),
            display_fields: Vec::new(),
            searchable_fields: Vec::new(),
            terminology: HashMap::new(),
            primary_key: None,
        }
    }
}

/// A registered schema
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagedSchema {
    pub schema_name: String,
    pub display_name: Option<String>,
    pub is_active: bool,
    pub total_tables: i32,
    pub total_rows: i64,
    pub last_synced_at: Option<DateTime<Utc>>,
    /// Per-table patterns keyed by table name
    pub metadata: HashMap<String, TablePatterns>,
}

/// Primary-key heuristic: id, uuid, guid, *_id, *_uuid, or a serial column
pub fn detect_primary_key(columns: &[ColumnInfo]) -> Option<String> {
    for col in columns {
        let name = col.column_name.to_lowercase();
        if name == "id" || name == "uuid" || name == "guid" {
            return Some(col.column_name.clone());
        }
    }
    for col in columns {
        let name = col.column_name.to_lowercase();
        if name.ends_with("_id") || name.ends_with("_uuid") {
            return Some(col.column_name.clone());
        }
    }
    for col in columns {
        if col.data_type.to_lowercase().contains("serial") {
            return Some(col.column_name.clone());
        }
    }
    None
}

/// Minimal patterns from column heuristics: entity type `record`, first
/// three textual columns as display and searchable fields
pub fn default_patterns(columns: &[ColumnInfo]) -> TablePatterns {
    let textual: Vec<String> = columns
        .iter()
        .filter(|c| c.is_textual())
        .map(|c| c.column_name.clone())
        .collect();

    TablePatterns {
        entity_type: default_entity_type(),
        display_fields: textual.iter().take(3).cloned().collect(),
        searchable_fields: textual,
        terminology: HashMap::new(),
        primary_key: detect_primary_key(columns),
    }
}

/// Registry over `atabot.managed_schemas`
#[derive(Clone)]
pub struct SchemaRegistry {
    pool: DbPool,
}

impl SchemaRegistry {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// List all registered schemas
    pub async fn list(&self) -> Result<Vec<ManagedSchema>> {
        let rows = sqlx::query(
            r#"
            SELECT schema_name, display_name, is_active, total_tables, total_rows,
                   last_synced_at, metadata
            FROM atabot.managed_schemas
            ORDER BY schema_name
            "#,
        )
        .fetch_all(self.pool.inner())
        .await?;

        Ok(rows.iter().map(Self::schema_from_row).collect())
    }

    /// Get one registered schema
    pub async fn get(&self, schema: &str) -> Result<Option<ManagedSchema>> {
        let row = sqlx::query(
            r#"
            SELECT schema_name, display_name, is_active, total_tables, total_rows,
                   last_synced_at, metadata
            FROM atabot.managed_schemas
            WHERE schema_name = $1
            "#,
        )
        .bind(schema)
        .fetch_optional(self.pool.inner())
        .await?;

        Ok(row.as_ref().map(Self::schema_from_row))
    }

    /// First active schema, used as the default when a request names none
    pub async fn first_active(&self) -> Result<Option<String>> {
        let row = sqlx::query(
            r#"
            SELECT schema_name FROM atabot.managed_schemas
            WHERE is_active
            ORDER BY schema_name
            LIMIT 1
            "#,
        )
        .fetch_optional(self.pool.inner())
        .await?;

        Ok(row.map(|r| r.get("schema_name")))
    }

    /// Patterns for one table, defaulting when unregistered or absent
    pub async fn table_patterns(&self, schema: &str, table: &str) -> Result<TablePatterns> {
        if let Some(managed) = self.get(schema).await? {
            if let Some(patterns) = managed.metadata.get(table) {
                return Ok(patterns.clone());
            }
        }
        let columns = self.pool.get_table_columns(schema, table).await?;
        Ok(default_patterns(&columns))
    }

    /// Register a schema with heuristic patterns for every table. Idempotent:
    /// re-registering refreshes metadata and re-activates.
    pub async fn register(&self, schema: &str) -> Result<ManagedSchema> {
        let tables = self.pool.get_tables(schema).await?;

        let mut metadata = HashMap::new();
        let mut total_rows: i64 = 0;
        for table in &tables {
            let columns = self
                .pool
                .get_table_columns(schema, &table.table_name)
                .await?;
            metadata.insert(table.table_name.clone(), default_patterns(&columns));
            total_rows += table.estimated_row_count;
        }

        let display_name = schema.replace('_', " ");
        let metadata_json = serde_json::to_value(&metadata)?;

        sqlx::query(
            r#"
            INSERT INTO atabot.managed_schemas
                (schema_name, display_name, is_active, metadata, total_tables, total_rows)
            VALUES ($1, $2, TRUE, $3, $4, $5)
            ON CONFLICT (schema_name) DO UPDATE SET
                metadata = EXCLUDED.metadata,
                total_tables = EXCLUDED.total_tables,
                total_rows = EXCLUDED.total_rows,
                is_active = TRUE
            "#,
        )
        .bind(schema)
        .bind(&display_name)
        .bind(&metadata_json)
        .bind(tables.len() as i32)
        .bind(total_rows)
        .execute(self.pool.inner())
        .await?;

        info!(schema, tables = tables.len(), "Schema registered");

        Ok(ManagedSchema {
            schema_name: schema.to_string(),
            display_name: Some(display_name),
            is_active: true,
            total_tables: tables.len() as i32,
            total_rows,
            last_synced_at: None,
            metadata,
        })
    }

    /// Ensure the schema is registered, performing a minimal registration
    /// when absent (sync pre-condition)
    pub async fn ensure_registered(&self, schema: &str) -> Result<()> {
        if self.get(schema).await?.is_none() {
            info!(schema, "Schema not registered, performing minimal registration");
            self.register(schema).await?;
        }
        Ok(())
    }

    /// Activate or deactivate a schema
    pub async fn set_active(&self, schema: &str, active: bool) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE atabot.managed_schemas SET is_active = $2 WHERE schema_name = $1",
        )
        .bind(schema)
        .bind(active)
        .execute(self.pool.inner())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Remove a schema registration
    pub async fn delete(&self, schema: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM atabot.managed_schemas WHERE schema_name = $1")
            .bind(schema)
            .execute(self.pool.inner())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Record a completed sync in the schema-level stats
    pub async fn touch_synced(&self, schema: &str) -> Result<()> {
        sqlx::query(
            "UPDATE atabot.managed_schemas SET last_synced_at = NOW() WHERE schema_name = $1",
        )
        .bind(schema)
        .execute(self.pool.inner())
        .await?;
        Ok(())
    }

    fn schema_from_row(row: &sqlx::postgres::PgRow) -> ManagedSchema {
        let metadata: HashMap<String, TablePatterns> = row
            .try_get::<Option<Value>, _>("metadata")
            .ok()
            .flatten()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();

        ManagedSchema {
            schema_name: row.get("schema_name"),
            display_name: row.try_get("display_name").ok(),
            is_active: row.get("is_active"),
            total_tables: row.get("total_tables"),
            total_rows: row.get("total_rows"),
            last_synced_at: row.try_get("last_synced_at").ok(),
            metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(name: &str, data_type: &str) -> ColumnInfo {
        ColumnInfo {
            column_name: name.into(),
            data_type: data_type.into(),
            is_nullable: true,
        }
    }

    #[test]
    fn test_detect_primary_key_prefers_id() {
        let columns = vec![
            col("product_id", "integer"),
            col("id", "integer"),
            col("name", "text"),
        ];
        assert_eq!(detect_primary_key(&columns).unwrap(), "id");
    }

    #[test]
    fn test_detect_primary_key_falls_back_to_suffix_then_serial() {
        let columns = vec![col("order_id", "integer"), col("name", "text")];
        assert_eq!(detect_primary_key(&columns).unwrap(), "order_id");

        let columns = vec![col("seq", "bigserial"), col("name", "text")];
        assert_eq!(detect_primary_key(&columns).unwrap(), "seq");

        let columns = vec![col("name", "text")];
        assert!(detect_primary_key(&columns).is_none());
    }

    #[test]
    fn test_default_patterns_use_textual_columns() {
        let columns = vec![
            col("id", "integer"),
            col("name", "character varying"),
            col("description", "text"),
            col("sku", "character varying"),
            col("note", "text"),
            col("qty", "integer"),
        ];
        let patterns = default_patterns(&columns);
        assert_eq!(patterns.entity_type, "record");
        assert_eq!(patterns.display_fields, vec!["name", "description", "sku"]);
        assert_eq!(patterns.searchable_fields.len(), 4);
        assert_eq!(patterns.primary_key.as_deref(), Some("id"));
    }

    #[test]
    fn test_patterns_deserialize_with_missing_fields() {
        let patterns: TablePatterns =
            serde_json::from_value(serde_json::json!({"entity_type": "product"})).unwrap();
        assert_eq!(patterns.entity_type, "product");
        assert!(patterns.display_fields.is_empty());
    }
}
