//! Sync pipeline
//!
//! Full sync deletes a table's embeddings and re-streams every row;
//! incremental sync fetches only rows changed since the last successful
//! completion (the watermark), adding an `updated_at` column and trigger to
//! tables that have no usable timestamp column, and degrading to a full sync
//! when that is not permitted. All embedding work funnels through the single
//! queue worker; pages whose batches fail are skipped without writing
//! zero-vectors and picked up by a later pass.

use crate::jobs::JobRegistry;
use crate::render::{render_searchable_text, sanitize_metadata, stable_row_id};
use atabot_common::cache::text_hash;
use atabot_common::db::{quote_ident, quote_qualified, row_to_json, ColumnInfo, DbPool};
use atabot_common::embeddings::{is_valid_embedding, InputType};
use atabot_common::errors::{AppError, Result};
use atabot_common::metrics;
use atabot_common::queue::EmbeddingQueue;
use atabot_common::registry::{SchemaRegistry, TablePatterns};
use atabot_common::store::{StoredEmbedding, VectorStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::Row;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Sync mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    Full,
    Incremental,
}

impl SyncMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMode::Full => "full",
            SyncMode::Incremental => "incremental",
        }
    }
}

/// Outcome of one table sync
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub mode: SyncMode,
    pub rows_processed: u64,
    pub rows_stored: u64,
    pub duration_seconds: f64,
}

/// Real-time change operations funnelled into the single-row path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

/// Per-table sync state row
#[derive(Debug, Clone, Serialize)]
pub struct TableSyncStatus {
    pub schema_name: String,
    pub table_name: String,
    pub sync_status: String,
    pub last_sync_completed: Option<DateTime<Utc>>,
    pub rows_synced: i64,
    pub realtime_enabled: bool,
    pub last_error: Option<String>,
}

/// Preferred update columns for the incremental watermark, in order
const UPDATE_COLUMN_PREFERENCE: &[&str] = &[
    "updated_at",
    "modified_at",
    "changed_at",
    "last_modified",
    "created_at",
];

/// Sync pipeline over one database
pub struct SyncService {
    pool: DbPool,
    store: Arc<dyn VectorStore>,
    queue: Arc<EmbeddingQueue>,
    registry: SchemaRegistry,
    jobs: Arc<JobRegistry>,
    batch_size: usize,
    wait_timeout: Duration,
    dimension: usize,
}

impl SyncService {
    pub fn new(
        pool: DbPool,
        store: Arc<dyn VectorStore>,
        queue: Arc<EmbeddingQueue>,
        registry: SchemaRegistry,
        batch_size: usize,
        wait_timeout: Duration,
        dimension: usize,
    ) -> Self {
        Self {
            pool,
            store,
            queue,
            registry,
            jobs: Arc::new(JobRegistry::new()),
            batch_size: batch_size.max(1),
            wait_timeout,
            dimension,
        }
    }

    pub fn jobs(&self) -> &Arc<JobRegistry> {
        &self.jobs
    }

    /// Sync one table; progress is reported against `job_id`
    pub async fn sync_table(
        &self,
        schema: &str,
        table: &str,
        mode: SyncMode,
        job_id: &str,
    ) -> Result<SyncReport> {
        let started = Instant::now();
        info!(schema, table, mode = mode.as_str(), job_id, "Starting table sync");

        self.registry.ensure_registered(schema).await?;

        let columns = self.pool.get_table_columns(schema, table).await?;
        if columns.is_empty() {
            return Err(AppError::TableNotFound {
                schema: schema.to_string(),
                table: table.to_string(),
            });
        }

        self.ensure_sync_tracking(schema, table).await?;
        self.set_sync_state(schema, table, "running").await?;

        let result = match mode {
            SyncMode::Full => self.full_sync(schema, table, &columns, job_id).await,
            SyncMode::Incremental => self.incremental_sync(schema, table, &columns, job_id).await,
        };

        match result {
            Ok((processed, stored)) => {
                self.mark_completed(schema, table, stored).await?;
                self.registry.touch_synced(schema).await.ok();

                let duration = started.elapsed().as_secs_f64();
                metrics::record_sync(duration, stored as usize, schema);
                info!(schema, table, stored, duration, "Table sync completed");

                Ok(SyncReport {
                    mode,
                    rows_processed: processed,
                    rows_stored: stored,
                    duration_seconds: duration,
                })
            }
            Err(e) => {
                error!(schema, table, error = %e, "Table sync failed");
                self.mark_failed(schema, table, &e).await.ok();
                Err(e)
            }
        }
    }

    /// Sync a whole schema (or a subset of its tables). Sibling tables
    /// continue past failures; per-table errors are recorded on the job.
    pub async fn sync_schema(
        &self,
        schema: &str,
        tables: Option<Vec<String>>,
        mode: SyncMode,
        job_id: &str,
    ) -> Result<()> {
        self.registry.ensure_registered(schema).await?;

        let tables = match tables {
            Some(tables) => tables,
            None => self
                .pool
                .get_tables(schema)
                .await?
                .into_iter()
                .map(|t| t.table_name)
                .collect(),
        };

        let total = tables.len() as u64;
        for (i, table) in tables.iter().enumerate() {
            if let Err(e) = self.sync_table(schema, table, mode, job_id).await {
                self.jobs
                    .push_error(job_id, format!("Table {}: {}", table, e));
            }
            self.jobs.update_progress(job_id, (i + 1) as u64, total);
        }

        Ok(())
    }

    async fn full_sync(
        &self,
        schema: &str,
        table: &str,
        columns: &[ColumnInfo],
        job_id: &str,
    ) -> Result<(u64, u64)> {
        // Full sync replaces everything for this table
        self.store.delete_by_schema_table(schema, Some(table)).await?;

        let patterns = self.registry.table_patterns(schema, table).await?;
        let pk = patterns
            .primary_key
            .clone()
            .or_else(|| atabot_common::registry::detect_primary_key(columns));

        let total = self.count_rows(schema, table).await?;
        if total == 0 {
            info!(schema, table, "No rows to sync");
            return Ok((0, 0));
        }

        let mut processed = 0u64;
        let mut stored = 0u64;
        let mut offset = 0u64;

        while offset < total {
            let rows = self
                .fetch_page(schema, table, pk.as_deref(), offset, self.batch_size)
                .await?;
            if rows.is_empty() {
                break;
            }

            processed += rows.len() as u64;
            offset += self.batch_size as u64;

            stored += self.process_page(schema, table, rows, &patterns).await? as u64;
            self.jobs.update_progress(job_id, processed, total);
        }

        Ok((processed, stored))
    }

    async fn incremental_sync(
        &self,
        schema: &str,
        table: &str,
        columns: &[ColumnInfo],
        job_id: &str,
    ) -> Result<(u64, u64)> {
        let update_column = match select_update_column(columns) {
            Some(col) => col,
            None => {
                info!(schema, table, "No timestamp column, attempting to add one");
                match self.ensure_timestamp_column(schema, table).await {
                    Ok(()) => "updated_at".to_string(),
                    Err(e) => {
                        warn!(
                            schema,
                            table,
                            error = %e,
                            "Cannot add timestamp column, falling back to full sync"
                        );
                        return self.full_sync(schema, table, columns, job_id).await;
                    }
                }
            }
        };

        let watermark = self.watermark(schema, table).await?;
        let patterns = self.registry.table_patterns(schema, table).await?;

        let mut processed = 0u64;
        let mut stored = 0u64;
        let mut offset = 0u64;

        loop {
            let rows = self
                .fetch_changed_page(schema, table, &update_column, watermark, offset, self.batch_size)
                .await?;
            if rows.is_empty() {
                break;
            }

            processed += rows.len() as u64;
            offset += self.batch_size as u64;

            stored += self.process_page(schema, table, rows, &patterns).await? as u64;
            self.jobs.update_progress(job_id, processed, processed.max(1));
        }

        if processed == 0 {
            info!(schema, table, "No changes since last sync");
        }

        Ok((processed, stored))
    }

    /// Render, sanitize, embed and store one page of rows. A failed or timed
    /// out batch skips the page without writing anything; those rows stay
    /// eligible for a later pass because the watermark has not advanced.
    async fn process_page(
        &self,
        schema: &str,
        table: &str,
        rows: Vec<Map<String, Value>>,
        patterns: &TablePatterns,
    ) -> Result<usize> {
        let mut ids = Vec::with_capacity(rows.len());
        let mut texts = Vec::with_capacity(rows.len());
        let mut metadatas = Vec::with_capacity(rows.len());

        for row in &rows {
            let text = render_searchable_text(row, table, patterns);
            if text.trim().len() < 10 {
                warn!(schema, table, "Skipping row with insufficient text content");
                continue;
            }

            let mut metadata = sanitize_metadata(row);
            metadata.insert("_schema".into(), Value::String(schema.to_string()));
            metadata.insert("_table".into(), Value::String(table.to_string()));

            ids.push(stable_row_id(
                schema,
                table,
                row,
                patterns.primary_key.as_deref(),
                &text,
            ));
            texts.push(text);
            metadatas.push(Value::Object(metadata));
        }

        if texts.is_empty() {
            return Ok(0);
        }

        let batch_id = self.queue.submit(texts.clone(), metadatas.clone()).await?;
        if !self.queue.wait(&batch_id, self.wait_timeout).await {
            error!(schema, table, batch_id = %batch_id, "Embedding batch failed or timed out, skipping page");
            return Ok(0);
        }

        let mut embeddings = Vec::with_capacity(texts.len());
        for i in 0..texts.len() {
            let hash = text_hash(&texts[i], InputType::Document);
            let Some(vector) = self.queue.lookup(&hash).await else {
                warn!(schema, table, "No embedding resolved for row, skipping");
                continue;
            };
            if !is_valid_embedding(&vector, self.dimension) {
                warn!(schema, table, "Skipping invalid embedding for row");
                continue;
            }
            embeddings.push(StoredEmbedding {
                id: ids[i].clone(),
                schema_name: schema.to_string(),
                table_name: table.to_string(),
                content: texts[i].clone(),
                vector,
                metadata: metadatas[i].clone(),
            });
        }

        if embeddings.is_empty() {
            error!(schema, table, "No valid embeddings to store for page");
            return Ok(0);
        }

        self.store.upsert_many(&embeddings).await
    }

    /// Real-time change handler: INSERT/UPDATE funnel through the single-row
    /// sync path, DELETE removes the stored embedding
    pub async fn process_change(
        &self,
        schema: &str,
        table: &str,
        op: ChangeOp,
        row: Map<String, Value>,
    ) -> Result<()> {
        let patterns = self.registry.table_patterns(schema, table).await?;

        match op {
            ChangeOp::Delete => {
                let text = render_searchable_text(&row, table, &patterns);
                let id = stable_row_id(schema, table, &row, patterns.primary_key.as_deref(), &text);
                if self.store.delete_by_id(&id).await? {
                    info!(schema, table, id = %id, "Deleted embedding for removed row");
                }
                Ok(())
            }
            ChangeOp::Insert | ChangeOp::Update => {
                let stored = self
                    .process_page(schema, table, vec![row], &patterns)
                    .await?;
                if stored == 0 {
                    warn!(schema, table, "Real-time change produced no stored embedding");
                }
                Ok(())
            }
        }
    }

    /// Enable real-time propagation for a table: attach the notify trigger
    /// and flag the sync status row
    pub async fn enable_realtime_sync(&self, schema: &str, table: &str) -> Result<()> {
        let qualified = quote_qualified(schema, table)?;
        let trigger = quote_ident(&format!("atabot_sync_{}", table))?;

        sqlx::query(&format!("DROP TRIGGER IF EXISTS {trigger} ON {qualified}"))
            .execute(self.pool.inner())
            .await?;
        sqlx::query(&format!(
            r#"
            CREATE TRIGGER {trigger}
            AFTER INSERT OR UPDATE OR DELETE ON {qualified}
            FOR EACH ROW EXECUTE FUNCTION atabot.notify_data_change()
            "#
        ))
        .execute(self.pool.inner())
        .await?;

        self.ensure_sync_tracking(schema, table).await?;
        sqlx::query(
            r#"
            UPDATE atabot.sync_status SET realtime_enabled = TRUE
            WHERE schema_name = $1 AND table_name = $2
            "#,
        )
        .bind(schema)
        .bind(table)
        .execute(self.pool.inner())
        .await?;

        info!(schema, table, "Real-time sync enabled");
        Ok(())
    }

    /// Drop a table's (or a schema's) embeddings and reset its sync state
    pub async fn clear_embeddings(&self, schema: &str, table: Option<&str>) -> Result<u64> {
        let deleted = self.store.delete_by_schema_table(schema, table).await?;

        match table {
            Some(table) => {
                sqlx::query(
                    r#"
                    UPDATE atabot.sync_status
                    SET sync_status = 'pending', last_sync_completed = NULL, rows_synced = 0
                    WHERE schema_name = $1 AND table_name = $2
                    "#,
                )
                .bind(schema)
                .bind(table)
                .execute(self.pool.inner())
                .await?;
            }
            None => {
                sqlx::query(
                    r#"
                    UPDATE atabot.sync_status
                    SET sync_status = 'pending', last_sync_completed = NULL, rows_synced = 0
                    WHERE schema_name = $1
                    "#,
                )
                .bind(schema)
                .execute(self.pool.inner())
                .await?;
            }
        }

        info!(schema, ?table, deleted, "Cleared embeddings");
        Ok(deleted)
    }

    /// Sync status rows, optionally restricted to one schema
    pub async fn sync_status(&self, schema: Option<&str>) -> Result<Vec<TableSyncStatus>> {
        let rows = match schema {
            Some(schema) => {
                sqlx::query(
                    r#"
                    SELECT schema_name, table_name, sync_status, last_sync_completed,
                           rows_synced, realtime_enabled, last_error
                    FROM atabot.sync_status
                    WHERE schema_name = $1
                    ORDER BY table_name
                    "#,
                )
                .bind(schema)
                .fetch_all(self.pool.inner())
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT schema_name, table_name, sync_status, last_sync_completed,
                           rows_synced, realtime_enabled, last_error
                    FROM atabot.sync_status
                    ORDER BY schema_name, table_name
                    "#,
                )
                .fetch_all(self.pool.inner())
                .await?
            }
        };

        Ok(rows
            .iter()
            .map(|r| TableSyncStatus {
                schema_name: r.get("schema_name"),
                table_name: r.get("table_name"),
                sync_status: r.get("sync_status"),
                last_sync_completed: r.try_get("last_sync_completed").ok(),
                rows_synced: r.get("rows_synced"),
                realtime_enabled: r.get("realtime_enabled"),
                last_error: r.try_get("last_error").ok().flatten(),
            })
            .collect())
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    async fn count_rows(&self, schema: &str, table: &str) -> Result<u64> {
        let qualified = quote_qualified(schema, table)?;
        let row = sqlx::query(&format!("SELECT COUNT(*)::int8 AS total FROM {qualified}"))
            .fetch_one(self.pool.inner())
            .await?;
        Ok(row.get::<i64, _>("total").max(0) as u64)
    }

    async fn fetch_page(
        &self,
        schema: &str,
        table: &str,
        pk: Option<&str>,
        offset: u64,
        limit: usize,
    ) -> Result<Vec<Map<String, Value>>> {
        let qualified = quote_qualified(schema, table)?;
        let sql = match pk {
            Some(pk) => format!(
                "SELECT * FROM {qualified} ORDER BY {} LIMIT $1 OFFSET $2",
                quote_ident(pk)?
            ),
            None => format!("SELECT * FROM {qualified} LIMIT $1 OFFSET $2"),
        };

        let rows = sqlx::query(&sql)
            .bind(limit as i64)
            .bind(offset as i64)
            .fetch_all(self.pool.inner())
            .await?;

        Ok(rows.iter().map(row_to_json).collect())
    }

    async fn fetch_changed_page(
        &self,
        schema: &str,
        table: &str,
        update_column: &str,
        watermark: Option<DateTime<Utc>>,
        offset: u64,
        limit: usize,
    ) -> Result<Vec<Map<String, Value>>> {
        let qualified = quote_qualified(schema, table)?;
        let col = quote_ident(update_column)?;

        let rows = match watermark {
            Some(watermark) => {
                let sql = format!(
                    "SELECT * FROM {qualified} WHERE {col}::timestamptz > $1 ORDER BY {col} LIMIT $2 OFFSET $3"
                );
                sqlx::query(&sql)
                    .bind(watermark)
                    .bind(limit as i64)
                    .bind(offset as i64)
                    .fetch_all(self.pool.inner())
                    .await?
            }
            None => {
                // First sync: everything is new
                let sql = format!("SELECT * FROM {qualified} ORDER BY {col} LIMIT $1 OFFSET $2");
                sqlx::query(&sql)
                    .bind(limit as i64)
                    .bind(offset as i64)
                    .fetch_all(self.pool.inner())
                    .await?
            }
        };

        Ok(rows.iter().map(row_to_json).collect())
    }

    /// Add an `updated_at` column plus a BEFORE UPDATE trigger keeping it
    /// current; fails on insufficient privileges
    async fn ensure_timestamp_column(&self, schema: &str, table: &str) -> Result<()> {
        let qualified = quote_qualified(schema, table)?;
        let func = quote_ident(&format!("update_{}_updated_at", table))?;
        let trigger = quote_ident(&format!("update_{}_updated_at", table))?;
        let schema_q = quote_ident(schema)?;

        sqlx::query(&format!(
            "ALTER TABLE {qualified} ADD COLUMN IF NOT EXISTS updated_at TIMESTAMP DEFAULT NOW()"
        ))
        .execute(self.pool.inner())
        .await?;

        sqlx::query(&format!(
            r#"
            CREATE OR REPLACE FUNCTION {schema_q}.{func}()
            RETURNS TRIGGER AS $$
            BEGIN
                NEW.updated_at = NOW();
                RETURN NEW;
            END;
            $$ LANGUAGE plpgsql
            "#
        ))
        .execute(self.pool.inner())
        .await?;

        sqlx::query(&format!("DROP TRIGGER IF EXISTS {trigger} ON {qualified}"))
            .execute(self.pool.inner())
            .await?;
        sqlx::query(&format!(
            r#"
            CREATE TRIGGER {trigger}
            BEFORE UPDATE ON {qualified}
            FOR EACH ROW EXECUTE FUNCTION {schema_q}.{func}()
            "#
        ))
        .execute(self.pool.inner())
        .await?;

        info!(schema, table, "Added updated_at column and trigger");
        Ok(())
    }

    async fn ensure_sync_tracking(&self, schema: &str, table: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO atabot.sync_status (schema_name, table_name, sync_status)
            VALUES ($1, $2, 'pending')
            ON CONFLICT (schema_name, table_name) DO NOTHING
            "#,
        )
        .bind(schema)
        .bind(table)
        .execute(self.pool.inner())
        .await?;
        Ok(())
    }

    async fn set_sync_state(&self, schema: &str, table: &str, state: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE atabot.sync_status SET sync_status = $3
            WHERE schema_name = $1 AND table_name = $2
            "#,
        )
        .bind(schema)
        .bind(table)
        .bind(state)
        .execute(self.pool.inner())
        .await?;
        Ok(())
    }

    /// The watermark only advances here, on successful completion
    async fn mark_completed(&self, schema: &str, table: &str, rows_synced: u64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO atabot.sync_status
                (schema_name, table_name, sync_status, last_sync_completed, rows_synced)
            VALUES ($1, $2, 'completed', NOW(), $3)
            ON CONFLICT (schema_name, table_name) DO UPDATE SET
                sync_status = 'completed',
                last_sync_completed = NOW(),
                rows_synced = $3,
                last_error = NULL
            "#,
        )
        .bind(schema)
        .bind(table)
        .bind(rows_synced as i64)
        .execute(self.pool.inner())
        .await?;
        Ok(())
    }

    async fn mark_failed(&self, schema: &str, table: &str, error: &AppError) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO atabot.sync_status (schema_name, table_name, sync_status, last_error)
            VALUES ($1, $2, 'failed', $3)
            ON CONFLICT (schema_name, table_name) DO UPDATE SET
                sync_status = 'failed',
                last_error = $3
            "#,
        )
        .bind(schema)
        .bind(table)
        .bind(error.to_string())
        .execute(self.pool.inner())
        .await?;
        Ok(())
    }

    pub(crate) async fn watermark(
        &self,
        schema: &str,
        table: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        let row = sqlx::query(
            r#"
            SELECT last_sync_completed FROM atabot.sync_status
            WHERE schema_name = $1 AND table_name = $2
            "#,
        )
        .bind(schema)
        .bind(table)
        .fetch_optional(self.pool.inner())
        .await?;

        Ok(row.and_then(|r| r.try_get("last_sync_completed").ok()))
    }
}

/// Pick the update column: preferred names first, then the first
/// timestamp-typed column
fn select_update_column(columns: &[ColumnInfo]) -> Option<String> {
    for preferred in UPDATE_COLUMN_PREFERENCE {
        if let Some(col) = columns
            .iter()
            .find(|c| c.column_name.eq_ignore_ascii_case(preferred))
        {
            return Some(col.column_name.clone());
        }
    }
    columns
        .iter()
        .find(|c| c.is_timestamp())
        .map(|c| c.column_name.clone())
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

    fn service_columns() -> Vec<ColumnInfo> {
        vec![
            col("id", "integer"),
            col("name", "text"),
            col("modified_at", "timestamp without time zone"),
            col("seen_on", "date"),
        ]
    }

    #[test]
    fn test_update_column_preference_order() {
        let columns = service_columns();
        assert_eq!(select_update_column(&columns).unwrap(), "modified_at");

        let mut with_updated = columns.clone();
        with_updated.push(col("updated_at", "timestamp with time zone"));
        assert_eq!(select_update_column(&with_updated).unwrap(), "updated_at");
    }

    #[test]
    fn test_update_column_falls_back_to_first_timestamp() {
        let columns = vec![col("id", "integer"), col("seen_on", "date")];
        assert_eq!(select_update_column(&columns).unwrap(), "seen_on");

        let columns = vec![col("id", "integer"), col("name", "text")];
        assert!(select_update_column(&columns).is_none());
    }

    #[test]
    fn test_change_op_parses_trigger_operations() {
        assert_eq!(
            serde_json::from_str::<ChangeOp>("\"INSERT\"").unwrap(),
            ChangeOp::Insert
        );
        assert_eq!(
            serde_json::from_str::<ChangeOp>("\"DELETE\"").unwrap(),
            ChangeOp::Delete
        );
    }
}
