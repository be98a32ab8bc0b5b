//! Bootstrap DDL for the `atabot` storage schema
//!
//! Executed once at startup. Every statement is idempotent so repeated starts
//! are safe. The embeddings column dimension follows the configured model.

use super::DbPool;
use crate::errors::Result;
use tracing::info;

/// Create the `atabot` schema, its tables and indexes if they do not exist.
pub async fn ensure_storage(pool: &DbPool, dimension: usize) -> Result<()> {
    let statements = [
        "CREATE EXTENSION IF NOT EXISTS vector".to_string(),
        "CREATE SCHEMA IF NOT EXISTS atabot".to_string(),
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS atabot.embeddings (
                id VARCHAR PRIMARY KEY,
                schema_name VARCHAR NOT NULL,
                table_name VARCHAR NOT NULL,
                content TEXT NOT NULL,
                embedding vector({dimension}),
                metadata JSONB,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#
        ),
        "CREATE INDEX IF NOT EXISTS idx_embeddings_schema_table
         ON atabot.embeddings (schema_name, table_name)"
            .to_string(),
        "CREATE INDEX IF NOT EXISTS idx_embeddings_embedding
         ON atabot.embeddings USING ivfflat (embedding vector_cosine_ops) WITH (lists = 100)"
            .to_string(),
        r#"
        CREATE TABLE IF NOT EXISTS atabot.embedding_cache (
            text_hash VARCHAR PRIMARY KEY,
            embedding FLOAT8[],
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            last_accessed TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            access_count INT NOT NULL DEFAULT 1,
            metadata JSONB
        )
        "#
        .to_string(),
        "CREATE INDEX IF NOT EXISTS idx_cache_accessed
         ON atabot.embedding_cache (last_accessed)"
            .to_string(),
        r#"
        CREATE TABLE IF NOT EXISTS atabot.managed_schemas (
            schema_name VARCHAR PRIMARY KEY,
            display_name VARCHAR,
            is_active BOOLEAN NOT NULL DEFAULT TRUE,
            metadata JSONB,
            learned_patterns JSONB,
            total_tables INT NOT NULL DEFAULT 0,
            total_rows BIGINT NOT NULL DEFAULT 0,
            business_domain VARCHAR,
            last_synced_at TIMESTAMPTZ
        )
        "#
        .to_string(),
        r#"
        CREATE TABLE IF NOT EXISTS atabot.sync_status (
            schema_name VARCHAR NOT NULL,
            table_name VARCHAR NOT NULL,
            sync_status VARCHAR NOT NULL DEFAULT 'pending',
            last_sync_completed TIMESTAMPTZ,
            rows_synced BIGINT NOT NULL DEFAULT 0,
            realtime_enabled BOOLEAN NOT NULL DEFAULT FALSE,
            last_error TEXT,
            PRIMARY KEY (schema_name, table_name)
        )
        "#
        .to_string(),
        r#"
        CREATE TABLE IF NOT EXISTS atabot.query_logs (
            id BIGSERIAL PRIMARY KEY,
            session_id VARCHAR,
            query TEXT,
            response_time_ms BIGINT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#
        .to_string(),
        // Change-notification function used by per-table realtime triggers
        r#"
        CREATE OR REPLACE FUNCTION atabot.notify_data_change()
        RETURNS TRIGGER AS $$
        DECLARE
            payload JSON;
        BEGIN
            IF TG_OP = 'DELETE' THEN
                payload = json_build_object(
                    'schema', TG_TABLE_SCHEMA,
                    'table', TG_TABLE_NAME,
                    'operation', TG_OP,
                    'data', row_to_json(OLD));
            ELSE
                payload = json_build_object(
                    'schema', TG_TABLE_SCHEMA,
                    'table', TG_TABLE_NAME,
                    'operation', TG_OP,
                    'data', row_to_json(NEW));
            END IF;
            PERFORM pg_notify('atabot_changes', payload::text);
            RETURN NULL;
        END;
        $$ LANGUAGE plpgsql
        "#
        .to_string(),
    ];

    for stmt in &statements {
        sqlx::query(stmt).execute(pool.inner()).await?;
    }

    info!(dimension, "Storage schema ready");
    Ok(())
}
