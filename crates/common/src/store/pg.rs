//! PostgreSQL + pgvector implementation of the vector store
//!
//! All queries are parameterised; the only interpolated fragments are filter
//! placeholders whose indices are generated alongside the bind list.

use super::{
    MetadataFilters, SearchHit, SortDirection, StoredEmbedding, VectorQuery, VectorStore,
};
use crate::db::DbPool;
use crate::errors::Result;
use async_trait::async_trait;
use pgvector::Vector;
use serde_json::Value;
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::{Postgres, Row};
use tracing::error;

/// Vector store backed by `atabot.embeddings`
#[derive(Clone)]
pub struct PgVectorStore {
    pool: DbPool,
}

impl PgVectorStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Render filter SQL fragments starting at placeholder `$start`.
    ///
    /// Returns the fragment string; binds must be applied in the same order
    /// via [`bind_filters`].
    fn filter_sql(filters: &MetadataFilters, start: &mut usize) -> String {
        let mut sql = String::new();
        for filter in filters.values() {
            if filter.exists {
                sql.push_str(&format!(" AND e.metadata ? ${}", next(start)));
            }
            if filter.eq.is_some() {
                sql.push_str(&format!(
                    " AND e.metadata->>${} = ${}",
                    next(start),
                    next(start)
                ));
            }
            if filter.gte.is_some() {
                sql.push_str(&format!(
                    " AND (e.metadata->>${})::numeric >= ${}",
                    next(start),
                    next(start)
                ));
            }
            if filter.lte.is_some() {
                sql.push_str(&format!(
                    " AND (e.metadata->>${})::numeric <= ${}",
                    next(start),
                    next(start)
                ));
            }
            if filter.contains.is_some() {
                sql.push_str(&format!(
                    " AND e.metadata->>${} ILIKE ${}",
                    next(start),
                    next(start)
                ));
            }
        }
        sql
    }

    fn bind_filters<'q>(
        mut q: Query<'q, Postgres, PgArguments>,
        filters: &'q MetadataFilters,
    ) -> Query<'q, Postgres, PgArguments> {
        for (key, filter) in filters {
            if filter.exists {
                q = q.bind(key);
            }
            if let Some(eq) = &filter.eq {
                let text = match eq {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                q = q.bind(key).bind(text);
            }
            if let Some(gte) = filter.gte {
                q = q.bind(key).bind(gte);
            }
            if let Some(lte) = filter.lte {
                q = q.bind(key).bind(lte);
            }
            if let Some(sub) = &filter.contains {
                q = q.bind(key).bind(format!("%{}%", sub));
            }
        }
        q
    }

    fn hit_from_row(row: &sqlx::postgres::PgRow) -> SearchHit {
        SearchHit {
            id: row.get("id"),
            schema_name: row.get("schema_name"),
            table_name: row.get("table_name"),
            content: row.get("content"),
            metadata: row
                .try_get::<Option<Value>, _>("metadata")
                .ok()
                .flatten()
                .unwrap_or(Value::Null),
            similarity: row.try_get::<f64, _>("similarity").unwrap_or_default() as f32,
        }
    }
}

fn next(counter: &mut usize) -> usize {
    *counter += 1;
    *counter
}

#[async_trait]
impl VectorStore for PgVectorStore {
    async fn upsert(&self, embedding: &StoredEmbedding) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO atabot.embeddings
                (id, schema_name, table_name, content, embedding, metadata, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW(), NOW())
            ON CONFLICT (id) DO UPDATE SET
                content = EXCLUDED.content,
                embedding = EXCLUDED.embedding,
                metadata = EXCLUDED.metadata,
                updated_at = NOW()
            "#,
        )
        .bind(&embedding.id)
        .bind(&embedding.schema_name)
        .bind(&embedding.table_name)
        .bind(&embedding.content)
        .bind(Vector::from(embedding.vector.clone()))
        .bind(&embedding.metadata)
        .execute(self.pool.inner())
        .await?;

        Ok(())
    }

    async fn upsert_many(&self, embeddings: &[StoredEmbedding]) -> Result<usize> {
        if embeddings.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.inner().begin().await?;
        for embedding in embeddings {
            sqlx::query(
                r#"
                INSERT INTO atabot.embeddings
                    (id, schema_name, table_name, content, embedding, metadata, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, NOW(), NOW())
                ON CONFLICT (id) DO UPDATE SET
                    content = EXCLUDED.content,
                    embedding = EXCLUDED.embedding,
                    metadata = EXCLUDED.metadata,
                    updated_at = NOW()
                "#,
            )
            .bind(&embedding.id)
            .bind(&embedding.schema_name)
            .bind(&embedding.table_name)
            .bind(&embedding.content)
            .bind(Vector::from(embedding.vector.clone()))
            .bind(&embedding.metadata)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(embeddings.len())
    }

    async fn delete_by_id(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM atabot.embeddings WHERE id = $1")
            .bind(id)
            .execute(self.pool.inner())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_by_schema_table(&self, schema: &str, table: Option<&str>) -> Result<u64> {
        let result = match table {
            Some(table) => {
                sqlx::query(
                    "DELETE FROM atabot.embeddings WHERE schema_name = $1 AND table_name = $2",
                )
                .bind(schema)
                .bind(table)
                .execute(self.pool.inner())
                .await?
            }
            None => {
                sqlx::query("DELETE FROM atabot.embeddings WHERE schema_name = $1")
                    .bind(schema)
                    .execute(self.pool.inner())
                    .await?
            }
        };
        Ok(result.rows_affected())
    }

    async fn search(&self, query: &VectorQuery) -> Result<Vec<SearchHit>> {
        // $1 vector, $2 schema, $3 min_similarity, then optional table and filters
        let mut counter = 3;
        let table_sql = if query.table.is_some() {
            format!(" AND e.table_name = ${}", next(&mut counter))
        } else {
            String::new()
        };
        let filter_sql = Self::filter_sql(&query.filters, &mut counter);
        let limit_idx = next(&mut counter);

        let sql = format!(
            r#"
            SELECT
                e.id, e.schema_name, e.table_name, e.content, e.metadata,
                (1 - (e.embedding <=> $1))::float8 AS similarity
            FROM atabot.embeddings e
            WHERE e.schema_name = $2
              AND e.embedding IS NOT NULL
              AND 1 - (e.embedding <=> $1) >= $3{table_sql}{filter_sql}
            ORDER BY e.embedding <=> $1
            LIMIT ${limit_idx}
            "#
        );

        let mut q = sqlx::query(&sql)
            .bind(Vector::from(query.vector.clone()))
            .bind(&query.schema)
            .bind(query.min_similarity as f64);
        if let Some(table) = &query.table {
            q = q.bind(table);
        }
        q = Self::bind_filters(q, &query.filters);
        q = q.bind(query.limit as i64);

        // Fail closed: a momentarily unavailable store yields no results
        match q.fetch_all(self.pool.inner()).await {
            Ok(rows) => Ok(rows.iter().map(Self::hit_from_row).collect()),
            Err(e) => {
                error!(error = %e, schema = %query.schema, "Vector search failed");
                Ok(Vec::new())
            }
        }
    }

    async fn aggregate_lookup(
        &self,
        schema: &str,
        table: Option<&str>,
        metadata_field: &str,
        direction: SortDirection,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let mut counter = 2;
        let table_sql = if table.is_some() {
            format!(" AND e.table_name = ${}", next(&mut counter))
        } else {
            String::new()
        };
        let field_idx = next(&mut counter);
        let limit_idx = next(&mut counter);
        let order = match direction {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        };

        let sql = format!(
            r#"
            SELECT
                e.id, e.schema_name, e.table_name, e.content, e.metadata,
                0.0::float8 AS similarity
            FROM atabot.embeddings e
            WHERE e.schema_name = $1{table_sql}
              AND e.metadata->>${field_idx} ~ '^-?[0-9]+\.?[0-9]*$'
            ORDER BY (e.metadata->>${field_idx})::numeric {order}
            LIMIT ${limit_idx}
            "#
        );

        let mut q = sqlx::query(&sql).bind(schema);
        if let Some(table) = table {
            q = q.bind(table);
        }
        q = q.bind(metadata_field).bind(limit as i64);

        match q.fetch_all(self.pool.inner()).await {
            Ok(rows) => Ok(rows.iter().map(Self::hit_from_row).collect()),
            Err(e) => {
                error!(error = %e, schema, metadata_field, "Aggregate lookup failed");
                Ok(Vec::new())
            }
        }
    }

    async fn keyword_scan(
        &self,
        schema: &str,
        table: Option<&str>,
        terms: &[String],
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let mut counter = 1;
        let table_sql = if table.is_some() {
            format!(" AND e.table_name = ${}", next(&mut counter))
        } else {
            String::new()
        };
        let term_sql: Vec<String> = terms
            .iter()
            .map(|_| format!("e.content ILIKE ${}", next(&mut counter)))
            .collect();
        let limit_idx = next(&mut counter);

        let sql = format!(
            r#"
            SELECT
                e.id, e.schema_name, e.table_name, e.content, e.metadata,
                0.0::float8 AS similarity
            FROM atabot.embeddings e
            WHERE e.schema_name = $1{table_sql}
              AND ({})
            ORDER BY length(e.content) ASC
            LIMIT ${limit_idx}
            "#,
            term_sql.join(" OR ")
        );

        let mut q = sqlx::query(&sql).bind(schema);
        if let Some(table) = table {
            q = q.bind(table);
        }
        for term in terms {
            q = q.bind(format!("%{}%", term));
        }
        q = q.bind(limit as i64);

        match q.fetch_all(self.pool.inner()).await {
            Ok(rows) => Ok(rows.iter().map(Self::hit_from_row).collect()),
            Err(e) => {
                error!(error = %e, schema, "Keyword scan failed");
                Ok(Vec::new())
            }
        }
    }

    async fn fetch_one_with_vector(&self, id: &str) -> Result<Option<StoredEmbedding>> {
        let row = sqlx::query(
            r#"
            SELECT id, schema_name, table_name, content, embedding, metadata
            FROM atabot.embeddings
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool.inner())
        .await?;

        Ok(row.map(|row| StoredEmbedding {
            id: row.get("id"),
            schema_name: row.get("schema_name"),
            table_name: row.get("table_name"),
            content: row.get("content"),
            vector: row
                .try_get::<Option<Vector>, _>("embedding")
                .ok()
                .flatten()
                .map(|v| v.to_vec())
                .unwrap_or_default(),
            metadata: row
                .try_get::<Option<Value>, _>("metadata")
                .ok()
                .flatten()
                .unwrap_or(Value::Null),
        }))
    }
}
