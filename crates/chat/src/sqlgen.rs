//! LLM-SQL branch
//!
//! When no deterministic template fits, the LLM generates a SELECT against a
//! compact schema summary. Generated SQL is validated before execution:
//! mutating statements are rejected outright and a LIMIT is enforced.

use atabot_common::db::{row_to_json, DbPool};
use atabot_common::errors::{AppError, Result};
use atabot_common::llm::{ChatMessage, LlmProvider};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::info;

/// Statement keywords that must never appear in generated SQL
const FORBIDDEN: &[&str] = &[
    "DROP", "DELETE", "TRUNCATE", "ALTER", "CREATE", "INSERT", "UPDATE",
];

/// Default row cap appended when the model forgets one
const DEFAULT_LIMIT: usize = 100;

/// Validate generated SQL: SELECT-only, no mutating keywords, bounded rows
pub fn validate_sql(sql: &str) -> Result<String> {
    let cleaned = strip_markdown(sql);
    let upper = cleaned.to_uppercase();

    if !(upper.trim_start().starts_with("SELECT") || upper.trim_start().starts_with("WITH")) {
        return Err(AppError::DangerousSql {
            keyword: cleaned.split_whitespace().next().unwrap_or("").to_string(),
        });
    }

    for keyword in FORBIDDEN {
        if upper
            .split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
            .any(|w| w == *keyword)
        {
            return Err(AppError::DangerousSql {
                keyword: (*keyword).to_string(),
            });
        }
    }

    let mut validated = cleaned.trim().trim_end_matches(';').to_string();
    if !upper.contains("LIMIT") {
        validated = format!("{} LIMIT {}", validated, DEFAULT_LIMIT);
    }

    Ok(validated)
}

/// Remove markdown code fences the model sometimes wraps SQL in
fn strip_markdown(sql: &str) -> String {
    let trimmed = sql.trim();
    if let Some(rest) = trimmed.strip_prefix("```") {
        let rest = rest.strip_prefix("sql").unwrap_or(rest);
        let rest = rest.strip_suffix("```").unwrap_or(rest);
        return rest.trim().to_string();
    }
    trimmed.to_string()
}

/// Generates and executes SQL for complex questions
pub struct SqlGenerator {
    llm: Arc<dyn LlmProvider>,
    pool: DbPool,
}

impl SqlGenerator {
    pub fn new(llm: Arc<dyn LlmProvider>, pool: DbPool) -> Self {
        Self { llm, pool }
    }

    /// Compact schema summary for the LLM prompt: tables with up to ten
    /// columns each
    pub async fn schema_summary(&self, schema: &str) -> Result<String> {
        let tables = self.pool.get_tables(schema).await?;
        let mut lines = vec![format!("Schema: {}", schema)];

        for table in &tables {
            let columns = self
                .pool
                .get_table_columns(schema, &table.table_name)
                .await?;
            let cols: Vec<String> = columns
                .iter()
                .take(10)
                .map(|c| format!("{} ({})", c.column_name, c.data_type))
                .collect();
            lines.push(format!("Table {}: {}", table.table_name, cols.join(", ")));
        }

        Ok(lines.join("\n"))
    }

    /// Ask the LLM for SQL and validate it
    pub async fn generate(&self, query: &str, schema: &str, summary: &str) -> Result<String> {
        let messages = vec![
            ChatMessage::system(
                "You are an expert PostgreSQL query generator. Generate a single \
                 SELECT statement for the request, fully qualifying tables as \
                 \"schema\".\"table\". Return ONLY the SQL without explanation or \
                 markdown.",
            ),
            ChatMessage::user(format!(
                "{}\n\nGenerate SQL for: {}\nUse schema \"{}\".",
                summary, query, schema
            )),
        ];

        let sql = self.llm.chat(&messages, 500, 0.1).await?;
        let validated = validate_sql(&sql)?;
        info!(sql = %validated, "Generated SQL");
        Ok(validated)
    }

    /// Execute validated SQL, decoding rows dynamically
    pub async fn execute(&self, sql: &str) -> Result<Vec<Map<String, Value>>> {
        let rows = sqlx::query(sql)
            .fetch_all(self.pool.inner())
            .await
            .map_err(|e| AppError::SqlExecution {
                message: e.to_string(),
            })?;

        Ok(rows.iter().map(row_to_json).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_mutating_statements() {
        for sql in [
            "DROP TABLE users",
            "DELETE FROM orders",
            "INSERT INTO t VALUES (1)",
            "UPDATE t SET x = 1",
            "TRUNCATE t",
        ] {
            assert!(validate_sql(sql).is_err(), "should reject: {}", sql);
        }
    }

    #[test]
    fn test_rejects_embedded_mutation() {
        let err = validate_sql("SELECT 1; DROP TABLE users").unwrap_err();
        match err {
            AppError::DangerousSql { keyword } => assert_eq!(keyword, "DROP"),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_allows_select_and_appends_limit() {
        let sql = validate_sql("SELECT * FROM \"public\".\"orders\"").unwrap();
        assert_eq!(sql, "SELECT * FROM \"public\".\"orders\" LIMIT 100");
    }

    #[test]
    fn test_keeps_existing_limit() {
        let sql = validate_sql("SELECT * FROM t LIMIT 5").unwrap();
        assert_eq!(sql, "SELECT * FROM t LIMIT 5");
    }

    #[test]
    fn test_strips_markdown_fences() {
        let sql = validate_sql("```sql\nSELECT id FROM t\n```").unwrap();
        assert_eq!(sql, "SELECT id FROM t LIMIT 100");
    }

    #[test]
    fn test_does_not_flag_keyword_substrings() {
        // "created_at" contains no standalone CREATE token
        let sql = validate_sql("SELECT created_at, updated_at FROM t").unwrap();
        assert!(sql.starts_with("SELECT created_at"));
    }

    #[test]
    fn test_with_cte_is_allowed() {
        let sql = validate_sql("WITH x AS (SELECT 1 AS a) SELECT a FROM x").unwrap();
        assert!(sql.starts_with("WITH"));
    }
}
