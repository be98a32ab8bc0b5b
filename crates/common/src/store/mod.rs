//! Vector store over `atabot.embeddings`
//!
//! Rows are keyed by `(schema, table, row id)` and carry the rendered
//! searchable text, a dense vector and the sanitized row metadata. Nearest
//! neighbour queries use pgvector cosine distance; aggregation lookups order
//! by a numeric metadata field without touching the vector at all.

mod memory;
mod pg;

pub use memory::InMemoryVectorStore;
pub use pg::PgVectorStore;

use crate::errors::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Default similarity floor for vector search
pub const DEFAULT_MIN_SIMILARITY: f32 = 0.5;

/// The durable unit: one embedded row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEmbedding {
    pub id: String,
    pub schema_name: String,
    pub table_name: String,
    pub content: String,
    pub vector: Vec<f32>,
    pub metadata: Value,
}

/// A search result with its cosine similarity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub schema_name: String,
    pub table_name: String,
    pub content: String,
    pub metadata: Value,
    pub similarity: f32,
}

/// Per-field metadata filter; set members combine with AND
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldFilter {
    /// Equality on a string or number
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eq: Option<Value>,
    /// Numeric lower bound (inclusive)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gte: Option<f64>,
    /// Numeric upper bound (inclusive)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lte: Option<f64>,
    /// Case-insensitive substring match
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contains: Option<String>,
    /// Field must be present
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub exists: bool,
}

/// Filters keyed by metadata field; entries combine with AND
pub type MetadataFilters = BTreeMap<String, FieldFilter>;

/// Parameters for a vector similarity query
#[derive(Debug, Clone)]
pub struct VectorQuery {
    pub schema: String,
    pub table: Option<String>,
    pub vector: Vec<f32>,
    pub min_similarity: f32,
    pub limit: usize,
    pub filters: MetadataFilters,
}

/// Sort direction for aggregation lookups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

/// Storage capability set for embedded rows
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace one row (idempotent by id); replaces text, vector
    /// and metadata atomically and advances `updated_at`
    async fn upsert(&self, embedding: &StoredEmbedding) -> Result<()>;

    /// Batched upsert with the same semantics; returns the number stored
    async fn upsert_many(&self, embeddings: &[StoredEmbedding]) -> Result<usize>;

    /// Delete one row by id
    async fn delete_by_id(&self, id: &str) -> Result<bool>;

    /// Delete all rows for a schema, or a single table within it
    async fn delete_by_schema_table(&self, schema: &str, table: Option<&str>) -> Result<u64>;

    /// Cosine nearest-neighbour search over a filtered subset, ordered by
    /// similarity descending. Fails closed: storage errors log and return
    /// an empty list.
    async fn search(&self, query: &VectorQuery) -> Result<Vec<SearchHit>>;

    /// Rows ordered by a numeric metadata field, never touching the vector
    async fn aggregate_lookup(
        &self,
        schema: &str,
        table: Option<&str>,
        metadata_field: &str,
        direction: SortDirection,
        limit: usize,
    ) -> Result<Vec<SearchHit>>;

    /// Case-insensitive content scan for any of the given terms, shortest
    /// content first. Scoring happens in the caller.
    async fn keyword_scan(
        &self,
        schema: &str,
        table: Option<&str>,
        terms: &[String],
        limit: usize,
    ) -> Result<Vec<SearchHit>>;

    /// Fetch one row including its vector
    async fn fetch_one_with_vector(&self, id: &str) -> Result<Option<StoredEmbedding>>;
}

/// Evaluate a filter set against a metadata object (in-memory semantics,
/// mirrored by the SQL fragments in the Postgres implementation)
pub fn filters_match(metadata: &Value, filters: &MetadataFilters) -> bool {
    filters.iter().all(|(key, filter)| {
        let field = metadata.get(key);

        if filter.exists && field.is_none() {
            return false;
        }

        if let Some(eq) = &filter.eq {
            match field {
                Some(v) if values_equal(v, eq) => {}
                _ => return false,
            }
        }

        if let Some(gte) = filter.gte {
            match field.and_then(as_number) {
                Some(n) if n >= gte => {}
                _ => return false,
            }
        }

        if let Some(lte) = filter.lte {
            match field.and_then(as_number) {
                Some(n) if n <= lte => {}
                _ => return false,
            }
        }

        if let Some(sub) = &filter.contains {
            match field {
                Some(Value::String(s)) if s.to_lowercase().contains(&sub.to_lowercase()) => {}
                _ => return false,
            }
        }

        true
    })
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (as_number(a), as_number(b)) {
        (Some(x), Some(y)) => (x - y).abs() < f64::EPSILON,
        _ => a == b,
    }
}

fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Cosine similarity between two vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        let c = vec![0.0, 1.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&a, &c).abs() < 1e-6);
        assert_eq!(cosine_similarity(&a, &[]), 0.0);
    }

    #[test]
    fn test_filters_eq_and_range() {
        let meta = json!({"im_stock": 42, "brand": "ALO"});

        let mut filters = MetadataFilters::new();
        filters.insert(
            "im_stock".into(),
            FieldFilter { gte: Some(40.0), lte: Some(50.0), ..Default::default() },
        );
        filters.insert(
            "brand".into(),
            FieldFilter { eq: Some(json!("ALO")), ..Default::default() },
        );
        assert!(filters_match(&meta, &filters));

        filters.insert(
            "im_stock".into(),
            FieldFilter { gte: Some(100.0), ..Default::default() },
        );
        assert!(!filters_match(&meta, &filters));
    }

    #[test]
    fn test_filters_contains_and_exists() {
        let meta = json!({"name": "ALO LEGGING BLACK"});

        let mut filters = MetadataFilters::new();
        filters.insert(
            "name".into(),
            FieldFilter { contains: Some("legging".into()), ..Default::default() },
        );
        assert!(filters_match(&meta, &filters));

        let mut filters = MetadataFilters::new();
        filters.insert("missing".into(), FieldFilter { exists: true, ..Default::default() });
        assert!(!filters_match(&meta, &filters));
    }

    #[test]
    fn test_numeric_equality_across_representations() {
        let meta = json!({"qty": "5"});
        let mut filters = MetadataFilters::new();
        filters.insert("qty".into(), FieldFilter { eq: Some(json!(5)), ..Default::default() });
        assert!(filters_match(&meta, &filters));
    }
}
