//! In-memory vector store for tests
//!
//! Implements the same semantics as the Postgres store with cosine similarity
//! and filter evaluation done in Rust.

use super::{
    cosine_similarity, filters_match, SearchHit, SortDirection, StoredEmbedding, VectorQuery,
    VectorStore,
};
use crate::errors::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;

/// Test double backed by a HashMap
#[derive(Default)]
pub struct InMemoryVectorStore {
    rows: Mutex<HashMap<String, StoredEmbedding>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn hit(e: &StoredEmbedding, similarity: f32) -> SearchHit {
        SearchHit {
            id: e.id.clone(),
            schema_name: e.schema_name.clone(),
            table_name: e.table_name.clone(),
            content: e.content.clone(),
            metadata: e.metadata.clone(),
            similarity,
        }
    }

    fn scope_matches(e: &StoredEmbedding, schema: &str, table: Option<&str>) -> bool {
        e.schema_name == schema && table.map_or(true, |t| e.table_name == t)
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(&self, embedding: &StoredEmbedding) -> Result<()> {
        self.rows
            .lock()
            .unwrap()
            .insert(embedding.id.clone(), embedding.clone());
        Ok(())
    }

    async fn upsert_many(&self, embeddings: &[StoredEmbedding]) -> Result<usize> {
        let mut rows = self.rows.lock().unwrap();
        for e in embeddings {
            rows.insert(e.id.clone(), e.clone());
        }
        Ok(embeddings.len())
    }

    async fn delete_by_id(&self, id: &str) -> Result<bool> {
        Ok(self.rows.lock().unwrap().remove(id).is_some())
    }

    async fn delete_by_schema_table(&self, schema: &str, table: Option<&str>) -> Result<u64> {
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|_, e| !Self::scope_matches(e, schema, table));
        Ok((before - rows.len()) as u64)
    }

    async fn search(&self, query: &VectorQuery) -> Result<Vec<SearchHit>> {
        let rows = self.rows.lock().unwrap();
        let mut hits: Vec<SearchHit> = rows
            .values()
            .filter(|e| Self::scope_matches(e, &query.schema, query.table.as_deref()))
            .filter(|e| filters_match(&e.metadata, &query.filters))
            .map(|e| Self::hit(e, cosine_similarity(&e.vector, &query.vector)))
            .filter(|h| h.similarity >= query.min_similarity)
            .collect();

        hits.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        hits.truncate(query.limit);
        Ok(hits)
    }

    async fn aggregate_lookup(
        &self,
        schema: &str,
        table: Option<&str>,
        metadata_field: &str,
        direction: SortDirection,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let rows = self.rows.lock().unwrap();
        let mut scored: Vec<(f64, SearchHit)> = rows
            .values()
            .filter(|e| Self::scope_matches(e, schema, table))
            .filter_map(|e| {
                let n = match e.metadata.get(metadata_field)? {
                    Value::Number(n) => n.as_f64()?,
                    Value::String(s) => s.parse().ok()?,
                    _ => return None,
                };
                Some((n, Self::hit(e, 0.0)))
            })
            .collect();

        match direction {
            SortDirection::Asc => scored.sort_by(|a, b| a.0.total_cmp(&b.0)),
            SortDirection::Desc => scored.sort_by(|a, b| b.0.total_cmp(&a.0)),
        }

        Ok(scored.into_iter().take(limit).map(|(_, h)| h).collect())
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
        let needles: Vec<String> = terms.iter().map(|t| t.to_lowercase()).collect();

        let rows = self.rows.lock().unwrap();
        let mut hits: Vec<SearchHit> = rows
            .values()
            .filter(|e| Self::scope_matches(e, schema, table))
            .filter(|e| {
                let content = e.content.to_lowercase();
                needles.iter().any(|t| content.contains(t))
            })
            .map(|e| Self::hit(e, 0.0))
            .collect();

        hits.sort_by_key(|h| h.content.len());
        hits.truncate(limit);
        Ok(hits)
    }

    async fn fetch_one_with_vector(&self, id: &str) -> Result<Option<StoredEmbedding>> {
        Ok(self.rows.lock().unwrap().get(id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MetadataFilters;
    use serde_json::json;

    fn row(id: &str, table: &str, content: &str, vector: Vec<f32>, metadata: Value) -> StoredEmbedding {
        StoredEmbedding {
            id: id.into(),
            schema_name: "retail".into(),
            table_name: table.into(),
            content: content.into(),
            vector,
            metadata,
        }
    }

    #[tokio::test]
    async fn test_upsert_replaces_by_id() {
        let store = InMemoryVectorStore::new();
        store
            .upsert(&row("a", "items", "one", vec![1.0, 0.0], json!({})))
            .await
            .unwrap();
        store
            .upsert(&row("a", "items", "two", vec![0.0, 1.0], json!({})))
            .await
            .unwrap();

        assert_eq!(store.len(), 1);
        let fetched = store.fetch_one_with_vector("a").await.unwrap().unwrap();
        assert_eq!(fetched.content, "two");
    }

    #[tokio::test]
    async fn test_search_orders_by_similarity_and_applies_floor() {
        let store = InMemoryVectorStore::new();
        store
            .upsert(&row("close", "items", "near", vec![1.0, 0.1], json!({})))
            .await
            .unwrap();
        store
            .upsert(&row("far", "items", "far", vec![-1.0, 0.0], json!({})))
            .await
            .unwrap();

        let hits = store
            .search(&VectorQuery {
                schema: "retail".into(),
                table: None,
                vector: vec![1.0, 0.0],
                min_similarity: 0.5,
                limit: 10,
                filters: MetadataFilters::new(),
            })
            .await
            .unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "close");
    }

    #[tokio::test]
    async fn test_aggregate_lookup_descending() {
        let store = InMemoryVectorStore::new();
        for (id, stock) in [("a", 5), ("b", 42), ("c", 17)] {
            store
                .upsert(&row(id, "items", id, vec![0.0, 1.0], json!({"im_stock": stock})))
                .await
                .unwrap();
        }

        let hits = store
            .aggregate_lookup("retail", None, "im_stock", SortDirection::Desc, 10)
            .await
            .unwrap();

        let stocks: Vec<i64> = hits
            .iter()
            .map(|h| h.metadata["im_stock"].as_i64().unwrap())
            .collect();
        assert_eq!(stocks, vec![42, 17, 5]);
    }

    #[tokio::test]
    async fn test_delete_by_schema_table() {
        let store = InMemoryVectorStore::new();
        store
            .upsert(&row("a", "items", "x", vec![1.0], json!({})))
            .await
            .unwrap();
        store
            .upsert(&row("b", "orders", "y", vec![1.0], json!({})))
            .await
            .unwrap();

        let deleted = store
            .delete_by_schema_table("retail", Some("items"))
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.len(), 1);
    }
}
