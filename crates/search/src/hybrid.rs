//! Hybrid search
//!
//! Three paths, cheapest first:
//! 1. Aggregation shortcut: superlative questions ("stok paling banyak",
//!    "harga tertinggi") sort by a numeric metadata field and never touch the
//!    embedding provider.
//! 2. Keyword fallback: short product-like queries run a case-insensitive
//!    content scan with prioritized scoring.
//! 3. Vector path: a query-type embedding, a filtered cosine search with
//!    slack for re-ranking, then a lexical content boost on top of the
//!    vector similarity.

use atabot_common::errors::Result;
use atabot_common::metrics;
use atabot_common::queue::EmbeddingQueue;
use atabot_common::store::{
    MetadataFilters, SearchHit, SortDirection, VectorQuery, VectorStore, DEFAULT_MIN_SIMILARITY,
};
use regex_lite::Regex;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Weight of vector similarity in the final score
const VECTOR_WEIGHT: f32 = 0.7;
/// Weight of the lexical content boost in the final score
const BOOST_WEIGHT: f32 = 0.3;
/// Bonus when the first two query terms appear in order in the content
const SEQUENCE_BONUS: f32 = 0.3;

/// Search options
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub table: Option<String>,
    pub top_k: usize,
    pub filters: MetadataFilters,
    pub min_similarity: f32,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            table: None,
            top_k: 10,
            filters: MetadataFilters::new(),
            min_similarity: DEFAULT_MIN_SIMILARITY,
        }
    }
}

/// Where a result came from
#[derive(Debug, Clone, Serialize)]
pub struct SourceRef {
    pub schema: String,
    pub table: String,
    pub id: String,
}

/// A ranked search result
#[derive(Debug, Clone, Serialize)]
pub struct RankedResult {
    pub id: String,
    pub content: String,
    pub metadata: serde_json::Value,
    pub similarity: f32,
    pub score: f32,
    pub source: SourceRef,
}

impl RankedResult {
    fn from_hit(hit: SearchHit, score: f32) -> Self {
        Self {
            source: SourceRef {
                schema: hit.schema_name.clone(),
                table: hit.table_name.clone(),
                id: hit.id.clone(),
            },
            id: hit.id,
            content: hit.content,
            metadata: hit.metadata,
            similarity: hit.similarity,
            score,
        }
    }
}

struct Superlative {
    field: &'static str,
    direction: SortDirection,
}

/// Hybrid vector + keyword search over the embedding store
pub struct HybridSearch {
    store: Arc<dyn VectorStore>,
    queue: Arc<EmbeddingQueue>,
    query_timeout: Duration,
    descending: Regex,
    ascending: Regex,
}

impl HybridSearch {
    pub fn new(
        store: Arc<dyn VectorStore>,
        queue: Arc<EmbeddingQueue>,
        query_timeout: Duration,
    ) -> Self {
        Self {
            store,
            queue,
            query_timeout,
            descending: Regex::new(
                r"(?i)\b(paling banyak|terbanyak|tertinggi|termahal|terbesar|highest|most|largest|biggest|maximum|max)\b",
            )
            .unwrap(),
            ascending: Regex::new(
                r"(?i)\b(paling sedikit|tersedikit|terendah|termurah|terkecil|lowest|least|fewest|cheapest|minimum|min)\b",
            )
            .unwrap(),
        }
    }

    /// Run a hybrid search
    pub async fn search(
        &self,
        query: &str,
        schema: &str,
        options: &SearchOptions,
    ) -> Result<Vec<RankedResult>> {
        let start = Instant::now();

        if let Some(superlative) = self.detect_superlative(query) {
            let results = self
                .aggregation_shortcut(schema, options, &superlative)
                .await?;
            metrics::record_search(start.elapsed().as_secs_f64(), "aggregate");
            return Ok(results);
        }

        if is_short_product_query(query) {
            let results = self.keyword_search(query, schema, options).await?;
            if !results.is_empty() {
                info!(query, results = results.len(), "Keyword fallback answered");
                metrics::record_search(start.elapsed().as_secs_f64(), "keyword");
                return Ok(results);
            }
        }

        let results = self.vector_search(query, schema, options).await?;
        metrics::record_search(start.elapsed().as_secs_f64(), "vector");
        Ok(results)
    }

    /// Keyword-only scan with prioritized scoring: exact phrase beats exact
    /// term beats partial match, ties broken by shortest content
    pub async fn keyword_search(
        &self,
        query: &str,
        schema: &str,
        options: &SearchOptions,
    ) -> Result<Vec<RankedResult>> {
        let terms = tokenize(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let hits = self
            .store
            .keyword_scan(schema, options.table.as_deref(), &terms, options.top_k * 5)
            .await?;

        let phrase = query.trim().to_lowercase();
        let mut scored: Vec<RankedResult> = hits
            .into_iter()
            .map(|hit| {
                let content = hit.content.to_lowercase();
                let score = if content.contains(&phrase) {
                    1.0
                } else if terms.iter().any(|t| contains_word(&content, t)) {
                    0.9
                } else {
                    0.8
                };
                RankedResult::from_hit(hit, score)
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.content.len().cmp(&b.content.len()))
        });
        scored.truncate(options.top_k);
        Ok(scored)
    }

    /// Superlative queries sort by the mapped metadata field and assign a
    /// descending score ladder; no embedding call happens
    async fn aggregation_shortcut(
        &self,
        schema: &str,
        options: &SearchOptions,
        superlative: &Superlative,
    ) -> Result<Vec<RankedResult>> {
        debug!(
            field = superlative.field,
            direction = ?superlative.direction,
            "Aggregation shortcut"
        );

        let hits = self
            .store
            .aggregate_lookup(
                schema,
                options.table.as_deref(),
                superlative.field,
                superlative.direction,
                options.top_k,
            )
            .await?;

        Ok(hits
            .into_iter()
            .enumerate()
            .map(|(i, hit)| {
                let score = (1.0 - 0.05 * i as f32).max(0.5);
                RankedResult::from_hit(hit, score)
            })
            .collect())
    }

    async fn vector_search(
        &self,
        query: &str,
        schema: &str,
        options: &SearchOptions,
    ) -> Result<Vec<RankedResult>> {
        let Some(vector) = self.queue.embed_query(query, self.query_timeout).await? else {
            // Query embedding unavailable: degrade to the keyword scan
            debug!(query, "Query embedding unavailable, using keyword scan");
            return self.keyword_search(query, schema, options).await;
        };

        // Fetch extra candidates so re-ranking has slack; the similarity
        // floor applies before re-ranking
        let hits = self
            .store
            .search(&VectorQuery {
                schema: schema.to_string(),
                table: options.table.clone(),
                vector,
                min_similarity: options.min_similarity,
                limit: options.top_k * 2,
                filters: options.filters.clone(),
            })
            .await?;

        let mut results: Vec<RankedResult> = hits
            .into_iter()
            .map(|hit| {
                let boost = content_boost(query, &hit.content);
                let score = VECTOR_WEIGHT * hit.similarity + BOOST_WEIGHT * boost;
                RankedResult::from_hit(hit, score)
            })
            .collect();

        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        results.truncate(options.top_k);
        Ok(results)
    }

    fn detect_superlative(&self, query: &str) -> Option<Superlative> {
        let direction = if self.descending.is_match(query) {
            SortDirection::Desc
        } else if self.ascending.is_match(query) {
            SortDirection::Asc
        } else {
            return None;
        };

        let field = superlative_field(query)?;
        Some(Superlative { field, direction })
    }
}

/// Map superlative vocabulary to the metadata field it sorts by
fn superlative_field(query: &str) -> Option<&'static str> {
    let q = query.to_lowercase();
    if q.contains("stok") || q.contains("stock") {
        return Some("im_stock");
    }
    if q.contains("harga")
        || q.contains("price")
        || q.contains("cost")
        || q.contains("termahal")
        || q.contains("termurah")
    {
        return Some("im_price");
    }
    None
}

/// Short product-like queries: at most three tokens, each 2-6 characters
/// after stripping product-context keywords
fn is_short_product_query(query: &str) -> bool {
    const CONTEXT: &[&str] = &[
        "stok", "stock", "produk", "product", "program", "barang", "item",
    ];

    let tokens = tokenize(query);
    let bare: Vec<&String> = tokens
        .iter()
        .filter(|t| !CONTEXT.contains(&t.to_lowercase().as_str()))
        .collect();

    !bare.is_empty()
        && bare.len() <= 3
        && bare.iter().all(|t| (2..=6).contains(&t.chars().count()))
}

/// Lexical boost: exact word hits count full, partial hits half, plus a
/// sequence bonus when the first two query terms appear in order
fn content_boost(query: &str, content: &str) -> f32 {
    let content_lower = content.to_lowercase();
    let terms: Vec<String> = tokenize(query)
        .into_iter()
        .filter(|t| t.chars().count() > 2)
        .map(|t| t.to_lowercase())
        .collect();

    if terms.is_empty() {
        return 0.0;
    }

    let mut weighted = 0.0f32;
    for term in &terms {
        if contains_word(&content_lower, term) {
            weighted += 1.0;
        } else if content_lower.contains(term.as_str()) {
            weighted += 0.5;
        }
    }
    let mut boost = weighted / terms.len() as f32;

    if terms.len() >= 2 {
        if let (Some(first), Some(second)) = (
            content_lower.find(terms[0].as_str()),
            content_lower.find(terms[1].as_str()),
        ) {
            if first < second {
                boost += SEQUENCE_BONUS;
            }
        }
    }

    boost.min(1.0)
}

fn tokenize(query: &str) -> Vec<String> {
    query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 1)
        .map(str::to_string)
        .collect()
}

fn contains_word(content: &str, term: &str) -> bool {
    content
        .split(|c: char| !c.is_alphanumeric())
        .any(|w| w.eq_ignore_ascii_case(term))
}

#[cfg(test)]
mod tests {
    use super::*;
    use atabot_common::cache::EmbeddingCache;
    use atabot_common::embeddings::{Embedder, InputType, RateLimiter};
    use atabot_common::errors::Result as CommonResult;
    use atabot_common::queue::QueueConfig;
    use atabot_common::store::{InMemoryVectorStore, StoredEmbedding};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const DIM: usize = 4;

    /// Returns a fixed unit vector and counts calls
    struct FixedEmbedder {
        vector: Vec<f32>,
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Embedder for FixedEmbedder {
        async fn embed(&self, texts: &[String], _t: InputType) -> CommonResult<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts.iter().map(|_| self.vector.clone()).collect())
        }

        fn model_name(&self) -> &str {
            "fixed"
        }

        fn dimension(&self) -> usize {
            DIM
        }
    }

    fn harness(
        query_vector: Vec<f32>,
    ) -> (HybridSearch, Arc<InMemoryVectorStore>, Arc<FixedEmbedder>) {
        let store = Arc::new(InMemoryVectorStore::new());
        let embedder = Arc::new(FixedEmbedder {
            vector: query_vector,
            calls: AtomicUsize::new(0),
        });
        let cache = Arc::new(EmbeddingCache::new(None, 1000));
        let limiter = Arc::new(RateLimiter::new(100, Duration::from_secs(60)));
        let queue = EmbeddingQueue::start(
            embedder.clone() as Arc<dyn Embedder>,
            cache,
            limiter,
            QueueConfig {
                max_batch_size: 120,
                pacing: Duration::from_secs(21),
                rate_limit_backoff: Duration::from_secs(60),
                dimension: DIM,
            },
        );
        let search = HybridSearch::new(
            store.clone() as Arc<dyn VectorStore>,
            queue,
            Duration::from_secs(600),
        );
        (search, store, embedder)
    }

    fn row(id: &str, content: &str, vector: Vec<f32>, metadata: serde_json::Value) -> StoredEmbedding {
        StoredEmbedding {
            id: id.into(),
            schema_name: "retail".into(),
            table_name: "items".into(),
            content: content.into(),
            vector,
            metadata,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_aggregation_shortcut_orders_and_scores() {
        let (search, store, embedder) = harness(vec![1.0, 0.0, 0.0, 0.0]);
        for (id, stock) in [("a", 5), ("b", 42), ("c", 17)] {
            store
                .upsert(&row(id, id, vec![0.0, 1.0, 0.0, 0.0], json!({"im_stock": stock})))
                .await
                .unwrap();
        }

        let results = search
            .search("stok paling banyak", "retail", &SearchOptions::default())
            .await
            .unwrap();

        let stocks: Vec<i64> = results
            .iter()
            .map(|r| r.metadata["im_stock"].as_i64().unwrap())
            .collect();
        assert_eq!(stocks, vec![42, 17, 5]);
        let scores: Vec<f32> = results.iter().map(|r| r.score).collect();
        assert_eq!(scores, vec![1.0, 0.95, 0.90]);
        // No embedding provider call
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lowest_price_sorts_ascending() {
        let (search, store, _embedder) = harness(vec![1.0, 0.0, 0.0, 0.0]);
        for (id, price) in [("a", 90), ("b", 10), ("c", 50)] {
            store
                .upsert(&row(id, id, vec![0.0, 1.0, 0.0, 0.0], json!({"im_price": price})))
                .await
                .unwrap();
        }

        let results = search
            .search("harga termurah", "retail", &SearchOptions::default())
            .await
            .unwrap();

        let prices: Vec<i64> = results
            .iter()
            .map(|r| r.metadata["im_price"].as_i64().unwrap())
            .collect();
        assert_eq!(prices, vec![10, 50, 90]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keyword_fallback_for_short_product_query() {
        let (search, store, embedder) = harness(vec![1.0, 0.0, 0.0, 0.0]);
        store
            .upsert(&row(
                "p1",
                "ALO LEGGING BLACK",
                vec![0.0, 1.0, 0.0, 0.0],
                json!({}),
            ))
            .await
            .unwrap();

        let results = search
            .search("ALO", "retail", &SearchOptions::default())
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "p1");
        assert!(results[0].score >= 0.8);
        assert_eq!(results[0].source.table, "items");
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keyword_scoring_prefers_exact_phrase_then_shorter() {
        let (search, store, _embedder) = harness(vec![1.0, 0.0, 0.0, 0.0]);
        store
            .upsert(&row("long", "ALO LEGGING BLACK EXTENDED EDITION", vec![0.0; 4], json!({})))
            .await
            .unwrap();
        store
            .upsert(&row("short", "ALO LEGGING", vec![0.0; 4], json!({})))
            .await
            .unwrap();

        let results = search
            .keyword_search("ALO", "retail", &SearchOptions::default())
            .await
            .unwrap();

        assert_eq!(results[0].id, "short");
        assert_eq!(results[1].id, "long");
    }

    #[tokio::test(start_paused = true)]
    async fn test_vector_path_applies_content_boost() {
        let (search, store, embedder) = harness(vec![1.0, 0.0, 0.0, 0.0]);
        // Both rows equally similar to the query vector; boost decides
        store
            .upsert(&row(
                "boosted",
                "monthly sales report for region west",
                vec![1.0, 0.2, 0.0, 0.0],
                json!({}),
            ))
            .await
            .unwrap();
        store
            .upsert(&row(
                "plain",
                "unrelated inventory narrative",
                vec![1.0, 0.2, 0.0, 0.0],
                json!({}),
            ))
            .await
            .unwrap();

        let results = search
            .search(
                "monthly sales report numbers",
                "retail",
                &SearchOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(results[0].id, "boosted");
        assert!(results[0].score > results[1].score);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_min_similarity_drops_before_rerank() {
        let (search, store, _embedder) = harness(vec![1.0, 0.0, 0.0, 0.0]);
        // Orthogonal vector: similarity 0, below the floor, even though the
        // content matches the query terms exactly
        store
            .upsert(&row(
                "lexical-only",
                "monthly sales report numbers",
                vec![0.0, 1.0, 0.0, 0.0],
                json!({}),
            ))
            .await
            .unwrap();

        let results = search
            .search(
                "monthly sales report numbers",
                "retail",
                &SearchOptions::default(),
            )
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_content_boost_sequence_bonus() {
        let with_order = content_boost("monthly sales", "monthly sales figures");
        let reversed = content_boost("monthly sales", "sales figures monthly");
        assert!(with_order > reversed);
    }

    #[test]
    fn test_content_boost_partial_is_half() {
        // "legging" appears only inside "leggings" -> partial hit
        let partial = content_boost("legging", "black leggings bundle");
        let exact = content_boost("legging", "black legging bundle");
        assert!(exact > partial);
        assert!(partial > 0.0);
    }

    #[test]
    fn test_short_product_query_detection() {
        assert!(is_short_product_query("ALO"));
        assert!(is_short_product_query("stok ALO"));
        assert!(is_short_product_query("BC01 DR12"));
        assert!(!is_short_product_query(
            "what were the total sales for the west region last month"
        ));
        assert!(!is_short_product_query("stok"));
    }
}
