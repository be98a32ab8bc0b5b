//! Two-tier embedding cache
//!
//! Provides:
//! - An in-memory tier with FIFO eviction at a configured ceiling
//! - A persistent tier in `atabot.embedding_cache` with access-count-weighted
//!   retention
//! - A periodic flush task that promotes in-memory entries to the persistent
//!   tier, plus a flush on clean shutdown
//! - Startup preload of the most recently-and-frequently accessed rows
//!
//! The in-memory tier is always on (the embedding queue dedupes through it);
//! `cache.enabled = false` only disables the persistent tier.

use crate::db::DbPool;
use crate::embeddings::InputType;
use crate::errors::Result;
use crate::metrics;
use sqlx::Row;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Cache key: md5 of the text and its input type
pub fn text_hash(text: &str, input_type: InputType) -> String {
    format!("{:x}", md5::compute(format!("{}:{}", text, input_type)))
}

struct MemoryTier {
    map: HashMap<String, Vec<f32>>,
    /// Insertion order for FIFO eviction; reads do not touch it
    order: VecDeque<String>,
    /// Entries not yet promoted to the persistent tier
    dirty: HashSet<String>,
}

/// Two-tier map from text hash to embedding vector
pub struct EmbeddingCache {
    state: Mutex<MemoryTier>,
    pool: Option<DbPool>,
    max_entries: usize,
}

impl EmbeddingCache {
    /// Create a cache; pass `None` for a memory-only cache (tests, or when
    /// the persistent tier is disabled)
    pub fn new(pool: Option<DbPool>, max_entries: usize) -> Self {
        Self {
            state: Mutex::new(MemoryTier {
                map: HashMap::new(),
                order: VecDeque::new(),
                dirty: HashSet::new(),
            }),
            pool,
            max_entries: max_entries.max(1),
        }
    }

    /// Look up a vector; falls through to the persistent tier on a memory
    /// miss and promotes the row back into memory
    pub async fn get(&self, hash: &str) -> Option<Vec<f32>> {
        if let Some(v) = self.state.lock().unwrap().map.get(hash).cloned() {
            metrics::record_cache(true, "embedding_memory");
            return Some(v);
        }

        let pool = self.pool.as_ref()?;
        let row = sqlx::query(
            r#"
            UPDATE atabot.embedding_cache
            SET last_accessed = NOW(), access_count = access_count + 1
            WHERE text_hash = $1
            RETURNING embedding
            "#,
        )
        .bind(hash)
        .fetch_optional(pool.inner())
        .await
        .map_err(|e| {
            warn!(error = %e, "Persistent cache lookup failed");
            e
        })
        .ok()??;

        let vector: Vec<f32> = row
            .try_get::<Option<Vec<f64>>, _>("embedding")
            .ok()
            .flatten()?
            .into_iter()
            .map(|v| v as f32)
            .collect();

        if vector.is_empty() {
            return None;
        }

        metrics::record_cache(true, "embedding_persistent");
        self.promote(hash, vector.clone());
        Some(vector)
    }

    /// Insert a freshly generated vector into the memory tier, evicting FIFO
    /// when the ceiling is reached. Dirty entries displaced by eviction are
    /// written through to the persistent tier so they survive until flush.
    pub async fn insert(&self, hash: String, vector: Vec<f32>) {
        let displaced = {
            let mut state = self.state.lock().unwrap();
            let mut displaced = Vec::new();

            if !state.map.contains_key(&hash) {
                while state.map.len() >= self.max_entries {
                    let Some(evicted) = state.order.pop_front() else { break };
                    if let Some(v) = state.map.remove(&evicted) {
                        if state.dirty.remove(&evicted) {
                            displaced.push((evicted, v));
                        }
                    }
                }
                state.order.push_back(hash.clone());
            }

            state.dirty.insert(hash.clone());
            state.map.insert(hash, vector);
            displaced
        };

        if !displaced.is_empty() {
            if let Err(e) = self.persist(&displaced).await {
                error!(error = %e, count = displaced.len(), "Failed to persist evicted cache entries");
            }
        }
    }

    /// Promote a persistent-tier hit into memory without marking it dirty
    fn promote(&self, hash: &str, vector: Vec<f32>) {
        let mut state = self.state.lock().unwrap();
        if state.map.contains_key(hash) {
            return;
        }
        while state.map.len() >= self.max_entries {
            let Some(evicted) = state.order.pop_front() else { break };
            state.map.remove(&evicted);
            state.dirty.remove(&evicted);
        }
        state.order.push_back(hash.to_string());
        state.map.insert(hash.to_string(), vector);
    }

    /// Number of entries in the memory tier
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flush dirty entries to the persistent tier; returns how many were written
    pub async fn flush(&self) -> Result<usize> {
        if self.pool.is_none() {
            return Ok(0);
        }

        let dirty: Vec<(String, Vec<f32>)> = {
            let state = self.state.lock().unwrap();
            state
                .dirty
                .iter()
                .filter_map(|h| state.map.get(h).map(|v| (h.clone(), v.clone())))
                .collect()
        };

        if dirty.is_empty() {
            return Ok(0);
        }

        self.persist(&dirty).await?;

        let mut state = self.state.lock().unwrap();
        for (hash, _) in &dirty {
            state.dirty.remove(hash);
        }

        debug!(count = dirty.len(), "Flushed embedding cache to persistent tier");
        Ok(dirty.len())
    }

    async fn persist(&self, entries: &[(String, Vec<f32>)]) -> Result<()> {
        let Some(pool) = self.pool.as_ref() else {
            return Ok(());
        };

        let mut tx = pool.inner().begin().await?;
        for (hash, vector) in entries {
            let wide: Vec<f64> = vector.iter().map(|v| *v as f64).collect();
            sqlx::query(
                r#"
                INSERT INTO atabot.embedding_cache (text_hash, embedding)
                VALUES ($1, $2)
                ON CONFLICT (text_hash) DO UPDATE
                SET last_accessed = NOW(),
                    access_count = embedding_cache.access_count + 1
                "#,
            )
            .bind(hash)
            .bind(wide)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Preload the most recently-and-frequently accessed rows into memory
    pub async fn preload(&self, limit: usize) -> Result<usize> {
        let Some(pool) = self.pool.as_ref() else {
            return Ok(0);
        };

        let rows = sqlx::query(
            r#"
            SELECT text_hash, embedding
            FROM atabot.embedding_cache
            WHERE last_accessed > NOW() - INTERVAL '7 days'
            ORDER BY access_count DESC, last_accessed DESC
            LIMIT $1
            "#,
        )
        .bind(limit.min(self.max_entries) as i64)
        .fetch_all(pool.inner())
        .await?;

        let mut loaded = 0;
        for row in rows {
            let hash: String = row.get("text_hash");
            if let Ok(Some(embedding)) = row.try_get::<Option<Vec<f64>>, _>("embedding") {
                if !embedding.is_empty() {
                    self.promote(&hash, embedding.into_iter().map(|v| v as f32).collect());
                    loaded += 1;
                }
            }
        }

        info!(loaded, "Preloaded embeddings from persistent cache");
        Ok(loaded)
    }

    /// Delete stale persistent rows: older than `days` with access_count < 5
    pub async fn cleanup(&self, days: i64) -> Result<u64> {
        let Some(pool) = self.pool.as_ref() else {
            return Ok(0);
        };

        let result = sqlx::query(
            r#"
            DELETE FROM atabot.embedding_cache
            WHERE last_accessed < NOW() - make_interval(days => $1)
              AND access_count < 5
            "#,
        )
        .bind(days as i32)
        .execute(pool.inner())
        .await?;

        info!(deleted = result.rows_affected(), "Cleaned up old cache entries");
        Ok(result.rows_affected())
    }

    /// Clear the in-memory tier
    pub fn clear_memory(&self) {
        let mut state = self.state.lock().unwrap();
        state.map.clear();
        state.order.clear();
        state.dirty.clear();
    }

    /// Spawn the periodic flush task
    pub fn spawn_flush_task(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // first tick fires immediately
            loop {
                ticker.tick().await;
                if let Err(e) = cache.flush().await {
                    error!(error = %e, "Periodic cache flush failed");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_hash_depends_on_input_type() {
        let a = text_hash("alpha", InputType::Document);
        let b = text_hash("alpha", InputType::Query);
        assert_ne!(a, b);
        assert_eq!(a, text_hash("alpha", InputType::Document));
        assert_eq!(a.len(), 32);
    }

    #[tokio::test]
    async fn test_memory_get_and_insert() {
        let cache = EmbeddingCache::new(None, 10);
        let hash = text_hash("alpha", InputType::Document);

        assert!(cache.get(&hash).await.is_none());
        cache.insert(hash.clone(), vec![0.1, 0.2]).await;
        assert_eq!(cache.get(&hash).await.unwrap(), vec![0.1, 0.2]);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_fifo_eviction_at_ceiling() {
        let cache = EmbeddingCache::new(None, 3);
        for i in 0..4 {
            cache.insert(format!("h{}", i), vec![i as f32]).await;
        }

        assert_eq!(cache.len(), 3);
        // Oldest insertion evicted first
        assert!(cache.get("h0").await.is_none());
        assert!(cache.get("h3").await.is_some());
    }

    #[tokio::test]
    async fn test_reads_do_not_change_eviction_order() {
        let cache = EmbeddingCache::new(None, 2);
        cache.insert("a".into(), vec![1.0]).await;
        cache.insert("b".into(), vec![2.0]).await;

        // Reading "a" must not protect it: FIFO, not LRU
        assert!(cache.get("a").await.is_some());
        cache.insert("c".into(), vec![3.0]).await;

        assert!(cache.get("a").await.is_none());
        assert!(cache.get("b").await.is_some());
        assert!(cache.get("c").await.is_some());
    }

    #[tokio::test]
    async fn test_reinsert_does_not_duplicate_order_entry() {
        let cache = EmbeddingCache::new(None, 2);
        cache.insert("a".into(), vec![1.0]).await;
        cache.insert("a".into(), vec![1.5]).await;
        cache.insert("b".into(), vec![2.0]).await;

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a").await.unwrap(), vec![1.5]);
    }

    #[tokio::test]
    async fn test_flush_without_pool_is_noop() {
        let cache = EmbeddingCache::new(None, 10);
        cache.insert("a".into(), vec![1.0]).await;
        assert_eq!(cache.flush().await.unwrap(), 0);
    }
}
