//! Application context
//!
//! Owned handles to every component, constructed in dependency order (store,
//! cache, rate limiter, queue, sync pipeline, search, orchestrator) and torn
//! down in reverse.

use atabot_chat::ChatOrchestrator;
use atabot_common::cache::EmbeddingCache;
use atabot_common::config::AppConfig;
use atabot_common::db::DbPool;
use atabot_common::embeddings::{create_embedder, RateLimiter};
use atabot_common::errors::Result;
use atabot_common::llm::{LlmProvider, MockLlm, OpenAiCompatClient};
use atabot_common::queue::{EmbeddingQueue, QueueConfig};
use atabot_common::registry::SchemaRegistry;
use atabot_common::store::{PgVectorStore, VectorStore};
use atabot_search::HybridSearch;
use atabot_sync::SyncService;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: DbPool,
    pub registry: SchemaRegistry,
    pub cache: Arc<EmbeddingCache>,
    pub queue: Arc<EmbeddingQueue>,
    pub sync: Arc<SyncService>,
    pub orchestrator: Arc<ChatOrchestrator>,
    pub metrics_handle: PrometheusHandle,
    flush_task: Arc<std::sync::Mutex<Option<JoinHandle<()>>>>,
}

impl AppState {
    /// Construct all components in dependency order
    pub async fn build(
        config: Arc<AppConfig>,
        db: DbPool,
        metrics_handle: PrometheusHandle,
    ) -> Result<Self> {
        // C1: vector store
        let store: Arc<dyn VectorStore> = Arc::new(PgVectorStore::new(db.clone()));

        // C2: two-tier embedding cache
        let cache_pool = config.cache.enabled.then(|| db.clone());
        if cache_pool.is_none() {
            warn!("Persistent embedding cache disabled; memory tier only");
        }
        let cache = Arc::new(EmbeddingCache::new(cache_pool, config.cache.max_entries));
        if config.cache.enabled {
            let preloaded = cache.preload(config.cache.preload_limit).await.unwrap_or(0);
            info!(preloaded, "Embedding cache warm");
        }
        let flush_task = cache.spawn_flush_task(Duration::from_secs(config.cache.flush_interval_secs));

        // C3: provider rate limiter
        let limiter = Arc::new(RateLimiter::new(
            config.embedding.rate_limit_max_requests,
            Duration::from_secs(config.embedding.rate_limit_window_secs),
        ));

        // C4: embedding queue and its single worker
        let embedder = create_embedder(&config.embedding)?;
        let queue = EmbeddingQueue::start(
            embedder,
            Arc::clone(&cache),
            limiter,
            QueueConfig {
                max_batch_size: config.embedding.max_batch_size,
                pacing: Duration::from_secs(config.embedding.pacing_secs),
                rate_limit_backoff: Duration::from_secs(60),
                dimension: config.embedding.dimension,
            },
        );

        let registry = SchemaRegistry::new(db.clone());

        // C5: sync pipeline
        let sync = Arc::new(SyncService::new(
            db.clone(),
            Arc::clone(&store),
            Arc::clone(&queue),
            registry.clone(),
            config.sync.batch_size,
            Duration::from_secs(config.sync.wait_timeout_secs),
            config.embedding.dimension,
        ));

        // C6/C7: routing and hybrid search
        let hybrid = Arc::new(HybridSearch::new(
            Arc::clone(&store),
            Arc::clone(&queue),
            Duration::from_secs(config.embedding.timeout_secs),
        ));

        // C8: chat orchestrator
        let llm: Arc<dyn LlmProvider> = match &config.llm.api_key {
            Some(key) => Arc::new(OpenAiCompatClient::new(
                key.clone(),
                config.llm.model.clone(),
                config.llm.base_url.clone(),
                config.llm.timeout_secs,
            )),
            None => {
                warn!("No LLM API key configured; using mock provider");
                Arc::new(MockLlm::new(Vec::new()))
            }
        };
        let orchestrator = Arc::new(ChatOrchestrator::new(
            db.clone(),
            registry.clone(),
            hybrid,
            llm,
            config.features.query_decomposition,
            config.features.hybrid_search,
        ));

        Ok(Self {
            config,
            db,
            registry,
            cache,
            queue,
            sync,
            orchestrator,
            metrics_handle,
            flush_task: Arc::new(std::sync::Mutex::new(Some(flush_task))),
        })
    }

    /// Reverse-order teardown: stop the queue worker, flush the cache, close
    /// the pool
    pub async fn shutdown(&self) {
        self.queue.shutdown();

        if let Some(task) = self.flush_task.lock().unwrap().take() {
            task.abort();
        }
        match self.cache.flush().await {
            Ok(flushed) => info!(flushed, "Final cache flush complete"),
            Err(e) => warn!(error = %e, "Final cache flush failed"),
        }

        self.db.close().await;
    }
}
