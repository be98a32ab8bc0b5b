//! Embedding queue
//!
//! Decouples text submission from provider calls. Submissions are deduplicated
//! against the embedding cache, coalesced into provider-sized super-batches by
//! a single worker task, validated, and written back to the cache. Batch
//! status is tracked per submission with monotonic state transitions.
//!
//! The worker is the only caller of the embedding provider in the process:
//! submitters interact with it via a submit channel and a per-batch watch
//! signal. Rate-limit errors back off and requeue the super-batch without
//! failing any batch; other provider errors fail the owning batches and
//! processing continues.

use crate::cache::{text_hash, EmbeddingCache};
use crate::embeddings::{is_valid_embedding, Embedder, InputType, RateLimiter};
use crate::errors::{AppError, Result};
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Batch lifecycle; transitions are monotonic and terminal states are final
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchState {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl BatchState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchState::Completed | BatchState::Failed)
    }
}

/// Per-batch accounting exposed to callers
#[derive(Debug, Clone, Serialize)]
pub struct BatchStatus {
    pub state: BatchState,
    pub total: usize,
    pub cached: usize,
    pub to_process: usize,
}

/// Queue-level statistics
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub queued_texts: usize,
    pub pending_batches: usize,
    pub processing_batches: usize,
    pub completed_batches: usize,
    pub failed_batches: usize,
    pub cache_entries: usize,
    pub processing: bool,
}

/// Worker tuning knobs
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Texts per provider request (super-batch ceiling)
    pub max_batch_size: usize,
    /// Pause between super-batches and between individual retries
    pub pacing: Duration,
    /// Back-off after a provider rate-limit error
    pub rate_limit_backoff: Duration,
    /// Expected vector dimensionality
    pub dimension: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 120,
            pacing: Duration::from_secs(21),
            rate_limit_backoff: Duration::from_secs(60),
            dimension: crate::DEFAULT_EMBEDDING_DIMENSION,
        }
    }
}

#[derive(Debug, Clone)]
struct QueueItem {
    batch_id: String,
    hash: String,
    text: String,
    input_type: InputType,
}

struct BatchEntry {
    status: BatchStatus,
    manifest: Vec<String>,
    signal: watch::Sender<BatchState>,
}

struct Shared {
    batches: Mutex<HashMap<String, BatchEntry>>,
    /// Hashes enqueued but not yet resolved; later submissions of the same
    /// text do not enqueue a second provider call
    pending: Mutex<HashSet<String>>,
    processing: AtomicBool,
    seq: AtomicU64,
}

/// Handle to the embedding queue; cheap to clone via Arc
pub struct EmbeddingQueue {
    tx: mpsc::UnboundedSender<Vec<QueueItem>>,
    shared: Arc<Shared>,
    cache: Arc<EmbeddingCache>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl EmbeddingQueue {
    /// Start the queue and its worker task
    pub fn start(
        embedder: Arc<dyn Embedder>,
        cache: Arc<EmbeddingCache>,
        limiter: Arc<RateLimiter>,
        config: QueueConfig,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            batches: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashSet::new()),
            processing: AtomicBool::new(false),
            seq: AtomicU64::new(0),
        });

        let worker = Worker {
            rx,
            shared: Arc::clone(&shared),
            cache: Arc::clone(&cache),
            embedder,
            limiter,
            config,
        };
        let handle = tokio::spawn(worker.run());

        Arc::new(Self {
            tx,
            shared,
            cache,
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Submit texts for document embedding; returns the batch id immediately.
    ///
    /// Texts already cached are pre-completed in the batch accounting; texts
    /// already enqueued by another batch are not enqueued twice.
    pub async fn submit(&self, texts: Vec<String>, metadata: Vec<Value>) -> Result<String> {
        if texts.len() != metadata.len() {
            return Err(AppError::Validation {
                message: format!(
                    "texts ({}) and metadata ({}) must have equal length",
                    texts.len(),
                    metadata.len()
                ),
            });
        }
        self.submit_with_type(texts, InputType::Document).await
    }

    async fn submit_with_type(&self, texts: Vec<String>, input_type: InputType) -> Result<String> {
        let seq = self.shared.seq.fetch_add(1, Ordering::Relaxed);
        let now = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let batch_id = format!("{:x}", md5::compute(format!("{}_{}_{}", now, seq, texts.len())));

        let mut manifest = Vec::new();
        let mut seen = HashSet::new();
        let mut cached = 0usize;
        let mut items = Vec::new();

        for text in texts {
            if text.trim().is_empty() {
                continue;
            }
            let hash = text_hash(&text, input_type);
            if !seen.insert(hash.clone()) {
                continue;
            }
            manifest.push(hash.clone());

            if self.cache.get(&hash).await.is_some() {
                cached += 1;
                continue;
            }

            let mut pending = self.shared.pending.lock().unwrap();
            if pending.contains(&hash) {
                continue;
            }
            pending.insert(hash.clone());
            drop(pending);

            items.push(QueueItem {
                batch_id: batch_id.clone(),
                hash,
                text,
                input_type,
            });
        }

        let total = manifest.len();
        let to_process = items.len();
        let all_resolved = manifest.len() == cached;
        let state = if all_resolved {
            BatchState::Completed
        } else {
            BatchState::Pending
        };

        let (signal, _) = watch::channel(state);
        self.shared.batches.lock().unwrap().insert(
            batch_id.clone(),
            BatchEntry {
                status: BatchStatus {
                    state,
                    total,
                    cached,
                    to_process,
                },
                manifest,
                signal,
            },
        );

        debug!(
            batch_id = %batch_id,
            total,
            cached,
            to_process,
            "Batch submitted"
        );

        if !items.is_empty() {
            self.tx.send(items).map_err(|_| AppError::ServiceUnavailable {
                message: "embedding queue worker is not running".to_string(),
            })?;
        }

        Ok(batch_id)
    }

    /// Block until the batch is completed or failed; false on timeout,
    /// failure or unknown batch
    pub async fn wait(&self, batch_id: &str, timeout: Duration) -> bool {
        let mut rx = {
            let batches = self.shared.batches.lock().unwrap();
            match batches.get(batch_id) {
                Some(entry) => entry.signal.subscribe(),
                None => return false,
            }
        };

        let result = match tokio::time::timeout(timeout, rx.wait_for(|s| s.is_terminal())).await {
            Ok(Ok(state)) => *state == BatchState::Completed,
            _ => false,
        };
        result
    }

    /// Read-through lookup of a cached vector by text hash
    pub async fn lookup(&self, hash: &str) -> Option<Vec<f32>> {
        self.cache.get(hash).await
    }

    /// Embed a single query-type text, preferring the cache. Returns `None`
    /// when the batch fails or times out.
    pub async fn embed_query(&self, text: &str, timeout: Duration) -> Result<Option<Vec<f32>>> {
        let hash = text_hash(text, InputType::Query);
        if let Some(v) = self.cache.get(&hash).await {
            return Ok(Some(v));
        }

        let batch_id = self
            .submit_with_type(vec![text.to_string()], InputType::Query)
            .await?;
        if !self.wait(&batch_id, timeout).await {
            return Ok(None);
        }
        Ok(self.cache.get(&hash).await)
    }

    /// Current status of a batch
    pub fn batch_status(&self, batch_id: &str) -> Option<BatchStatus> {
        self.shared
            .batches
            .lock()
            .unwrap()
            .get(batch_id)
            .map(|e| e.status.clone())
    }

    /// Queue depth, per-state batch counts, cache size, processing flag
    pub fn stats(&self) -> QueueStats {
        let batches = self.shared.batches.lock().unwrap();
        let mut stats = QueueStats {
            queued_texts: self.shared.pending.lock().unwrap().len(),
            pending_batches: 0,
            processing_batches: 0,
            completed_batches: 0,
            failed_batches: 0,
            cache_entries: self.cache.len(),
            processing: self.shared.processing.load(Ordering::Relaxed),
        };
        for entry in batches.values() {
            match entry.status.state {
                BatchState::Pending => stats.pending_batches += 1,
                BatchState::Processing => stats.processing_batches += 1,
                BatchState::Completed => stats.completed_batches += 1,
                BatchState::Failed => stats.failed_batches += 1,
            }
        }
        stats
    }

    /// Abort the worker task (shutdown teardown)
    pub fn shutdown(&self) {
        if let Some(handle) = self.worker.lock().unwrap().take() {
            handle.abort();
            info!("Embedding queue worker stopped");
        }
    }
}

struct Worker {
    rx: mpsc::UnboundedReceiver<Vec<QueueItem>>,
    shared: Arc<Shared>,
    cache: Arc<EmbeddingCache>,
    embedder: Arc<dyn Embedder>,
    limiter: Arc<RateLimiter>,
    config: QueueConfig,
}

impl Worker {
    async fn run(mut self) {
        let mut backlog: VecDeque<QueueItem> = VecDeque::new();

        loop {
            if backlog.is_empty() {
                self.shared.processing.store(false, Ordering::Relaxed);
                match self.rx.recv().await {
                    Some(items) => backlog.extend(items),
                    None => break,
                }
            }
            while let Ok(items) = self.rx.try_recv() {
                backlog.extend(items);
            }
            self.shared.processing.store(true, Ordering::Relaxed);

            // Assemble a super-batch of one input type, splitting a
            // submission's tail back onto the queue when it exceeds capacity
            let input_type = match backlog.front() {
                Some(item) => item.input_type,
                None => continue,
            };
            let mut chunk = Vec::new();
            while chunk.len() < self.config.max_batch_size {
                let take = backlog
                    .front()
                    .is_some_and(|item| item.input_type == input_type);
                if !take {
                    break;
                }
                chunk.push(backlog.pop_front().expect("front exists"));
            }

            self.mark_processing(&chunk);

            match self.process_super_batch(chunk, input_type).await {
                SuperBatchOutcome::Done => {
                    tokio::time::sleep(self.config.pacing).await;
                }
                SuperBatchOutcome::RateLimited(items) => {
                    warn!(
                        backoff_secs = self.config.rate_limit_backoff.as_secs(),
                        "Provider rate limit hit, backing off"
                    );
                    for item in items.into_iter().rev() {
                        backlog.push_front(item);
                    }
                    tokio::time::sleep(self.config.rate_limit_backoff).await;
                }
            }
        }

        debug!("Embedding queue worker exited");
    }

    async fn process_super_batch(
        &self,
        chunk: Vec<QueueItem>,
        input_type: InputType,
    ) -> SuperBatchOutcome {
        if chunk.is_empty() {
            return SuperBatchOutcome::Done;
        }

        info!(texts = chunk.len(), %input_type, "Processing super-batch");

        self.limiter.wait_if_needed().await;
        let texts: Vec<String> = chunk.iter().map(|i| i.text.clone()).collect();

        match self.embedder.embed(&texts, input_type).await {
            Ok(vectors) => {
                let mut invalid = Vec::new();
                for (item, vector) in chunk.iter().zip(vectors) {
                    if is_valid_embedding(&vector, self.config.dimension) {
                        self.cache.insert(item.hash.clone(), vector).await;
                    } else {
                        warn!(hash = %item.hash, "Provider returned an invalid embedding");
                        invalid.push(item.clone());
                    }
                }

                // Small invalid sets above the one-tenth threshold get one
                // individual retry with inter-call spacing
                if !invalid.is_empty()
                    && invalid.len() < 10
                    && invalid.len() * 10 > chunk.len()
                {
                    invalid = self.retry_individually(invalid, input_type).await;
                }

                crate::metrics::record_embedding(self.embedder.model_name(), chunk.len(), true);
                self.resolve(&chunk, &invalid).await;
                SuperBatchOutcome::Done
            }
            Err(e) if e.is_rate_limited() => SuperBatchOutcome::RateLimited(chunk),
            Err(e) => {
                error!(error = %e, texts = chunk.len(), "Super-batch failed");
                crate::metrics::record_embedding(self.embedder.model_name(), chunk.len(), false);
                self.fail_items(&chunk);
                SuperBatchOutcome::Done
            }
        }
    }

    async fn retry_individually(
        &self,
        invalid: Vec<QueueItem>,
        input_type: InputType,
    ) -> Vec<QueueItem> {
        let mut still_invalid = Vec::new();

        for (i, item) in invalid.into_iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.config.pacing).await;
            }
            self.limiter.wait_if_needed().await;

            match self.embedder.embed(&[item.text.clone()], input_type).await {
                Ok(vectors)
                    if vectors.len() == 1
                        && is_valid_embedding(&vectors[0], self.config.dimension) =>
                {
                    self.cache
                        .insert(item.hash.clone(), vectors.into_iter().next().expect("one"))
                        .await;
                }
                Ok(_) => still_invalid.push(item),
                Err(e) => {
                    warn!(error = %e, hash = %item.hash, "Individual retry failed");
                    still_invalid.push(item);
                }
            }
        }

        still_invalid
    }

    fn mark_processing(&self, chunk: &[QueueItem]) {
        let ids: HashSet<&String> = chunk.iter().map(|i| &i.batch_id).collect();
        let mut batches = self.shared.batches.lock().unwrap();
        for id in ids {
            if let Some(entry) = batches.get_mut(id) {
                if entry.status.state == BatchState::Pending {
                    set_state(entry, BatchState::Processing);
                }
            }
        }
    }

    /// Resolve batch states after a super-batch: failed hashes fail their
    /// owning batches; batches whose whole manifest is cached complete.
    async fn resolve(&self, chunk: &[QueueItem], invalid: &[QueueItem]) {
        {
            let mut pending = self.shared.pending.lock().unwrap();
            for item in chunk {
                pending.remove(&item.hash);
            }
        }

        if !invalid.is_empty() {
            let failed: HashSet<&String> = invalid.iter().map(|i| &i.hash).collect();
            let mut batches = self.shared.batches.lock().unwrap();
            for entry in batches.values_mut() {
                if !entry.status.state.is_terminal()
                    && entry.manifest.iter().any(|h| failed.contains(h))
                {
                    set_state(entry, BatchState::Failed);
                }
            }
        }

        // Snapshot non-terminal manifests, then check cache membership
        // outside the lock (persistent-tier lookups suspend)
        let candidates: Vec<(String, Vec<String>)> = {
            let batches = self.shared.batches.lock().unwrap();
            batches
                .iter()
                .filter(|(_, e)| !e.status.state.is_terminal())
                .map(|(id, e)| (id.clone(), e.manifest.clone()))
                .collect()
        };

        for (id, manifest) in candidates {
            let mut complete = true;
            for hash in &manifest {
                if self.cache.get(hash).await.is_none() {
                    complete = false;
                    break;
                }
            }
            if complete {
                let mut batches = self.shared.batches.lock().unwrap();
                if let Some(entry) = batches.get_mut(&id) {
                    if !entry.status.state.is_terminal() {
                        set_state(entry, BatchState::Completed);
                        debug!(batch_id = %id, "Batch completed");
                    }
                }
            }
        }
    }

    fn fail_items(&self, chunk: &[QueueItem]) {
        {
            let mut pending = self.shared.pending.lock().unwrap();
            for item in chunk {
                pending.remove(&item.hash);
            }
        }

        let failed: HashSet<&String> = chunk.iter().map(|i| &i.hash).collect();
        let mut batches = self.shared.batches.lock().unwrap();
        for entry in batches.values_mut() {
            if !entry.status.state.is_terminal()
                && entry.manifest.iter().any(|h| failed.contains(h))
            {
                set_state(entry, BatchState::Failed);
            }
        }
    }
}

enum SuperBatchOutcome {
    Done,
    RateLimited(Vec<QueueItem>),
}

/// Terminal states never transition back
fn set_state(entry: &mut BatchEntry, state: BatchState) {
    if entry.status.state.is_terminal() {
        return;
    }
    entry.status.state = state;
    let _ = entry.signal.send(state);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AppError;
    use async_trait::async_trait;

    /// Scripted embedder: pops pre-programmed responses, records calls
    struct ScriptedEmbedder {
        dimension: usize,
        calls: Mutex<Vec<Vec<String>>>,
        script: Mutex<VecDeque<ScriptStep>>,
    }

    enum ScriptStep {
        Ok,
        Zeros,
        RateLimit,
        Fail,
    }

    impl ScriptedEmbedder {
        fn new(dimension: usize, script: Vec<ScriptStep>) -> Arc<Self> {
            Arc::new(Self {
                dimension,
                calls: Mutex::new(Vec::new()),
                script: Mutex::new(script.into()),
            })
        }

        fn calls(&self) -> Vec<Vec<String>> {
            self.calls.lock().unwrap().clone()
        }

        fn valid_vector(&self) -> Vec<f32> {
            vec![0.5; self.dimension]
        }
    }

    #[async_trait]
    impl Embedder for ScriptedEmbedder {
        async fn embed(&self, texts: &[String], _t: InputType) -> Result<Vec<Vec<f32>>> {
            self.calls.lock().unwrap().push(texts.to_vec());
            let step = self.script.lock().unwrap().pop_front().unwrap_or(ScriptStep::Ok);
            match step {
                ScriptStep::Ok => Ok(texts.iter().map(|_| self.valid_vector()).collect()),
                ScriptStep::Zeros => Ok(texts.iter().map(|_| vec![0.0; self.dimension]).collect()),
                ScriptStep::RateLimit => Err(AppError::ProviderRateLimited {
                    message: "rate limit".into(),
                }),
                ScriptStep::Fail => Err(AppError::Embedding {
                    message: "boom".into(),
                }),
            }
        }

        fn model_name(&self) -> &str {
            "scripted"
        }

        fn dimension(&self) -> usize {
            self.dimension
        }
    }

    const DIM: usize = 8;

    fn queue_with(embedder: Arc<ScriptedEmbedder>) -> (Arc<EmbeddingQueue>, Arc<EmbeddingCache>) {
        let cache = Arc::new(EmbeddingCache::new(None, 10_000));
        let limiter = Arc::new(RateLimiter::new(100, Duration::from_secs(60)));
        let queue = EmbeddingQueue::start(
            embedder,
            Arc::clone(&cache),
            limiter,
            QueueConfig {
                max_batch_size: 120,
                pacing: Duration::from_secs(21),
                rate_limit_backoff: Duration::from_secs(60),
                dimension: DIM,
            },
        );
        (queue, cache)
    }

    fn meta(n: usize) -> Vec<Value> {
        vec![Value::Null; n]
    }

    #[tokio::test(start_paused = true)]
    async fn test_cached_round_trip() {
        // Submit ["alpha"], wait: provider called once with ["alpha"].
        // Re-submit ["alpha", "beta"]: provider called once with ["beta"].
        let embedder = ScriptedEmbedder::new(DIM, vec![]);
        let (queue, _cache) = queue_with(Arc::clone(&embedder));

        let b1 = queue.submit(vec!["alpha".into()], meta(1)).await.unwrap();
        assert!(queue.wait(&b1, Duration::from_secs(600)).await);
        assert_eq!(embedder.calls(), vec![vec!["alpha".to_string()]]);

        let b2 = queue
            .submit(vec!["alpha".into(), "beta".into()], meta(2))
            .await
            .unwrap();
        assert!(queue.wait(&b2, Duration::from_secs(600)).await);
        assert_eq!(
            embedder.calls(),
            vec![vec!["alpha".to_string()], vec!["beta".to_string()]]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_vector_rejection() {
        // Provider keeps returning zero vectors: nothing cached, batch failed
        let embedder =
            ScriptedEmbedder::new(DIM, vec![ScriptStep::Zeros, ScriptStep::Zeros]);
        let (queue, cache) = queue_with(Arc::clone(&embedder));

        let batch = queue.submit(vec!["x".into()], meta(1)).await.unwrap();
        assert!(!queue.wait(&batch, Duration::from_secs(600)).await);

        assert_eq!(
            queue.batch_status(&batch).unwrap().state,
            BatchState::Failed
        );
        let hash = text_hash("x", InputType::Document);
        assert!(cache.get(&hash).await.is_none());
        // super-batch call plus one individual retry
        assert_eq!(embedder.calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_vector_recovers_on_individual_retry() {
        let embedder = ScriptedEmbedder::new(DIM, vec![ScriptStep::Zeros, ScriptStep::Ok]);
        let (queue, cache) = queue_with(Arc::clone(&embedder));

        let batch = queue.submit(vec!["x".into()], meta(1)).await.unwrap();
        assert!(queue.wait(&batch, Duration::from_secs(600)).await);

        let hash = text_hash("x", InputType::Document);
        assert!(cache.get(&hash).await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_super_batch_splitting() {
        // 250 texts: at least three provider calls, exactly one completed batch
        let embedder = ScriptedEmbedder::new(DIM, vec![]);
        let (queue, _cache) = queue_with(Arc::clone(&embedder));

        let texts: Vec<String> = (0..250).map(|i| format!("text-{}", i)).collect();
        let n = texts.len();
        let batch = queue.submit(texts, meta(n)).await.unwrap();
        assert!(queue.wait(&batch, Duration::from_secs(3600)).await);

        let calls = embedder.calls();
        assert!(calls.len() >= 3, "expected >= 3 provider calls, got {}", calls.len());
        assert!(calls.iter().all(|c| c.len() <= 120));
        assert_eq!(calls.iter().map(|c| c.len()).sum::<usize>(), 250);

        let stats = queue.stats();
        assert_eq!(stats.completed_batches, 1);
        assert_eq!(stats.failed_batches, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fully_cached_submission_completes_before_processor_runs() {
        let embedder = ScriptedEmbedder::new(DIM, vec![]);
        let (queue, cache) = queue_with(Arc::clone(&embedder));

        let texts: Vec<String> = (0..120).map(|i| format!("warm-{}", i)).collect();
        for t in &texts {
            cache
                .insert(text_hash(t, InputType::Document), vec![0.5; DIM])
                .await;
        }

        let n = texts.len();
        let batch = queue.submit(texts, meta(n)).await.unwrap();
        let status = queue.batch_status(&batch).unwrap();
        assert_eq!(status.state, BatchState::Completed);
        assert_eq!(status.cached, 120);
        assert_eq!(status.to_process, 0);
        assert_eq!(embedder.calls().len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_backs_off_without_failing_batch() {
        let embedder = ScriptedEmbedder::new(DIM, vec![ScriptStep::RateLimit, ScriptStep::Ok]);
        let (queue, _cache) = queue_with(Arc::clone(&embedder));

        let batch = queue.submit(vec!["alpha".into()], meta(1)).await.unwrap();
        assert!(queue.wait(&batch, Duration::from_secs(600)).await);
        assert_eq!(embedder.calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_provider_failure_fails_owning_batch() {
        let embedder = ScriptedEmbedder::new(DIM, vec![ScriptStep::Fail]);
        let (queue, _cache) = queue_with(Arc::clone(&embedder));

        let batch = queue.submit(vec!["alpha".into()], meta(1)).await.unwrap();
        assert!(!queue.wait(&batch, Duration::from_secs(600)).await);
        assert_eq!(queue.batch_status(&batch).unwrap().state, BatchState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_text_within_one_submission() {
        let embedder = ScriptedEmbedder::new(DIM, vec![]);
        let (queue, _cache) = queue_with(Arc::clone(&embedder));

        let batch = queue
            .submit(vec!["dup".into(), "dup".into()], meta(2))
            .await
            .unwrap();
        assert!(queue.wait(&batch, Duration::from_secs(600)).await);
        assert_eq!(embedder.calls(), vec![vec!["dup".to_string()]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_on_unknown_batch_is_false() {
        let embedder = ScriptedEmbedder::new(DIM, vec![]);
        let (queue, _cache) = queue_with(embedder);
        assert!(!queue.wait("no-such-batch", Duration::from_millis(10)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_embed_query_uses_query_cache_key() {
        let embedder = ScriptedEmbedder::new(DIM, vec![]);
        let (queue, cache) = queue_with(Arc::clone(&embedder));

        let v = queue
            .embed_query("stok ALO", Duration::from_secs(600))
            .await
            .unwrap();
        assert!(v.is_some());
        assert!(cache
            .get(&text_hash("stok ALO", InputType::Query))
            .await
            .is_some());

        // Second call is served from cache, no new provider call
        let calls_before = embedder.calls().len();
        let v2 = queue
            .embed_query("stok ALO", Duration::from_secs(600))
            .await
            .unwrap();
        assert!(v2.is_some());
        assert_eq!(embedder.calls().len(), calls_before);
    }
}
