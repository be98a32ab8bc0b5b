//! Embedding provider abstraction
//!
//! Provides a unified interface over dense-vector embedding APIs:
//! - VoyageAI-style HTTP providers (document/query input types, truncation)
//! - Mock provider for tests
//!
//! Provider error kinds are classified so callers can apply the right policy:
//! rate limits back off without consuming the retry budget, auth and billing
//! errors fail fast, everything else retries with exponential back-off.

mod rate_limit;

pub use rate_limit::RateLimiter;

use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

/// Whether a text is embedded for indexing or for searching
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    Document,
    Query,
}

impl InputType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InputType::Document => "document",
            InputType::Query => "query",
        }
    }
}

impl fmt::Display for InputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trait for embedding generation
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate embeddings for a batch of texts; the returned vector order
    /// matches the input text order
    async fn embed(&self, texts: &[String], input_type: InputType) -> Result<Vec<Vec<f32>>>;

    /// Get the model name
    fn model_name(&self) -> &str;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;
}

/// A vector is valid when it has the expected dimensionality and more than
/// 10% non-zero components. Providers occasionally return all-zero vectors
/// under quota pressure; those must never be cached or stored.
pub fn is_valid_embedding(vector: &[f32], dimension: usize) -> bool {
    if vector.len() != dimension {
        return false;
    }
    let non_zero = vector.iter().filter(|v| **v != 0.0).count();
    non_zero as f64 > dimension as f64 * 0.1
}

/// Texts longer than this are truncated before the provider call
const MAX_TEXT_CHARS: usize = 8000;

/// VoyageAI embedding client
pub struct VoyageEmbedder {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dimension: usize,
    base_url: String,
    max_retries: u32,
}

#[derive(Serialize)]
struct VoyageRequest<'a> {
    model: &'a str,
    texts: Vec<String>,
    input_type: &'a str,
    truncation: bool,
}

#[derive(Deserialize)]
struct VoyageResponse {
    embeddings: Vec<Vec<f32>>,
}

impl VoyageEmbedder {
    /// Create a new VoyageAI embedder
    pub fn new(
        api_key: String,
        model: String,
        dimension: usize,
        base_url: Option<String>,
        timeout_secs: u64,
        max_retries: u32,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            api_key,
            model,
            dimension,
            base_url: base_url.unwrap_or_else(|| "https://api.voyageai.com/v1".to_string()),
            max_retries,
        }
    }

    /// Classify a provider failure by status and body text
    fn classify_error(status: reqwest::StatusCode, body: &str) -> AppError {
        let lower = body.to_lowercase();

        if lower.contains("payment method") {
            return AppError::ProviderAuth {
                message: format!("provider requires a payment method: {}", body),
            };
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS || lower.contains("rate limit") {
            return AppError::ProviderRateLimited { message: body.to_string() };
        }
        if status == reqwest::StatusCode::UNAUTHORIZED
            || status == reqwest::StatusCode::FORBIDDEN
            || lower.contains("api key")
            || lower.contains("unauthorized")
        {
            return AppError::ProviderAuth { message: body.to_string() };
        }

        AppError::Embedding {
            message: format!("API error {}: {}", status, body),
        }
    }

    async fn make_request(&self, texts: &[String], input_type: InputType) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.base_url);

        let truncated: Vec<String> = texts
            .iter()
            .map(|t| t.chars().take(MAX_TEXT_CHARS).collect())
            .collect();

        let request = VoyageRequest {
            model: &self.model,
            texts: truncated,
            input_type: input_type.as_str(),
            truncation: true,
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::Embedding {
                message: format!("Request failed: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_error(status, &body));
        }

        let result: VoyageResponse = response.json().await.map_err(|e| AppError::Embedding {
            message: format!("Failed to parse response: {}", e),
        })?;

        if result.embeddings.len() != texts.len() {
            return Err(AppError::Embedding {
                message: format!(
                    "Provider returned {} embeddings for {} texts",
                    result.embeddings.len(),
                    texts.len()
                ),
            });
        }

        Ok(result.embeddings)
    }

    /// Request with retry: transient errors back off 2s -> 60s for up to
    /// `max_retries` attempts; auth errors fail fast; rate-limit errors are
    /// surfaced to the caller (the queue owns its 60s back-off and does not
    /// charge them to the retry budget)
    async fn request_with_retry(
        &self,
        texts: &[String],
        input_type: InputType,
    ) -> Result<Vec<Vec<f32>>> {
        let mut last_error = None;

        for attempt in 0..self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs((2u64 * 4u64.pow(attempt - 1)).min(60));
                tokio::time::sleep(delay).await;
            }

            match self.make_request(texts, input_type).await {
                Ok(embeddings) => return Ok(embeddings),
                Err(e) if e.is_rate_limited() || e.is_provider_auth() => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        error = %e,
                        "Embedding request failed, retrying"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| AppError::Embedding {
            message: "Unknown error after retries".to_string(),
        }))
    }
}

#[async_trait]
impl Embedder for VoyageEmbedder {
    async fn embed(&self, texts: &[String], input_type: InputType) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request_with_retry(texts, input_type).await
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Mock embedder for testing
pub struct MockEmbedder {
    dimension: usize,
    calls: Mutex<Vec<Vec<String>>>,
}

impl MockEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Texts passed to each provider call, in call order
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, texts: &[String], _input_type: InputType) -> Result<Vec<Vec<f32>>> {
        use rand::Rng;
        self.calls.lock().unwrap().push(texts.to_vec());

        let mut rng = rand::thread_rng();
        Ok(texts
            .iter()
            .map(|_| (0..self.dimension).map(|_| rng.gen_range(0.01..1.0)).collect())
            .collect())
    }

    fn model_name(&self) -> &str {
        "mock-embedding"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Create an embedder based on configuration
pub fn create_embedder(config: &crate::config::EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "voyage" => {
            let key = config
                .api_key
                .clone()
                .ok_or_else(|| AppError::Configuration {
                    message: "embedding.api_key required for the voyage provider".to_string(),
                })?;
            Ok(Arc::new(VoyageEmbedder::new(
                key,
                config.model.clone(),
                config.dimension,
                config.base_url.clone(),
                config.timeout_secs,
                config.max_retries,
            )))
        }
        "mock" => Ok(Arc::new(MockEmbedder::new(config.dimension))),
        other => {
            tracing::warn!(provider = other, "Unknown embedding provider, using mock");
            Ok(Arc::new(MockEmbedder::new(config.dimension)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_vector_is_invalid() {
        let zeros = vec![0.0f32; 1024];
        assert!(!is_valid_embedding(&zeros, 1024));
    }

    #[test]
    fn test_wrong_dimension_is_invalid() {
        let v = vec![0.5f32; 512];
        assert!(!is_valid_embedding(&v, 1024));
    }

    #[test]
    fn test_sparse_vector_below_threshold_is_invalid() {
        // Exactly 10% non-zero is not enough; the threshold is strict
        let mut v = vec![0.0f32; 100];
        for x in v.iter_mut().take(10) {
            *x = 1.0;
        }
        assert!(!is_valid_embedding(&v, 100));

        for x in v.iter_mut().take(11) {
            *x = 1.0;
        }
        assert!(is_valid_embedding(&v, 100));
    }

    #[test]
    fn test_error_classification() {
        let err = VoyageEmbedder::classify_error(
            reqwest::StatusCode::TOO_MANY_REQUESTS,
            "rate limit exceeded",
        );
        assert!(err.is_rate_limited());

        let err = VoyageEmbedder::classify_error(
            reqwest::StatusCode::BAD_REQUEST,
            "please add a payment method to your account",
        );
        assert!(err.is_provider_auth());

        let err =
            VoyageEmbedder::classify_error(reqwest::StatusCode::UNAUTHORIZED, "invalid api key");
        assert!(err.is_provider_auth());

        let err = VoyageEmbedder::classify_error(
            reqwest::StatusCode::INTERNAL_SERVER_ERROR,
            "server error",
        );
        assert!(!err.is_rate_limited() && !err.is_provider_auth());
    }

    #[tokio::test]
    async fn test_mock_embedder() {
        let embedder = MockEmbedder::new(1024);
        let texts = vec!["alpha".to_string(), "beta".to_string()];
        let embeddings = embedder.embed(&texts, InputType::Document).await.unwrap();
        assert_eq!(embeddings.len(), 2);
        assert_eq!(embeddings[0].len(), 1024);
        assert!(is_valid_embedding(&embeddings[0], 1024));
        assert_eq!(embedder.call_count(), 1);
        assert_eq!(embedder.calls()[0], texts);
    }
}
