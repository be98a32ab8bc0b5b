//! Configuration management for the Atabot service
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default, config/<env>, config/local)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Embedding provider configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// LLM provider configuration
    #[serde(default)]
    pub llm: LlmConfig,

    /// Sync pipeline configuration
    #[serde(default)]
    pub sync: SyncConfig,

    /// Embedding cache configuration
    #[serde(default)]
    pub cache: CacheConfig,

    /// Inbound rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Feature flags
    #[serde(default)]
    pub features: FeatureFlags,

    /// CORS configuration
    #[serde(default)]
    pub cors: CorsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Shutdown timeout in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// PostgreSQL URL (must have the pgvector extension available)
    pub url: String,

    /// Maximum number of pooled connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Per-acquire timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// Embedding provider: voyage, mock
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// API key for the embedding provider
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub base_url: Option<String>,

    /// Model to use
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Maximum texts per provider request (super-batch ceiling)
    #[serde(default = "default_super_batch")]
    pub max_batch_size: usize,

    /// Request timeout in seconds
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,

    /// Maximum retries for transient provider errors
    #[serde(default = "default_embedding_retries")]
    pub max_retries: u32,

    /// Provider rate limit: max requests per window
    #[serde(default = "default_rate_limit_max")]
    pub rate_limit_max_requests: usize,

    /// Provider rate limit: window in seconds
    #[serde(default = "default_rate_limit_window")]
    pub rate_limit_window_secs: u64,

    /// Pause between super-batches in seconds (free-tier pacing)
    #[serde(default = "default_pacing")]
    pub pacing_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    /// API key for the LLM provider
    pub api_key: Option<String>,

    /// OpenAI-compatible base URL
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    /// Model identifier
    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Maximum tokens per completion
    #[serde(default = "default_llm_max_tokens")]
    pub max_tokens: u32,

    /// Sampling temperature
    #[serde(default = "default_llm_temperature")]
    pub temperature: f32,

    /// Request timeout in seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SyncConfig {
    /// Rows per page when streaming a table
    #[serde(default = "default_sync_batch")]
    pub batch_size: usize,

    /// Maximum concurrent sync jobs
    #[serde(default = "default_sync_workers")]
    pub max_workers: usize,

    /// Timeout when waiting for a page's embedding batch, in seconds
    #[serde(default = "default_sync_wait")]
    pub wait_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Enable the embedding cache
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// In-memory tier ceiling (entries)
    #[serde(default = "default_cache_max")]
    pub max_entries: usize,

    /// Persistent-tier retention in days
    #[serde(default = "default_cache_ttl_days")]
    pub ttl_days: i64,

    /// Background flush interval in seconds
    #[serde(default = "default_flush_interval")]
    pub flush_interval_secs: u64,

    /// Rows preloaded into memory at startup
    #[serde(default = "default_preload")]
    pub preload_limit: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Requests per second for the inbound API
    #[serde(default = "default_inbound_rate")]
    pub requests_per_second: u32,

    /// Burst capacity
    #[serde(default = "default_inbound_burst")]
    pub burst: u32,

    /// Enable inbound rate limiting
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FeatureFlags {
    /// Hybrid vector + keyword search
    #[serde(default = "default_enabled")]
    pub hybrid_search: bool,

    /// LLM query decomposition for multi-part questions
    #[serde(default = "default_enabled")]
    pub query_decomposition: bool,

    /// SSE streaming chat responses
    #[serde(default = "default_enabled")]
    pub streaming: bool,

    /// Real-time change propagation via triggers
    #[serde(default)]
    pub realtime_sync: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CorsConfig {
    /// Allowed origins; ["*"] allows any
    #[serde(default = "default_cors_origins")]
    pub allow_origins: Vec<String>,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8000 }
fn default_request_timeout() -> u64 { 30 }
fn default_shutdown_timeout() -> u64 { 30 }
fn default_max_connections() -> u32 { 20 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_embedding_provider() -> String { "voyage".to_string() }
fn default_embedding_model() -> String { crate::DEFAULT_EMBEDDING_MODEL.to_string() }
fn default_embedding_dimension() -> usize { crate::DEFAULT_EMBEDDING_DIMENSION }
fn default_super_batch() -> usize { 120 }
fn default_embedding_timeout() -> u64 { 30 }
fn default_embedding_retries() -> u32 { 3 }
fn default_rate_limit_max() -> usize { 3 }
fn default_rate_limit_window() -> u64 { 60 }
fn default_pacing() -> u64 { 21 }
fn default_llm_base_url() -> String { "https://api.poe.com/v1".to_string() }
fn default_llm_model() -> String { "GPT-3.5-Turbo".to_string() }
fn default_llm_max_tokens() -> u32 { 2000 }
fn default_llm_temperature() -> f32 { 0.1 }
fn default_llm_timeout() -> u64 { 30 }
fn default_sync_batch() -> usize { 1000 }
fn default_sync_workers() -> usize { 4 }
fn default_sync_wait() -> u64 { 300 }
fn default_cache_max() -> usize { 1000 }
fn default_cache_ttl_days() -> i64 { 30 }
fn default_flush_interval() -> u64 { 300 }
fn default_preload() -> usize { 1000 }
fn default_inbound_rate() -> u32 { 50 }
fn default_inbound_burst() -> u32 { 100 }
fn default_enabled() -> bool { true }
fn default_cors_origins() -> Vec<String> { vec!["*".to_string()] }

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))
            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            // Load local overrides
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables with APP__ prefix
            // e.g., APP__DATABASE__URL=postgres://...
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("cors.allow_origins"),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            api_key: None,
            base_url: None,
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            max_batch_size: default_super_batch(),
            timeout_secs: default_embedding_timeout(),
            max_retries: default_embedding_retries(),
            rate_limit_max_requests: default_rate_limit_max(),
            rate_limit_window_secs: default_rate_limit_window(),
            pacing_secs: default_pacing(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            max_tokens: default_llm_max_tokens(),
            temperature: default_llm_temperature(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: default_sync_batch(),
            max_workers: default_sync_workers(),
            wait_timeout_secs: default_sync_wait(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: default_cache_max(),
            ttl_days: default_cache_ttl_days(),
            flush_interval_secs: default_flush_interval(),
            preload_limit: default_preload(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_inbound_rate(),
            burst: default_inbound_burst(),
            enabled: true,
        }
    }
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            hybrid_search: true,
            query_decomposition: true,
            streaming: true,
            realtime_sync: false,
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allow_origins: default_cors_origins(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig {
                url: "postgres://localhost/atabot".to_string(),
                max_connections: default_max_connections(),
                connect_timeout_secs: default_connect_timeout(),
                idle_timeout_secs: default_idle_timeout(),
            },
            embedding: EmbeddingConfig::default(),
            llm: LlmConfig::default(),
            sync: SyncConfig::default(),
            cache: CacheConfig::default(),
            rate_limit: RateLimitConfig::default(),
            features: FeatureFlags::default(),
            cors: CorsConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.embedding.model, "voyage-3.5-lite");
        assert_eq!(config.embedding.dimension, 1024);
        assert_eq!(config.embedding.max_batch_size, 120);
        assert_eq!(config.database.max_connections, 20);
    }

    #[test]
    fn test_free_tier_pacing_defaults() {
        let config = EmbeddingConfig::default();
        assert_eq!(config.rate_limit_max_requests, 3);
        assert_eq!(config.rate_limit_window_secs, 60);
        assert_eq!(config.pacing_secs, 21);
    }

    #[test]
    fn test_feature_flags_default() {
        let flags = FeatureFlags::default();
        assert!(flags.hybrid_search);
        assert!(flags.query_decomposition);
        assert!(!flags.realtime_sync);
    }
}
