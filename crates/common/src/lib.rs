//! Atabot Common Library
//!
//! Shared code for the Atabot service including:
//! - Vector store over PostgreSQL + pgvector
//! - Two-tier embedding cache
//! - Rate-limited embedding queue and provider clients
//! - Database pool, introspection and dynamic row decoding
//! - Error types and handling
//! - Configuration management
//! - Metrics and observability

pub mod cache;
pub mod config;
pub mod db;
pub mod embeddings;
pub mod errors;
pub mod llm;
pub mod metrics;
pub mod queue;
pub mod registry;
pub mod store;

// Re-export commonly used types
pub use cache::EmbeddingCache;
pub use config::AppConfig;
pub use db::DbPool;
pub use embeddings::{Embedder, InputType, RateLimiter};
pub use errors::{AppError, Result};
pub use queue::EmbeddingQueue;
pub use store::VectorStore;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default embedding model
pub const DEFAULT_EMBEDDING_MODEL: &str = "voyage-3.5-lite";

/// Default embedding dimension
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 1024;
