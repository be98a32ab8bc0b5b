//! Error types for the Atabot service
//!
//! Provides a comprehensive error handling system with:
//! - Distinct error types for different failure modes
//! - HTTP status code mapping
//! - Structured error responses
//! - Error codes for client handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,
    QueryRejected,
    NoActiveSchema,

    // Resource errors (4xxx)
    NotFound,
    SchemaNotFound,
    TableNotFound,
    JobNotFound,

    // Rate limiting (6xxx)
    RateLimited,
    ProviderRateLimited,

    // Database errors (7xxx)
    DatabaseError,
    ConnectionError,

    // External service errors (8xxx)
    EmbeddingError,
    InvalidEmbedding,
    BatchTimeout,
    ProviderAuth,
    LlmError,
    UpstreamError,

    // SQL safety (85xx)
    DangerousSql,
    SqlExecution,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,
    ServiceUnavailable,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            // Validation (1xxx)
            ErrorCode::ValidationError => 1001,
            ErrorCode::QueryRejected => 1002,
            ErrorCode::NoActiveSchema => 1003,

            // Resources (4xxx)
            ErrorCode::NotFound => 4001,
            ErrorCode::SchemaNotFound => 4002,
            ErrorCode::TableNotFound => 4003,
            ErrorCode::JobNotFound => 4004,

            // Rate limits (6xxx)
            ErrorCode::RateLimited => 6001,
            ErrorCode::ProviderRateLimited => 6002,

            // Database (7xxx)
            ErrorCode::DatabaseError => 7001,
            ErrorCode::ConnectionError => 7002,

            // External (8xxx)
            ErrorCode::EmbeddingError => 8001,
            ErrorCode::InvalidEmbedding => 8002,
            ErrorCode::BatchTimeout => 8003,
            ErrorCode::ProviderAuth => 8004,
            ErrorCode::LlmError => 8005,
            ErrorCode::UpstreamError => 8006,

            // SQL safety (85xx)
            ErrorCode::DangerousSql => 8501,
            ErrorCode::SqlExecution => 8502,

            // Internal (9xxx)
            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
            ErrorCode::ServiceUnavailable => 9999,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Validation failed: {message}")]
    Validation { message: String },

    #[error("Query rejected: {message}")]
    QueryRejected { message: String },

    #[error("No active schema: register and activate a schema before querying")]
    NoActiveSchema,

    // Resource errors
    #[error("Resource not found: {resource_type} with id {id}")]
    NotFound { resource_type: String, id: String },

    #[error("Schema not found: {name}")]
    SchemaNotFound { name: String },

    #[error("Table not found: {schema}.{table}")]
    TableNotFound { schema: String, table: String },

    #[error("Sync job not found: {id}")]
    JobNotFound { id: String },

    // Rate limiting
    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Embedding provider rate limit hit: {message}")]
    ProviderRateLimited { message: String },

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database connection error: {message}")]
    DatabaseConnection { message: String },

    // External service errors
    #[error("Embedding service error: {message}")]
    Embedding { message: String },

    #[error("Invalid embedding: {message}")]
    InvalidEmbedding { message: String },

    #[error("Embedding batch {batch_id} timed out after {timeout_secs}s")]
    BatchTimeout { batch_id: String, timeout_secs: u64 },

    #[error("Embedding provider auth/billing error: {message}")]
    ProviderAuth { message: String },

    #[error("LLM error: {message}")]
    Llm { message: String },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // SQL safety
    #[error("Generated SQL contains a forbidden statement: {keyword}")]
    DangerousSql { keyword: String },

    #[error("SQL execution failed: {message}")]
    SqlExecution { message: String },

    // Internal errors
    #[error("Internal server error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Service unavailable: {message}")]
    ServiceUnavailable { message: String },

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::QueryRejected { .. } => ErrorCode::QueryRejected,
            AppError::NoActiveSchema => ErrorCode::NoActiveSchema,
            AppError::NotFound { .. } => ErrorCode::NotFound,
            AppError::SchemaNotFound { .. } => ErrorCode::SchemaNotFound,
            AppError::TableNotFound { .. } => ErrorCode::TableNotFound,
            AppError::JobNotFound { .. } => ErrorCode::JobNotFound,
            AppError::RateLimited => ErrorCode::RateLimited,
            AppError::ProviderRateLimited { .. } => ErrorCode::ProviderRateLimited,
            AppError::Database(_) => ErrorCode::DatabaseError,
            AppError::DatabaseConnection { .. } => ErrorCode::ConnectionError,
            AppError::Embedding { .. } => ErrorCode::EmbeddingError,
            AppError::InvalidEmbedding { .. } => ErrorCode::InvalidEmbedding,
            AppError::BatchTimeout { .. } => ErrorCode::BatchTimeout,
            AppError::ProviderAuth { .. } => ErrorCode::ProviderAuth,
            AppError::Llm { .. } => ErrorCode::LlmError,
            AppError::HttpClient(_) => ErrorCode::UpstreamError,
            AppError::DangerousSql { .. } => ErrorCode::DangerousSql,
            AppError::SqlExecution { .. } => ErrorCode::SqlExecution,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::ServiceUnavailable { .. } => ErrorCode::ServiceUnavailable,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation { .. }
            | AppError::QueryRejected { .. }
            | AppError::NoActiveSchema
            | AppError::DangerousSql { .. }
            | AppError::SqlExecution { .. } => StatusCode::BAD_REQUEST,

            // 404 Not Found
            AppError::NotFound { .. }
            | AppError::SchemaNotFound { .. }
            | AppError::TableNotFound { .. }
            | AppError::JobNotFound { .. } => StatusCode::NOT_FOUND,

            // 429 Too Many Requests
            AppError::RateLimited => StatusCode::TOO_MANY_REQUESTS,

            // 500 Internal Server Error
            AppError::Database(_)
            | AppError::DatabaseConnection { .. }
            | AppError::Internal { .. }
            | AppError::Configuration { .. }
            | AppError::Serialization(_)
            | AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,

            // 502 Bad Gateway
            AppError::Embedding { .. }
            | AppError::InvalidEmbedding { .. }
            | AppError::ProviderAuth { .. }
            | AppError::Llm { .. }
            | AppError::HttpClient(_) => StatusCode::BAD_GATEWAY,

            // 504 Gateway Timeout
            AppError::BatchTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,

            // 503 Service Unavailable
            AppError::ProviderRateLimited { .. } | AppError::ServiceUnavailable { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        }
    }

    /// True for provider rate-limit errors (backed off, never retried against
    /// the retry budget and never fails a batch)
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, AppError::ProviderRateLimited { .. })
    }

    /// True for provider auth/billing errors (fail fast, no retry)
    pub fn is_provider_auth(&self) -> bool {
        matches!(self, AppError::ProviderAuth { .. })
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Check if this error is a client error
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

/// Structured error response for the API
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let message = self.to_string();

        // Log based on severity
        if self.is_server_error() {
            tracing::error!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Server error"
            );
        } else if self.is_client_error() {
            tracing::warn!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Client error"
            );
        }

        let body = ErrorResponse {
            error: ErrorDetails {
                code,
                message,
                details: None,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        let err = AppError::SchemaNotFound { name: "retail".into() };
        assert_eq!(err.code(), ErrorCode::SchemaNotFound);
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_validation_error() {
        let err = AppError::Validation {
            message: "Query too long".into(),
        };
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(!err.is_server_error());
        assert!(err.is_client_error());
    }

    #[test]
    fn test_rate_limit_classification() {
        let err = AppError::ProviderRateLimited {
            message: "free tier quota".into(),
        };
        assert!(err.is_rate_limited());
        assert!(!err.is_provider_auth());

        let err = AppError::ProviderAuth {
            message: "invalid api key".into(),
        };
        assert!(err.is_provider_auth());
    }

    #[test]
    fn test_dangerous_sql_is_client_error() {
        let err = AppError::DangerousSql { keyword: "DROP".into() };
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.code().as_code(), 8501);
    }
}
