//! Metrics and observability utilities
//!
//! Prometheus metrics with standardized naming conventions, scraped from the
//! gateway's /metrics endpoint.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all Atabot metrics
pub const METRICS_PREFIX: &str = "atabot";

/// Register all metric descriptions
pub fn register_metrics() {
    // Request metrics
    describe_counter!(
        format!("{}_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of HTTP requests"
    );

    describe_histogram!(
        format!("{}_request_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "HTTP request latency in seconds"
    );

    // Search metrics
    describe_counter!(
        format!("{}_search_queries_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of search queries"
    );

    describe_histogram!(
        format!("{}_search_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Search query latency in seconds"
    );

    // Embedding metrics
    describe_counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total embedding provider requests"
    );

    describe_counter!(
        format!("{}_embedding_errors_total", METRICS_PREFIX),
        Unit::Count,
        "Total embedding provider errors"
    );

    // Sync metrics
    describe_counter!(
        format!("{}_sync_rows_total", METRICS_PREFIX),
        Unit::Count,
        "Total rows synchronized to the vector store"
    );

    describe_histogram!(
        format!("{}_sync_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Table sync duration in seconds"
    );

    // Queue metrics
    describe_gauge!(
        format!("{}_queue_depth", METRICS_PREFIX),
        Unit::Count,
        "Texts waiting in the embedding queue"
    );

    // Cache metrics
    describe_counter!(
        format!("{}_cache_hits_total", METRICS_PREFIX),
        Unit::Count,
        "Total cache hits"
    );

    describe_counter!(
        format!("{}_cache_misses_total", METRICS_PREFIX),
        Unit::Count,
        "Total cache misses"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record request metrics
pub struct RequestMetrics {
    start: Instant,
    endpoint: String,
    method: String,
}

impl RequestMetrics {
    /// Start tracking a request
    pub fn start(method: &str, endpoint: &str) -> Self {
        Self {
            start: Instant::now(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
        }
    }

    /// Record request completion
    pub fn finish(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_requests_total", METRICS_PREFIX),
            "method" => self.method.clone(),
            "endpoint" => self.endpoint.clone(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            format!("{}_request_duration_seconds", METRICS_PREFIX),
            "method" => self.method,
            "endpoint" => self.endpoint
        )
        .record(duration);
    }
}

/// Helper to record search metrics
pub fn record_search(duration_secs: f64, branch: &str) {
    counter!(
        format!("{}_search_queries_total", METRICS_PREFIX),
        "branch" => branch.to_string()
    )
    .increment(1);

    histogram!(
        format!("{}_search_duration_seconds", METRICS_PREFIX),
        "branch" => branch.to_string()
    )
    .record(duration_secs);
}

/// Helper to record embedding provider metrics
pub fn record_embedding(model: &str, batch_size: usize, success: bool) {
    counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        "model" => model.to_string(),
        "status" => if success { "success" } else { "error" }.to_string()
    )
    .increment(1);

    if !success {
        counter!(
            format!("{}_embedding_errors_total", METRICS_PREFIX),
            "model" => model.to_string()
        )
        .increment(1);
    }

    gauge!(format!("{}_queue_depth", METRICS_PREFIX)).decrement(batch_size as f64);
}

/// Helper to record sync metrics
pub fn record_sync(duration_secs: f64, rows: usize, schema: &str) {
    counter!(
        format!("{}_sync_rows_total", METRICS_PREFIX),
        "schema" => schema.to_string()
    )
    .increment(rows as u64);

    histogram!(format!("{}_sync_duration_seconds", METRICS_PREFIX)).record(duration_secs);
}

/// Helper to record cache metrics
pub fn record_cache(hit: bool, cache_name: &str) {
    if hit {
        counter!(
            format!("{}_cache_hits_total", METRICS_PREFIX),
            "cache" => cache_name.to_string()
        )
        .increment(1);
    } else {
        counter!(
            format!("{}_cache_misses_total", METRICS_PREFIX),
            "cache" => cache_name.to_string()
        )
        .increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_metrics() {
        let metrics = RequestMetrics::start("POST", "/api/v1/chat");
        metrics.finish(200);
        // Just verify it runs without panic
    }

    #[test]
    fn test_record_helpers() {
        record_search(0.05, "hybrid");
        record_embedding("voyage-3.5-lite", 120, true);
        record_sync(1.2, 500, "retail");
        record_cache(true, "embedding_memory");
    }
}
