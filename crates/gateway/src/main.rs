//! Atabot API Gateway
//!
//! The single entry point for the service. Hosts:
//! - The chat surface (plain and SSE streaming)
//! - Schema management and sync endpoints
//! - Health, readiness and metrics probes
//! - The background embedding queue worker and cache flush task

mod handlers;
mod middleware;
mod state;

use axum::{
    routing::{delete, get, post},
    Router,
};
use atabot_common::{config::AppConfig, db, db::DbPool, metrics};
use metrics_exporter_prometheus::PrometheusBuilder;
use state::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_target(true)
        .init();

    info!("Starting Atabot Gateway v{}", atabot_common::VERSION);

    // Load configuration
    let config = AppConfig::load().map_err(|e| {
        tracing::error!(error = %e, "Failed to load configuration");
        e
    })?;
    let config = Arc::new(config);

    // Initialize metrics
    let metrics_handle = PrometheusBuilder::new().install_recorder()?;
    metrics::register_metrics();

    // Initialize database and bootstrap the storage schema
    let pool = DbPool::new(&config.database).await?;
    db::ensure_storage(&pool, config.embedding.dimension).await?;
    if !pool.check_vector_extension().await? {
        tracing::error!("pgvector extension is not installed on this database");
    }

    // Build the application context (components in dependency order)
    let state = AppState::build(config.clone(), pool, metrics_handle).await?;

    // Optional realtime change listener
    if config.features.realtime_sync {
        handlers::sync::spawn_realtime_listener(state.clone());
    }

    // Build the router and serve
    let app = create_router(state.clone());
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Reverse-order teardown
    state.shutdown().await;
    info!("Server shutdown complete");
    Ok(())
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    // CORS configuration from the allowlist
    let cors = if state.config.cors.allow_origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = state
            .config
            .cors
            .allow_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any)
    };

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    // API routes
    let api_routes = Router::new()
        // Chat endpoints
        .route("/chat", post(handlers::chat::chat))
        .route("/chat/stream", post(handlers::chat::chat_stream))
        .route("/chat/history/{session_id}", get(handlers::chat::history))
        .route(
            "/chat/history/{session_id}",
            delete(handlers::chat::clear_history),
        )
        // Schema endpoints
        .route("/schemas", get(handlers::schemas::list_schemas))
        .route("/schemas/{name}/tables", get(handlers::schemas::tables))
        .route("/schemas/{name}/analyze", post(handlers::schemas::analyze))
        .route("/schemas/{name}/activate", post(handlers::schemas::activate))
        .route("/schemas/{name}", delete(handlers::schemas::remove))
        // Sync endpoints
        .route("/sync", post(handlers::sync::start_sync))
        .route("/sync/status", get(handlers::sync::status))
        .route("/sync/jobs", get(handlers::sync::jobs))
        .route("/sync/jobs/{id}", get(handlers::sync::job))
        .route("/sync/cache", delete(handlers::sync::clear_cache))
        .route(
            "/sync/realtime/{schema}/{table}",
            post(handlers::sync::enable_realtime),
        );

    // Health endpoints live outside the versioned prefix
    let router = Router::new()
        .nest("/api/v1", api_routes)
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        .route("/live", get(handlers::health::live))
        .route("/metrics", get(handlers::health::metrics));

    let router = if state.config.rate_limit.enabled {
        let limiter = middleware::rate_limit::create_rate_limiter(
            state.config.rate_limit.requests_per_second,
            state.config.rate_limit.burst,
        );
        router.layer(axum::middleware::from_fn(move |request, next| {
            let limiter = limiter.clone();
            async move {
                middleware::rate_limit::rate_limit_middleware(request, next, limiter).await
            }
        }))
    } else {
        router
    };

    router
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(request_id)
        .layer(propagate_id)
        .with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}
