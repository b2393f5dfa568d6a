// ============================================================================
// Axum Routes Module
// ============================================================================
//
// Structure:
// - mod.rs: Main router assembly and middleware
// - gateway.rs: The processing endpoint
// - health.rs: Health check and metrics endpoints
// - middleware.rs: Request logging, security headers
//
// ============================================================================

mod gateway;
mod health;
mod middleware;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderName, Method, header},
    routing::{get, post},
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::MAX_REQUEST_BODY_SIZE;
use crate::context::AppContext;

/// Create the main application router with all routes
pub fn create_router(app_context: Arc<AppContext>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static("x-api-key"),
            HeaderName::from_static("x-mivaa-api-key"),
            HeaderName::from_static("x-workspace-id"),
        ]);

    Router::new()
        // Liveness and monitoring
        .route("/health", get(health::liveness))
        .route("/metrics", get(health::metrics))
        // Gateway
        .route("/api/mivaa/gateway", post(gateway::process))
        .route("/api/mivaa/health", get(health::upstream_health))
        .fallback(gateway::not_found)
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_SIZE))
        // Apply middleware (order matters - last added runs first)
        .layer(
            ServiceBuilder::new()
                // Tracing layer (outermost - runs first)
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                // Request logging
                .layer(axum::middleware::from_fn(middleware::request_logging))
                // Security headers
                .layer(axum::middleware::from_fn(middleware::add_security_headers))
                .into_inner(),
        )
        .with_state(app_context)
}
