// ============================================================================
// Health and Metrics Routes
// ============================================================================
//
// Endpoints:
// - GET /health           - Liveness of the gateway process itself
// - GET /api/mivaa/health - Upstream health through the circuit breaker
// - GET /metrics          - Prometheus metrics
//
// ============================================================================

use axum::{
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use crate::context::AppContext;
use crate::error::{GatewayError, GatewayResult};
use crate::metrics;

/// GET /health
pub async fn liveness() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// GET /api/mivaa/health
pub async fn upstream_health(State(app_context): State<Arc<AppContext>>) -> Response {
    app_context.controller.health().await.into_response()
}

/// GET /metrics
///
/// Encoding failures come back as an INTERNAL_ERROR envelope like any other
/// gateway failure.
pub async fn metrics() -> GatewayResult<Response> {
    let body = metrics::gather_metrics()
        .map_err(|e| GatewayError::internal(format!("failed to encode metrics: {}", e)))?;
    Ok(([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], body).into_response())
}
