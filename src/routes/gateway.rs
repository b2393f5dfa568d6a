// ============================================================================
// Gateway Routes
// ============================================================================
//
// Endpoints:
// - POST /api/mivaa/gateway - Process one envelope request
// - fallback               - NOT_FOUND envelope for unknown paths
//
// ============================================================================

use axum::{
    body::Bytes,
    extract::{State, rejection::BytesRejection},
    http::{HeaderMap, Uri},
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use crate::context::AppContext;
use crate::error::GatewayError;

/// POST /api/mivaa/gateway
pub async fn process(
    State(app_context): State<Arc<AppContext>>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    match body {
        Ok(body) => app_context
            .controller
            .handle(&headers, &body)
            .await
            .into_response(),
        Err(rejection) => {
            GatewayError::validation(format!("Unreadable request body: {}", rejection.body_text()))
                .into_response()
        }
    }
}

/// Any path without a route
pub async fn not_found(uri: Uri) -> Response {
    GatewayError::NotFound(uri.path().to_string()).into_response()
}
