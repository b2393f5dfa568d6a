// ============================================================================
// Axum Middleware
// ============================================================================
//
// - request_logging: One line per request; the level follows the status
//   class so failing traffic stands out at the default filter
// - add_security_headers: Hardening headers on every response
//
// ============================================================================

use axum::{
    extract::Request,
    http::{HeaderValue, header},
    middleware::Next,
    response::Response,
};
use std::time::Instant;

/// Probe and scrape endpoints, logged at debug only
const QUIET_PATHS: &[&str] = &["/health", "/metrics"];

pub async fn request_logging(req: Request, next: Next) -> Response {
    let started = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = next.run(req).await;

    let status = response.status().as_u16();
    let elapsed_ms = started.elapsed().as_millis() as u64;

    match status {
        500.. => tracing::error!(%method, %path, status, elapsed_ms, "Request failed"),
        400..=499 => tracing::warn!(%method, %path, status, elapsed_ms, "Request rejected"),
        _ if QUIET_PATHS.contains(&path.as_str()) => {
            tracing::debug!(%method, %path, status, elapsed_ms, "Request served")
        }
        _ => tracing::info!(%method, %path, status, elapsed_ms, "Request served"),
    }

    response
}

/// Add security headers to responses
pub async fn add_security_headers(req: Request, next: Next) -> Response {
    let is_https = req
        .headers()
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == "https")
        .unwrap_or(false);

    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    if is_https {
        headers.insert(
            header::STRICT_TRANSPORT_SECURITY,
            HeaderValue::from_static("max-age=31536000; includeSubDomains"),
        );
    }

    response
}
