use crate::auth::AuthError;
use crate::envelope::GatewayResponse;
use crate::gateway::forwarder::ForwardError;
use axum::{http::StatusCode, response::IntoResponse};
use serde_json::{Value, json};
use std::time::{Duration, Instant};
use thiserror::Error;

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Every way a gateway request can fail
///
/// Each variant maps to exactly one envelope error code and HTTP status;
/// see `error_code` and `status_code`.
#[derive(Error, Debug)]
pub enum GatewayError {
    // ===== Request Errors =====
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unknown action: {action}")]
    UnknownAction {
        action: String,
        valid_actions: Vec<&'static str>,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    // ===== Authentication & Quota Errors =====
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Rate limit of {limit} requests per {window_secs}s exceeded")]
    RateLimited { limit: u32, window_secs: u64 },

    // ===== Upstream Errors =====
    #[error("Circuit breaker is open, retry after {}s", .retry_after.as_secs())]
    CircuitOpen { retry_after: Duration },

    #[error("Upstream request timed out after {}ms", .timeout.as_millis())]
    Timeout { timeout: Duration },

    #[error("Upstream returned {status}")]
    Upstream { status: u16, body: Value },

    #[error("Upstream connection error: {0}")]
    UpstreamConnection(String),

    #[error("Health check failed: {0}")]
    HealthCheckFailed(Box<GatewayError>),

    // ===== Internal Server Errors =====
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Validation(_) => StatusCode::BAD_REQUEST,
            GatewayError::UnknownAction { .. } | GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::Auth(e) => e.status_code(),
            GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::CircuitOpen { .. } | GatewayError::HealthCheckFailed(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            GatewayError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::Upstream { .. } => StatusCode::BAD_GATEWAY,
            GatewayError::UpstreamConnection(_) | GatewayError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Get error code for programmatic error handling
    pub fn error_code(&self) -> &'static str {
        match self {
            GatewayError::Validation(_) => "VALIDATION_ERROR",
            GatewayError::UnknownAction { .. } => "UNKNOWN_ACTION",
            GatewayError::NotFound(_) => "NOT_FOUND",
            GatewayError::Auth(e) => e.error_code(),
            GatewayError::RateLimited { .. } => "RATE_LIMIT_EXCEEDED",
            GatewayError::CircuitOpen { .. } => "CIRCUIT_OPEN",
            GatewayError::Timeout { .. } => "TIMEOUT",
            GatewayError::Upstream { .. } => "UPSTREAM_ERROR",
            // Same code as an upstream status error; only the HTTP status differs
            GatewayError::UpstreamConnection(_) => "UPSTREAM_ERROR",
            GatewayError::HealthCheckFailed(_) => "HEALTH_CHECK_FAILED",
            GatewayError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Get a user-facing message (internal errors stay opaque)
    pub fn user_message(&self) -> String {
        match self {
            GatewayError::Internal(_) => "Internal server error".to_string(),
            GatewayError::Auth(AuthError::StoreUnavailable(_)) => {
                "Authentication is temporarily unavailable".to_string()
            }
            GatewayError::UnknownAction { action, .. } => {
                format!("Unknown action '{}'", action)
            }
            other => other.to_string(),
        }
    }

    /// Structured context for the envelope's `error.details`
    pub fn details(&self) -> Option<Value> {
        match self {
            GatewayError::UnknownAction { valid_actions, .. } => {
                Some(json!({ "validActions": valid_actions }))
            }
            GatewayError::Auth(e) => e.details(),
            GatewayError::RateLimited { limit, window_secs } => {
                Some(json!({ "limit": limit, "windowSeconds": window_secs }))
            }
            GatewayError::CircuitOpen { retry_after } => {
                Some(json!({ "retryAfterSeconds": (retry_after.as_millis() as u64).div_ceil(1000) }))
            }
            GatewayError::Timeout { timeout } => {
                Some(json!({ "timeoutMs": timeout.as_millis() as u64 }))
            }
            GatewayError::Upstream { status, body } => {
                Some(json!({ "upstreamStatus": status, "upstreamBody": body }))
            }
            GatewayError::HealthCheckFailed(cause) => Some(json!({
                "cause": {
                    "code": cause.error_code(),
                    "message": cause.user_message(),
                    "details": cause.details(),
                }
            })),
            _ => None,
        }
    }

    /// Log this error with appropriate level and context
    pub fn log(&self) {
        let status = self.status_code();
        let code = self.error_code();

        if status.is_server_error() {
            tracing::error!(
                error = %self,
                error_code = %code,
                status = %status.as_u16(),
                "Server error occurred"
            );
        } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            tracing::warn!(
                error = %self,
                error_code = %code,
                "Authentication failed"
            );
        } else {
            tracing::debug!(
                error = %self,
                error_code = %code,
                "Client error occurred"
            );
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> axum::response::Response {
        self.log();
        let status = self.status_code();
        let envelope = GatewayResponse::failure(&self, Instant::now(), None);
        (status, axum::Json(envelope)).into_response()
    }
}

// ============================================================================
// Conversion from forwarding errors
// ============================================================================

impl From<ForwardError> for GatewayError {
    fn from(err: ForwardError) -> Self {
        match err {
            ForwardError::CircuitOpen { retry_after } => GatewayError::CircuitOpen { retry_after },
            ForwardError::Timeout { timeout } => GatewayError::Timeout { timeout },
            ForwardError::Status { status, body } => GatewayError::Upstream { status, body },
            ForwardError::Transport(msg) => GatewayError::UpstreamConnection(msg),
        }
    }
}

// ============================================================================
// Helper functions for creating common errors
// ============================================================================

impl GatewayError {
    pub fn validation(msg: impl Into<String>) -> Self {
        GatewayError::Validation(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        GatewayError::Internal(msg.into())
    }
}
