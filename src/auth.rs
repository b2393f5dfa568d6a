// ============================================================================
// Authentication
// ============================================================================
//
// Two credential schemes are tried in a fixed order until one succeeds:
//   1. API key   (Authorization: Bearer mk_..., x-api-key, x-mivaa-api-key)
//   2. Bearer token (JWT, verified locally)
//
// Each scheme either produces an AuthContext or fails with its own reason.
// A scheme that finds no credentials of its kind fails with `NotPresent`,
// which the resolver uses to pick the most useful aggregate error:
//   - nothing presented at all      -> MISSING_AUTH
//   - exactly one scheme had creds  -> that scheme's own error
//   - both had creds, both failed   -> AUTHENTICATION_FAILED (both reasons)
//
// ============================================================================

mod api_key;
mod bearer;
mod jwt;
mod key_store;

pub use api_key::{ApiKeyAuthenticator, API_KEY_PREFIX, API_KEY_SCOPES, looks_like_api_key, origin_allowed};
pub use bearer::{BearerTokenAuthenticator, TokenVerifier, VerifiedToken};
pub use jwt::{Claims, JwtVerifier};
pub use key_store::{ApiKeyRecord, InMemoryKeyStore, KeyStore, RestKeyStore};

use async_trait::async_trait;
use axum::http::{HeaderMap, StatusCode};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Header carrying the caller's workspace for bearer-token requests
pub const WORKSPACE_HEADER: &str = "x-workspace-id";

// ============================================================================
// Auth context
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    ApiKey,
    BearerToken,
}

impl AuthMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::ApiKey => "api_key",
            AuthMethod::BearerToken => "bearer_token",
        }
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a successful authentication
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    /// Stable caller identity, also the rate-limit key
    pub identity_id: String,
    pub workspace_id: Option<String>,
    pub auth_method: AuthMethod,
    pub scopes: BTreeSet<String>,
}

impl AuthContext {
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.contains(scope)
    }
}

/// What an authenticator gets to look at
pub struct AuthRequest<'a> {
    pub headers: &'a HeaderMap,
    /// `Origin` header, when the caller sent one
    pub origin: Option<&'a str>,
    /// Scopes the requested action needs
    pub required_scopes: &'a [&'a str],
    /// Whether the requested action must run inside a workspace
    pub workspace_required: bool,
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthError {
    /// The scheme found no credentials of its kind
    #[error("no credentials presented")]
    NotPresent,

    #[error("Invalid API key")]
    InvalidApiKey,

    #[error("API key is inactive")]
    KeyInactive,

    #[error("API key expired at {0}")]
    KeyExpired(DateTime<Utc>),

    #[error("Origin {origin} is not allowed for this API key")]
    OriginNotAllowed { origin: String },

    #[error("API key rate limit of {limit} requests per minute exceeded")]
    KeyRateLimited { limit: u32 },

    #[error("Invalid bearer token: {0}")]
    InvalidToken(String),

    #[error("Missing required scopes: {}", .missing.join(", "))]
    InsufficientScope { missing: Vec<String> },

    #[error("A workspace id is required for this action (send the x-workspace-id header)")]
    WorkspaceRequired,

    #[error("Credential store unavailable: {0}")]
    StoreUnavailable(String),

    /// Every scheme failed
    #[error("{}", aggregate_message(.0))]
    Aggregate(Vec<(AuthMethod, AuthError)>),
}

fn aggregate_message(failures: &[(AuthMethod, AuthError)]) -> String {
    let presented: Vec<_> = failures
        .iter()
        .filter(|(_, e)| !matches!(e, AuthError::NotPresent))
        .collect();

    match presented.as_slice() {
        [] => "Authentication required: provide an API key or a bearer token".to_string(),
        [(_, only)] => only.to_string(),
        many => {
            let reasons: Vec<String> = many
                .iter()
                .map(|(method, e)| format!("{}: {}", method, e))
                .collect();
            format!("Authentication failed ({})", reasons.join("; "))
        }
    }
}

impl AuthError {
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::NotPresent => "MISSING_AUTH",
            AuthError::InvalidApiKey => "INVALID_API_KEY",
            AuthError::KeyInactive => "KEY_INACTIVE",
            AuthError::KeyExpired(_) => "KEY_EXPIRED",
            AuthError::OriginNotAllowed { .. } => "ORIGIN_NOT_ALLOWED",
            AuthError::KeyRateLimited { .. } => "RATE_LIMIT_EXCEEDED",
            AuthError::InvalidToken(_) => "INVALID_TOKEN",
            AuthError::InsufficientScope { .. } => "INSUFFICIENT_SCOPE",
            AuthError::WorkspaceRequired => "WORKSPACE_REQUIRED",
            AuthError::StoreUnavailable(_) => "INTERNAL_ERROR",
            AuthError::Aggregate(failures) => match presented(failures).as_slice() {
                [] => "MISSING_AUTH",
                [only] => only.error_code(),
                _ => "AUTHENTICATION_FAILED",
            },
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::NotPresent
            | AuthError::InvalidApiKey
            | AuthError::KeyInactive
            | AuthError::KeyExpired(_)
            | AuthError::InvalidToken(_) => StatusCode::UNAUTHORIZED,
            AuthError::OriginNotAllowed { .. } | AuthError::InsufficientScope { .. } => {
                StatusCode::FORBIDDEN
            }
            AuthError::KeyRateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AuthError::WorkspaceRequired => StatusCode::BAD_REQUEST,
            AuthError::StoreUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AuthError::Aggregate(failures) => match presented(failures).as_slice() {
                [] => StatusCode::UNAUTHORIZED,
                [only] => only.status_code(),
                _ => StatusCode::UNAUTHORIZED,
            },
        }
    }

    /// Structured per-scheme reasons for the response envelope
    pub fn details(&self) -> Option<Value> {
        match self {
            AuthError::KeyExpired(at) => Some(json!({ "expiredAt": at.to_rfc3339() })),
            AuthError::InsufficientScope { missing } => Some(json!({ "missingScopes": missing })),
            AuthError::KeyRateLimited { limit } => Some(json!({ "limitPerMinute": limit })),
            AuthError::Aggregate(failures) if presented(failures).len() < 2 => {
                presented(failures).first().and_then(|only| only.details())
            }
            AuthError::Aggregate(failures) => {
                let mut reasons = serde_json::Map::new();
                for (method, e) in failures {
                    reasons.insert(
                        method.as_str().to_string(),
                        json!({ "code": e.error_code(), "message": e.to_string() }),
                    );
                }
                Some(json!({ "attempts": reasons }))
            }
            _ => None,
        }
    }
}

fn presented(failures: &[(AuthMethod, AuthError)]) -> Vec<&AuthError> {
    failures
        .iter()
        .map(|(_, e)| e)
        .filter(|e| !matches!(e, AuthError::NotPresent))
        .collect()
}

// ============================================================================
// Authenticators
// ============================================================================

/// One credential scheme
#[async_trait]
pub trait Authenticator: Send + Sync {
    fn method(&self) -> AuthMethod;

    async fn attempt(&self, request: &AuthRequest<'_>) -> Result<AuthContext, AuthError>;
}

/// Tries each authenticator in order, first success wins
pub struct AuthResolver {
    authenticators: Vec<Arc<dyn Authenticator>>,
}

impl AuthResolver {
    pub fn new(authenticators: Vec<Arc<dyn Authenticator>>) -> Self {
        Self { authenticators }
    }

    pub async fn resolve(&self, request: &AuthRequest<'_>) -> Result<AuthContext, AuthError> {
        let mut failures = Vec::with_capacity(self.authenticators.len());

        for authenticator in &self.authenticators {
            match authenticator.attempt(request).await {
                Ok(context) => return Ok(context),
                Err(e) => {
                    if !matches!(e, AuthError::NotPresent) {
                        tracing::debug!(
                            method = %authenticator.method(),
                            error_code = e.error_code(),
                            error = %e,
                            "Authentication scheme rejected credentials"
                        );
                    }
                    failures.push((authenticator.method(), e));
                }
            }
        }

        Err(AuthError::Aggregate(failures))
    }
}
