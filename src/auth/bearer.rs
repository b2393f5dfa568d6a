use super::{
    AuthContext, AuthError, AuthMethod, AuthRequest, Authenticator, WORKSPACE_HEADER,
    looks_like_api_key,
};
use crate::utils::header_str;
use async_trait::async_trait;
use axum::http::header::AUTHORIZATION;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Claims the gateway needs out of a verified token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedToken {
    pub subject: String,
    pub workspace_id: Option<String>,
    /// `None` when the token carries no scope claim at all
    pub scopes: Option<Vec<String>>,
}

/// Validates bearer tokens (signature, expiry, issuer)
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> anyhow::Result<VerifiedToken>;
}

/// Bearer token scheme
pub struct BearerTokenAuthenticator {
    verifier: Arc<dyn TokenVerifier>,
    default_scopes: Vec<String>,
}

impl BearerTokenAuthenticator {
    pub fn new(verifier: Arc<dyn TokenVerifier>, default_scopes: Vec<String>) -> Self {
        Self {
            verifier,
            default_scopes,
        }
    }
}

#[async_trait]
impl Authenticator for BearerTokenAuthenticator {
    fn method(&self) -> AuthMethod {
        AuthMethod::BearerToken
    }

    async fn attempt(&self, request: &AuthRequest<'_>) -> Result<AuthContext, AuthError> {
        let token = header_str(request.headers, AUTHORIZATION.as_str())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::NotPresent)?;

        // Key-shaped bearer values belong to the API key scheme
        if looks_like_api_key(token) {
            return Err(AuthError::NotPresent);
        }

        let verified = self
            .verifier
            .verify(token)
            .await
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;

        let scopes: BTreeSet<String> = verified
            .scopes
            .unwrap_or_else(|| self.default_scopes.clone())
            .into_iter()
            .collect();

        let missing: Vec<String> = request
            .required_scopes
            .iter()
            .filter(|s| !scopes.contains(**s))
            .map(|s| s.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(AuthError::InsufficientScope { missing });
        }

        let workspace_id = header_str(request.headers, WORKSPACE_HEADER)
            .map(str::to_string)
            .or(verified.workspace_id);
        if request.workspace_required && workspace_id.is_none() {
            return Err(AuthError::WorkspaceRequired);
        }

        Ok(AuthContext {
            identity_id: verified.subject,
            workspace_id,
            auth_method: AuthMethod::BearerToken,
            scopes,
        })
    }
}
