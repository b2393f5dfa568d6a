// ============================================================================
// Security Configuration
// ============================================================================
//
// Authentication sources and the gateway-wide per-identity rate limit.
//
// ============================================================================

use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_RATE_LIMIT_MAX_REQUESTS: u32 = 200;
const DEFAULT_RATE_LIMIT_WINDOW_SECS: u64 = 60;
const DEFAULT_BEARER_SCOPES: &str = "mivaa:read mivaa:write";

/// Per-identity request quota enforced after authentication
#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    /// Requests allowed per window (default: 200)
    pub max_requests: u32,
    /// Fixed window length (default: 60s)
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: DEFAULT_RATE_LIMIT_MAX_REQUESTS,
            window: Duration::from_secs(DEFAULT_RATE_LIMIT_WINDOW_SECS),
        }
    }
}

impl RateLimitConfig {
    pub(crate) fn from_env() -> Self {
        Self {
            max_requests: std::env::var("RATE_LIMIT_MAX_REQUESTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_RATE_LIMIT_MAX_REQUESTS),
            window: Duration::from_secs(
                std::env::var("RATE_LIMIT_WINDOW_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .filter(|secs| *secs > 0)
                    .unwrap_or(DEFAULT_RATE_LIMIT_WINDOW_SECS),
            ),
        }
    }
}

/// Where API keys and bearer tokens are verified
#[derive(Clone, Debug)]
pub struct AuthConfig {
    /// HS256 secret for bearer tokens
    pub jwt_secret: Option<String>,
    /// RS256 public key (PEM string or path to a PEM file)
    pub jwt_public_key: Option<String>,
    /// Expected `iss` claim; not checked when unset
    pub jwt_issuer: Option<String>,
    /// Scopes granted to tokens that carry no scope claim at all
    pub bearer_default_scopes: Vec<String>,
    /// JSON file seeding the in-memory key store
    pub api_keys_file: Option<PathBuf>,
    /// PostgREST base URL of the key store; takes precedence over the file
    pub key_store_url: Option<String>,
    pub key_store_service_key: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            jwt_public_key: None,
            jwt_issuer: None,
            bearer_default_scopes: parse_scopes(DEFAULT_BEARER_SCOPES),
            api_keys_file: None,
            key_store_url: None,
            key_store_service_key: None,
        }
    }
}

impl AuthConfig {
    pub(crate) fn from_env(warnings: &mut Vec<String>) -> anyhow::Result<Self> {
        let jwt_secret = non_empty_var("JWT_SECRET");
        let jwt_public_key = non_empty_var("JWT_PUBLIC_KEY").map(|key| {
            if key.starts_with("-----BEGIN") {
                // PEM string in environment variable
                key
            } else {
                // File path - read the file
                std::fs::read_to_string(&key).unwrap_or_else(|e| {
                    warnings.push(format!(
                        "Failed to read JWT_PUBLIC_KEY from file {}, using as-is: {}",
                        key, e
                    ));
                    key
                })
            }
        });

        if jwt_secret.is_none() && jwt_public_key.is_none() {
            anyhow::bail!(
                "No bearer token verification configured. Set either:\n\
                - JWT_PUBLIC_KEY (RS256)\n\
                - JWT_SECRET (HS256)"
            );
        }

        Ok(Self {
            jwt_secret,
            jwt_public_key,
            jwt_issuer: non_empty_var("JWT_ISSUER"),
            bearer_default_scopes: parse_scopes(
                &std::env::var("BEARER_DEFAULT_SCOPES")
                    .unwrap_or_else(|_| DEFAULT_BEARER_SCOPES.to_string()),
            ),
            api_keys_file: non_empty_var("API_KEYS_FILE").map(PathBuf::from),
            key_store_url: non_empty_var("KEY_STORE_URL"),
            key_store_service_key: non_empty_var("KEY_STORE_SERVICE_KEY"),
        })
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Split a space- or comma-separated scope list
pub fn parse_scopes(raw: &str) -> Vec<String> {
    raw.split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scopes_accepts_spaces_and_commas() {
        assert_eq!(
            parse_scopes("mivaa:read, mivaa:write  admin"),
            vec!["mivaa:read", "mivaa:write", "admin"]
        );
        assert!(parse_scopes("  ").is_empty());
    }
}
