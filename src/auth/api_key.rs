use super::{AuthContext, AuthError, AuthMethod, AuthRequest, Authenticator, KeyStore};
use crate::gateway::rate_limiter::RateLimiter;
use crate::utils::header_str;
use async_trait::async_trait;
use axum::http::{HeaderMap, header::AUTHORIZATION};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

/// Every workspace API key starts with this
pub const API_KEY_PREFIX: &str = "mk_";
const MIN_KEY_BODY_LEN: usize = 16;

/// Scopes granted to every valid API key
pub const API_KEY_SCOPES: &[&str] = &["mivaa:read", "mivaa:write"];

const KEY_RATE_WINDOW: Duration = Duration::from_secs(60);

pub fn looks_like_api_key(value: &str) -> bool {
    value
        .strip_prefix(API_KEY_PREFIX)
        .map(|body| {
            body.len() >= MIN_KEY_BODY_LEN
                && body
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        })
        .unwrap_or(false)
}

enum KeyCandidate<'a> {
    Absent,
    Malformed,
    Key(&'a str),
}

/// Candidate key from the request headers, in precedence order
fn extract_key(headers: &HeaderMap) -> KeyCandidate<'_> {
    // A bearer value only counts as a key when it has the key shape;
    // anything else is left to the token scheme.
    if let Some(token) = header_str(headers, AUTHORIZATION.as_str())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
    {
        if looks_like_api_key(token) {
            return KeyCandidate::Key(token);
        }
    }

    for name in ["x-api-key", "x-mivaa-api-key"] {
        if let Some(value) = header_str(headers, name) {
            return if looks_like_api_key(value) {
                KeyCandidate::Key(value)
            } else {
                KeyCandidate::Malformed
            };
        }
    }

    KeyCandidate::Absent
}

/// Origin check against a key's allow-list.
///
/// Entries are exact origins, `*`, or patterns with `*` standing for exactly
/// one host label (`https://*.example.com`). An empty list allows everything.
pub fn origin_allowed(origin: &str, allowed: &[String]) -> bool {
    if allowed.is_empty() {
        return true;
    }
    let origin = origin.trim_end_matches('/');
    allowed
        .iter()
        .any(|pattern| pattern_matches(pattern.trim_end_matches('/'), origin))
}

fn pattern_matches(pattern: &str, origin: &str) -> bool {
    if pattern == "*" || pattern.eq_ignore_ascii_case(origin) {
        return true;
    }
    if !pattern.contains('*') {
        return false;
    }

    let (Some((p_scheme, p_host)), Some((o_scheme, o_host))) =
        (pattern.split_once("://"), origin.split_once("://"))
    else {
        return false;
    };
    if !p_scheme.eq_ignore_ascii_case(o_scheme) {
        return false;
    }

    let p_labels: Vec<&str> = p_host.split('.').collect();
    let o_labels: Vec<&str> = o_host.split('.').collect();
    p_labels.len() == o_labels.len()
        && p_labels
            .iter()
            .zip(&o_labels)
            .all(|(p, o)| (*p == "*" && !o.is_empty()) || p.eq_ignore_ascii_case(o))
}

/// Workspace API key scheme
pub struct ApiKeyAuthenticator {
    store: Arc<dyn KeyStore>,
    limiter: Arc<RateLimiter>,
}

impl ApiKeyAuthenticator {
    pub fn new(store: Arc<dyn KeyStore>, limiter: Arc<RateLimiter>) -> Self {
        Self { store, limiter }
    }
}

#[async_trait]
impl Authenticator for ApiKeyAuthenticator {
    fn method(&self) -> AuthMethod {
        AuthMethod::ApiKey
    }

    async fn attempt(&self, request: &AuthRequest<'_>) -> Result<AuthContext, AuthError> {
        let raw_key = match extract_key(request.headers) {
            KeyCandidate::Absent => return Err(AuthError::NotPresent),
            KeyCandidate::Malformed => return Err(AuthError::InvalidApiKey),
            KeyCandidate::Key(key) => key,
        };

        let record = self
            .store
            .find_by_key(raw_key)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "API key lookup failed");
                AuthError::StoreUnavailable(e.to_string())
            })?
            .ok_or(AuthError::InvalidApiKey)?;

        if !record.is_active {
            return Err(AuthError::KeyInactive);
        }
        if let Some(expires_at) = record.expires_at {
            if expires_at < Utc::now() {
                return Err(AuthError::KeyExpired(expires_at));
            }
        }
        if let Some(origin) = request.origin {
            if !origin_allowed(origin, &record.allowed_origins) {
                return Err(AuthError::OriginNotAllowed {
                    origin: origin.to_string(),
                });
            }
        }

        let limit_key = format!("api_key:{}", record.key_id);
        if !self
            .limiter
            .check(&limit_key, record.rate_limit_per_minute, KEY_RATE_WINDOW)
            .await
        {
            return Err(AuthError::KeyRateLimited {
                limit: record.rate_limit_per_minute,
            });
        }

        let store = self.store.clone();
        let key_id = record.key_id.clone();
        tokio::spawn(async move {
            if let Err(e) = store.record_usage(&key_id).await {
                tracing::warn!(error = %e, "Failed to record API key usage");
            }
        });

        Ok(AuthContext {
            identity_id: format!("api_key:{}", record.key_id),
            workspace_id: Some(record.workspace_id),
            auth_method: AuthMethod::ApiKey,
            scopes: API_KEY_SCOPES.iter().map(|s| s.to_string()).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{ApiKeyRecord, InMemoryKeyStore};
    use crate::gateway::rate_limiter::RateLimitWindow;
    use crate::gateway::store::InMemoryStore;

    const KEY: &str = "mk_live_0123456789abcdef";

    fn record() -> ApiKeyRecord {
        ApiKeyRecord {
            key_id: "key-1".to_string(),
            raw_key: KEY.to_string(),
            workspace_id: "ws-1".to_string(),
            is_active: true,
            expires_at: None,
            allowed_origins: vec![],
            rate_limit_per_minute: 100,
        }
    }

    fn authenticator(record: ApiKeyRecord) -> (ApiKeyAuthenticator, Arc<InMemoryKeyStore>) {
        let store = Arc::new(InMemoryKeyStore::new(vec![record]));
        let limiter = Arc::new(RateLimiter::new(Arc::new(
            InMemoryStore::<RateLimitWindow>::new(),
        )));
        (ApiKeyAuthenticator::new(store.clone(), limiter), store)
    }

    fn headers(name: &str, value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::HeaderName::from_bytes(name.as_bytes()).unwrap(),
            value.parse().unwrap(),
        );
        headers
    }

    async fn attempt(
        auth: &ApiKeyAuthenticator,
        headers: &HeaderMap,
        origin: Option<&str>,
    ) -> Result<AuthContext, AuthError> {
        auth.attempt(&AuthRequest {
            headers,
            origin,
            required_scopes: &[],
            workspace_required: false,
        })
        .await
    }

    #[test]
    fn test_key_shape() {
        assert!(looks_like_api_key(KEY));
        assert!(!looks_like_api_key("mk_short"));
        assert!(!looks_like_api_key("eyJhbGciOiJIUzI1NiJ9.eyJzdWIiOiIxIn0.sig"));
        assert!(!looks_like_api_key("mk_0123456789abcdef!!"));
    }

    #[test]
    fn test_origin_patterns() {
        let allowed = vec!["https://*.example.com".to_string(), "http://localhost:3000".to_string()];
        assert!(origin_allowed("https://app.example.com", &allowed));
        assert!(origin_allowed("http://localhost:3000/", &allowed));
        assert!(!origin_allowed("https://example.com", &allowed));
        assert!(!origin_allowed("https://a.b.example.com", &allowed));
        assert!(!origin_allowed("http://app.example.com", &allowed));
        assert!(origin_allowed("https://anything.test", &[]));
        assert!(origin_allowed("https://anything.test", &["*".to_string()]));
    }

    #[tokio::test]
    async fn test_valid_key_in_each_header() {
        let (auth, store) = authenticator(record());

        for (name, value) in [
            ("authorization", format!("Bearer {}", KEY)),
            ("x-api-key", KEY.to_string()),
            ("x-mivaa-api-key", KEY.to_string()),
        ] {
            let ctx = attempt(&auth, &headers(name, &value), None).await.unwrap();
            assert_eq!(ctx.identity_id, "api_key:key-1");
            assert_eq!(ctx.workspace_id.as_deref(), Some("ws-1"));
            assert_eq!(ctx.auth_method, AuthMethod::ApiKey);
            assert!(ctx.has_scope("mivaa:read"));
            assert!(ctx.has_scope("mivaa:write"));
        }

        // Usage is recorded off the request path
        tokio::task::yield_now().await;
        for _ in 0..10 {
            if store.usage("key-1") == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(store.usage("key-1"), 3);
    }

    #[tokio::test]
    async fn test_non_key_bearer_is_not_present() {
        let (auth, _) = authenticator(record());
        let err = attempt(&auth, &headers("authorization", "Bearer eyJ.abc.def"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::NotPresent));

        let err = attempt(&auth, &HeaderMap::new(), None).await.unwrap_err();
        assert!(matches!(err, AuthError::NotPresent));
    }

    #[tokio::test]
    async fn test_unknown_or_malformed_key_is_invalid() {
        let (auth, _) = authenticator(record());
        let err = attempt(&auth, &headers("x-api-key", "mk_live_ffffffffffffffff"), None)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_API_KEY");

        let err = attempt(&auth, &headers("x-api-key", "not-a-key"), None)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_API_KEY");
    }

    #[tokio::test]
    async fn test_inactive_and_expired_keys() {
        let mut inactive = record();
        inactive.is_active = false;
        let (auth, _) = authenticator(inactive);
        let err = attempt(&auth, &headers("x-api-key", KEY), None).await.unwrap_err();
        assert_eq!(err.error_code(), "KEY_INACTIVE");

        let mut expired = record();
        expired.expires_at = Some(Utc::now() - chrono::Duration::hours(1));
        let (auth, _) = authenticator(expired);
        let err = attempt(&auth, &headers("x-api-key", KEY), None).await.unwrap_err();
        assert_eq!(err.error_code(), "KEY_EXPIRED");
        assert!(err.to_string().contains("expired"));
    }

    #[tokio::test]
    async fn test_origin_restriction() {
        let mut restricted = record();
        restricted.allowed_origins = vec!["https://*.materialshub.gr".to_string()];
        let (auth, _) = authenticator(restricted);
        let headers = headers("x-api-key", KEY);

        assert!(attempt(&auth, &headers, Some("https://app.materialshub.gr")).await.is_ok());
        assert!(attempt(&auth, &headers, None).await.is_ok());
        let err = attempt(&auth, &headers, Some("https://evil.example.com"))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "ORIGIN_NOT_ALLOWED");
    }

    #[tokio::test]
    async fn test_per_key_rate_limit() {
        let mut limited = record();
        limited.rate_limit_per_minute = 2;
        let (auth, _) = authenticator(limited);
        let headers = headers("x-api-key", KEY);

        assert!(attempt(&auth, &headers, None).await.is_ok());
        assert!(attempt(&auth, &headers, None).await.is_ok());
        let err = attempt(&auth, &headers, None).await.unwrap_err();
        assert_eq!(err.error_code(), "RATE_LIMIT_EXCEEDED");
    }

    /// Finds the key but cannot record usage
    struct BrokenUsageStore {
        record: ApiKeyRecord,
        hang: bool,
        usage_calls: std::sync::atomic::AtomicU32,
    }

    #[async_trait]
    impl KeyStore for BrokenUsageStore {
        async fn find_by_key(&self, raw_key: &str) -> anyhow::Result<Option<ApiKeyRecord>> {
            Ok((raw_key == self.record.raw_key).then(|| self.record.clone()))
        }

        async fn record_usage(&self, _key_id: &str) -> anyhow::Result<()> {
            self.usage_calls
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if self.hang {
                std::future::pending::<()>().await;
            }
            Err(anyhow::anyhow!("usage table unavailable"))
        }
    }

    #[tokio::test]
    async fn test_usage_failure_does_not_fail_resolution() {
        for hang in [false, true] {
            let store = Arc::new(BrokenUsageStore {
                record: record(),
                hang,
                usage_calls: std::sync::atomic::AtomicU32::new(0),
            });
            let limiter = Arc::new(RateLimiter::new(Arc::new(
                InMemoryStore::<RateLimitWindow>::new(),
            )));
            let auth = ApiKeyAuthenticator::new(store.clone(), limiter);

            let ctx = tokio::time::timeout(
                Duration::from_secs(1),
                attempt(&auth, &headers("x-api-key", KEY), None),
            )
            .await
            .expect("resolution waited on usage recording")
            .unwrap();
            assert_eq!(ctx.auth_method, AuthMethod::ApiKey);
            assert_eq!(ctx.identity_id, "api_key:key-1");

            for _ in 0..10 {
                if store.usage_calls.load(std::sync::atomic::Ordering::SeqCst) == 1 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            assert_eq!(store.usage_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        }
    }
}
