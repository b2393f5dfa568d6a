use axum::http::HeaderMap;
use sha2::{Digest, Sha256};

/// Salted, truncated hash of a caller identity for log lines.
///
/// Raw identities (token subjects, key ids) never reach the logs; the same
/// identity always hashes to the same 8 hex characters under one salt, so a
/// caller can still be followed across requests.
pub fn log_safe_id(id: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(id.as_bytes());
    let hash = hasher.finalize();

    hash[..4]
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<String>()
}

/// Header value as trimmed UTF-8, `None` when absent, empty or not text
pub fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}
