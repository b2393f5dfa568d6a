// ============================================================================
// Logging Configuration
// ============================================================================

const DEFAULT_HASH_SALT: &str = "mivaa-gateway";

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    /// Salt for hashing identities before they reach the logs
    pub hash_salt: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            hash_salt: DEFAULT_HASH_SALT.to_string(),
        }
    }
}

impl LoggingConfig {
    pub(crate) fn from_env(warnings: &mut Vec<String>) -> Self {
        let hash_salt = std::env::var("LOG_HASH_SALT")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| {
                warnings.push("LOG_HASH_SALT not set, using the built-in salt".to_string());
                DEFAULT_HASH_SALT.to_string()
            });
        Self { hash_salt }
    }
}
