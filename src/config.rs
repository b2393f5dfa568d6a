use anyhow::Result;

mod logging;
mod security;
mod upstream;

pub use logging::LoggingConfig;
pub use security::{parse_scopes, AuthConfig, RateLimitConfig};
pub use upstream::{CircuitBreakerConfig, UpstreamConfig};

// ============================================================================
// Configuration Constants
// ============================================================================

const DEFAULT_PORT: u16 = 8080;

/// Largest inbound request body accepted by the processing endpoint
pub const MAX_REQUEST_BODY_SIZE: usize = 10 * 1024 * 1024; // 10 MB

// ============================================================================
// Configuration Structures
// ============================================================================

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub rust_log: String,
    pub upstream: UpstreamConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub rate_limit: RateLimitConfig,
    pub auth: AuthConfig,
    pub logging: LoggingConfig,
    /// Non-fatal problems found while loading; the caller logs them once
    /// tracing is initialised
    pub warnings: Vec<String>,
}

impl Config {
    /// Config with defaults everywhere except the upstream URL
    pub fn new(upstream_base_url: impl Into<String>) -> Self {
        Self {
            port: DEFAULT_PORT,
            rust_log: "info".to_string(),
            upstream: UpstreamConfig::new(upstream_base_url),
            circuit_breaker: CircuitBreakerConfig::default(),
            rate_limit: RateLimitConfig::default(),
            auth: AuthConfig::default(),
            logging: LoggingConfig::default(),
            warnings: Vec::new(),
        }
    }

    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let mut warnings = Vec::new();

        Ok(Self {
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(DEFAULT_PORT),
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            upstream: UpstreamConfig::from_env()?,
            circuit_breaker: CircuitBreakerConfig::from_env(),
            rate_limit: RateLimitConfig::from_env(),
            auth: AuthConfig::from_env(&mut warnings)?,
            logging: LoggingConfig::from_env(&mut warnings),
            warnings,
        })
    }
}
