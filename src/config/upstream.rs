// ============================================================================
// Upstream Configuration
// ============================================================================
//
// The MIVAA service the gateway forwards to, and the circuit breaker that
// guards it.
//
// ============================================================================

use std::time::Duration;

const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 30;
const DEFAULT_HEALTH_CHECK_TIMEOUT_SECS: u64 = 5;
const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
const DEFAULT_RESET_TIMEOUT_SECS: u64 = 60;
const DEFAULT_MONITORING_PERIOD_SECS: u64 = 300;

#[derive(Clone, Debug)]
pub struct UpstreamConfig {
    /// Base URL without trailing slash (e.g., "https://v1api.materialshub.gr")
    pub base_url: String,
    /// Credential sent as `Authorization: Bearer` on every forwarded call
    pub api_key: Option<String>,
    /// Per-call budget for forwarded requests (default: 30s)
    pub timeout: Duration,
    /// Budget for health probes (default: 5s)
    pub health_check_timeout: Duration,
}

impl UpstreamConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
            timeout: Duration::from_secs(DEFAULT_UPSTREAM_TIMEOUT_SECS),
            health_check_timeout: Duration::from_secs(DEFAULT_HEALTH_CHECK_TIMEOUT_SECS),
        }
    }

    pub(crate) fn from_env() -> anyhow::Result<Self> {
        let base_url = std::env::var("MIVAA_GATEWAY_URL")
            .or_else(|_| std::env::var("UPSTREAM_BASE_URL"))
            .map_err(|_| anyhow::anyhow!("MIVAA_GATEWAY_URL (or UPSTREAM_BASE_URL) must be set"))?;

        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            anyhow::bail!("Upstream URL must start with http:// or https://, got {}", base_url);
        }

        let mut config = Self::new(base_url);
        config.api_key = std::env::var("MIVAA_API_KEY")
            .or_else(|_| std::env::var("UPSTREAM_API_KEY"))
            .ok()
            .filter(|k| !k.trim().is_empty());
        config.timeout = Duration::from_secs(
            std::env::var("UPSTREAM_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|secs| *secs > 0)
                .unwrap_or(DEFAULT_UPSTREAM_TIMEOUT_SECS),
        );
        config.health_check_timeout = Duration::from_secs(
            std::env::var("HEALTH_CHECK_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|secs| *secs > 0)
                .unwrap_or(DEFAULT_HEALTH_CHECK_TIMEOUT_SECS),
        );

        Ok(config)
    }
}

/// Circuit breaker configuration for upstream resilience
#[derive(Clone, Debug)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit (default: 5)
    pub failure_threshold: u32,
    /// Cool-down before a probe call is admitted (default: 60s)
    pub reset_timeout: Duration,
    /// Reserved for failure-rate windowing. The consecutive-failure policy
    /// does not read it; it is accepted so existing deployments keep parsing.
    pub monitoring_period: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            reset_timeout: Duration::from_secs(DEFAULT_RESET_TIMEOUT_SECS),
            monitoring_period: Duration::from_secs(DEFAULT_MONITORING_PERIOD_SECS),
        }
    }
}

impl CircuitBreakerConfig {
    pub(crate) fn from_env() -> Self {
        Self {
            failure_threshold: std::env::var("CIRCUIT_BREAKER_FAILURE_THRESHOLD")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(DEFAULT_FAILURE_THRESHOLD),
            reset_timeout: Duration::from_secs(
                std::env::var("CIRCUIT_BREAKER_RESET_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_RESET_TIMEOUT_SECS),
            ),
            monitoring_period: Duration::from_secs(
                std::env::var("CIRCUIT_BREAKER_MONITORING_PERIOD_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_MONITORING_PERIOD_SECS),
            ),
        }
    }
}
