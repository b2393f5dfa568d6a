// ============================================================================
// Request Forwarder
// ============================================================================
//
// HTTP client for the MIVAA upstream.
// Handles:
// - URL building (base URL + rendered endpoint path + query)
// - Header injection (caller identity, upstream credential)
// - Per-call timeout
// - Circuit breaker around every call
//
// Breaker accounting:
// - transport errors, timeouts and 5xx count as failures
// - 2xx/3xx and 4xx count as successes (a 4xx is the caller's problem),
//   but a 4xx is still reported to the caller as an upstream error
//
// ============================================================================

use crate::config::{CircuitBreakerConfig, UpstreamConfig};
use crate::envelope::HttpMethod;
use crate::gateway::circuit_breaker::{
    CircuitBreaker, CircuitBreakerError, CircuitSnapshot,
};
use crate::gateway::store::StateStore;
use crate::metrics;
use anyhow::{Context, Result};
use reqwest::header::{HeaderName, HeaderValue};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

/// Caller-supplied headers that never pass through
const RESERVED_HEADERS: &[&str] = &[
    "host",
    "authorization",
    "content-length",
    "content-type",
    "connection",
    "transfer-encoding",
    "x-user-id",
    "x-workspace-id",
];

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("circuit open, retry after {}s", .retry_after.as_secs())]
    CircuitOpen { retry_after: Duration },

    #[error("timed out after {}ms", .timeout.as_millis())]
    Timeout { timeout: Duration },

    #[error("upstream returned {status}")]
    Status { status: u16, body: Value },

    #[error("transport error: {0}")]
    Transport(String),
}

/// Identity headers attached to forwarded calls
#[derive(Debug, Clone)]
pub struct CallerIdentity {
    pub identity_id: String,
    pub workspace_id: Option<String>,
}

/// One upstream call
#[derive(Debug, Clone)]
pub struct ForwardRequest<'a> {
    /// Rendered endpoint path (leading slash)
    pub path: &'a str,
    pub method: HttpMethod,
    pub headers: &'a HashMap<String, String>,
    pub body: Option<&'a Value>,
    pub query: &'a [(String, String)],
    pub caller: Option<&'a CallerIdentity>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: u16,
    pub body: Value,
    /// Full URL that was called
    pub url: String,
}

pub struct RequestForwarder {
    client: reqwest::Client,
    config: UpstreamConfig,
    breaker: CircuitBreaker,
}

impl RequestForwarder {
    pub fn new(
        config: UpstreamConfig,
        breaker_config: Arc<CircuitBreakerConfig>,
        breaker_store: Arc<dyn StateStore<CircuitSnapshot>>,
    ) -> Result<Self> {
        // Per-call budgets are enforced around each request, not on the client
        let client = reqwest::Client::builder()
            .tcp_keepalive(Duration::from_secs(30))
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .context("Failed to create HTTP client")?;

        // One breaker per upstream host
        let site = reqwest::Url::parse(&config.base_url)
            .with_context(|| format!("Invalid upstream URL {}", config.base_url))?
            .host_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("Upstream URL {} has no host", config.base_url))?;

        Ok(Self {
            client,
            breaker: CircuitBreaker::new(breaker_config, breaker_store, site),
            config,
        })
    }

    pub fn config(&self) -> &UpstreamConfig {
        &self.config
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn endpoint_url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    /// Forward one call through the circuit breaker
    pub async fn forward(
        &self,
        request: ForwardRequest<'_>,
    ) -> Result<UpstreamResponse, ForwardError> {
        let url = self.endpoint_url(request.path);
        let started = Instant::now();

        let result = self.breaker.execute(|| self.send(&url, &request)).await;

        let outcome = match &result {
            Ok(r) if (200..400).contains(&r.status) => "success",
            Ok(_) => "client_error",
            Err(CircuitBreakerError::Open { .. }) => "rejected",
            Err(CircuitBreakerError::Inner(ForwardError::Timeout { .. })) => "timeout",
            Err(CircuitBreakerError::Inner(_)) => "error",
        };
        metrics::UPSTREAM_REQUEST_DURATION
            .with_label_values(&[outcome])
            .observe(started.elapsed().as_secs_f64());

        match result {
            Ok(response) if (200..400).contains(&response.status) => Ok(response),
            Ok(response) => {
                debug!(status = response.status, url = %url, "Upstream rejected request");
                Err(ForwardError::Status {
                    status: response.status,
                    body: response.body,
                })
            }
            Err(CircuitBreakerError::Open { retry_after }) => {
                warn!(
                    site = %self.breaker.site(),
                    retry_after_secs = retry_after.as_secs(),
                    "Circuit breaker is open, rejecting request"
                );
                Err(ForwardError::CircuitOpen { retry_after })
            }
            Err(CircuitBreakerError::Inner(e)) => {
                warn!(url = %url, error = %e, "Upstream call failed");
                Err(e)
            }
        }
    }

    /// Upstream health probe (GET /health) with the health-check budget
    pub async fn check_health(&self) -> Result<UpstreamResponse, ForwardError> {
        let no_headers = HashMap::new();
        self.forward(ForwardRequest {
            path: "/health",
            method: HttpMethod::Get,
            headers: &no_headers,
            body: None,
            query: &[],
            caller: None,
            timeout: self.config.health_check_timeout,
        })
        .await
    }

    /// Single attempt; 5xx comes back as an error so the breaker counts it
    async fn send(
        &self,
        url: &str,
        request: &ForwardRequest<'_>,
    ) -> Result<UpstreamResponse, ForwardError> {
        let mut builder = self
            .client
            .request(request.method.to_reqwest(), url)
            .header(reqwest::header::ACCEPT, "application/json");

        for (name, value) in request.headers {
            let lower = name.to_ascii_lowercase();
            if RESERVED_HEADERS.contains(&lower.as_str()) {
                continue;
            }
            match (
                HeaderName::from_bytes(lower.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => builder = builder.header(name, value),
                _ => debug!(header = %name, "Skipping invalid caller header"),
            }
        }

        if let Some(caller) = request.caller {
            builder = builder.header("x-user-id", &caller.identity_id);
            if let Some(workspace_id) = &caller.workspace_id {
                builder = builder.header("x-workspace-id", workspace_id);
            }
        }
        if let Some(api_key) = &self.config.api_key {
            builder = builder.bearer_auth(api_key);
        }
        if !request.query.is_empty() {
            builder = builder.query(request.query);
        }
        if request.method.has_body() {
            let empty = Value::Object(Default::default());
            builder = builder.json(request.body.unwrap_or(&empty));
        }

        let call = async {
            let response = builder.send().await?;
            let status = response.status().as_u16();
            let bytes = response.bytes().await?;
            Ok::<_, reqwest::Error>((status, bytes))
        };

        let (status, bytes) = match tokio::time::timeout(request.timeout, call).await {
            Err(_) => {
                return Err(ForwardError::Timeout {
                    timeout: request.timeout,
                })
            }
            Ok(Err(e)) => return Err(ForwardError::Transport(e.to_string())),
            Ok(Ok(parts)) => parts,
        };

        let body = parse_body(&bytes);
        if status >= 500 {
            return Err(ForwardError::Status { status, body });
        }

        Ok(UpstreamResponse {
            status,
            body,
            url: url.to_string(),
        })
    }
}

/// JSON when it parses, the raw text otherwise, null when empty
fn parse_body(bytes: &[u8]) -> Value {
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}
