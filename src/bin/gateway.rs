// ============================================================================
// MIVAA Gateway Service
// ============================================================================
//
// Single entry point between clients and the MIVAA document/AI service.
// It handles:
// - API key and bearer token authentication
// - Per-identity rate limiting
// - Action routing and forwarding with a circuit breaker
//
// ============================================================================

use anyhow::{Context, Result};
use mivaa_gateway::config::Config;
use mivaa_gateway::context::AppContext;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.rust_log.clone()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    for warning in &config.warnings {
        warn!("{}", warning);
    }

    info!("=== MIVAA Gateway Starting ===");
    info!("Port: {}", config.port);
    info!("Upstream: {}", config.upstream.base_url);
    info!(
        "Rate limit: {} requests / {}s",
        config.rate_limit.max_requests,
        config.rate_limit.window.as_secs()
    );
    info!(
        "Circuit breaker: {} failures, {}s reset",
        config.circuit_breaker.failure_threshold,
        config.circuit_breaker.reset_timeout.as_secs()
    );

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port)
        .parse()
        .context("Failed to parse bind address")?;

    let app_context = Arc::new(AppContext::from_config(config)?);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;
    info!("MIVAA Gateway listening on {}", addr);

    mivaa_gateway::serve(listener, app_context, mivaa_gateway::shutdown_signal()).await
}
