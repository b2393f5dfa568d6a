use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;

pub mod auth;
pub mod config;
pub mod context;
pub mod envelope;
pub mod error;
pub mod gateway;
pub mod metrics;
pub mod routes;
pub mod utils;

use context::AppContext;

/// Serve the gateway on an already-bound listener until `shutdown` resolves
pub async fn serve(
    listener: TcpListener,
    app_context: Arc<AppContext>,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let app = routes::create_router(app_context);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("Failed to start server")?;

    Ok(())
}

/// Resolves on Ctrl+C
pub async fn shutdown_signal() {
    match signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutdown signal received. Shutting down..."),
        Err(e) => tracing::error!(error = %e, "Failed to listen for shutdown signal"),
    }
}
