// Main entry point for the graph API server

use anyhow::{Context, Result};
use graph_server::{connect_store, server::build_app, telemetry, Config};

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing();

    tracing::info!("Starting channel graph API");

    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!(store = ?config.graph_store, "Configuration loaded");

    let state = connect_store(&config).await?;
    let app = build_app(state);

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("Starting server on {}", addr);
    tracing::info!("Health check: http://localhost:{}/health", config.port);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
