//! Server startup and graceful shutdown

use anyhow::Result;
use axum::Router;
use stowage_core::Config;

/// Serve `app` until SIGINT or SIGTERM
pub async fn start_server(config: &Config, app: Router) -> Result<()> {
    let addr = format!("0.0.0.0:{}", config.server_port());
    tracing::info!(addr = %addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!(
        environment = %config.environment(),
        ledger = %config.ledger_backend(),
        storage_path = %config.storage_path().display(),
        max_upload_mb = config.max_upload_size_bytes() / 1024 / 1024,
        max_chunk_mb = config.max_chunk_size_bytes() / 1024 / 1024,
        max_concurrent_assemblies = config.max_concurrent_assemblies(),
        "Server ready and accepting connections"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Resolves on the first of SIGINT or SIGTERM.
///
/// # Panics
/// Panics if a signal handler cannot be installed.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm =
            signal(SignalKind::terminate()).expect("SIGTERM handler must install");
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.expect("SIGINT handler must install");
                tracing::info!(signal = "SIGINT", "Shutdown requested");
            }
            _ = sigterm.recv() => {
                tracing::info!(signal = "SIGTERM", "Shutdown requested");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("Ctrl+C handler must install");
        tracing::info!(signal = "ctrl_c", "Shutdown requested");
    }

    tracing::info!("Draining in-flight requests");
}
