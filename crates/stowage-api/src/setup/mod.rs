//! Application setup and initialization

pub mod routes;
pub mod server;

use crate::state::AppState;
use crate::telemetry::{init_telemetry, LogFormat};
use anyhow::{Context, Result};
use std::sync::Arc;
use stowage_core::Config;
use stowage_db::{create_ledger, UploadLedger};
use stowage_services::{create_storage, Storage, UploadCore};
use tokio::task::JoinHandle;

/// A wired application: state, router and the janitor task if enabled
pub struct App {
    pub state: Arc<AppState>,
    pub router: axum::Router,
    pub janitor: Option<JoinHandle<()>>,
}

/// Build handler state over an existing ledger and storage
pub fn build_state(
    config: Config,
    ledger: Arc<dyn UploadLedger>,
    storage: Arc<dyn Storage>,
) -> Arc<AppState> {
    let core = UploadCore::new(&config, ledger, storage);
    Arc::new(AppState { core, config })
}

/// Initialize telemetry, ledger, storage and background work, then build the router
pub async fn initialize_app(config: Config) -> Result<App> {
    config.validate().context("Configuration validation failed")?;

    init_telemetry(LogFormat::from_env()).context("Failed to initialize telemetry")?;
    tracing::info!(environment = %config.environment(), "Configuration loaded and validated");

    let ledger = create_ledger(&config).await?;
    let storage = create_storage(&config)
        .await
        .context("Failed to initialize storage")?;

    let state = build_state(config.clone(), ledger, storage);

    // Assemblies left ASSEMBLING by a previous process
    match state.core.assembly.recover_at_startup().await {
        Ok(report) => tracing::info!(
            committed = report.committed,
            released = report.released,
            skipped = report.skipped,
            "Startup assembly recovery finished"
        ),
        Err(e) => tracing::error!(error = %e, "Startup assembly recovery failed"),
    }

    let janitor = Arc::new(state.core.janitor(&config)).start();

    let router = routes::setup_routes(&config, state.clone())?;

    Ok(App {
        state,
        router,
        janitor,
    })
}
