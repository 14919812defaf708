//! Ledger setup and initialization

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use stowage_core::{Config, LedgerBackend};

use crate::db::{MemoryLedger, PgUploadLedger, UploadLedger};

/// Connect to Postgres and apply pending migrations
pub async fn setup_database(config: &Config) -> Result<PgPool> {
    let database_url = config
        .database_url()
        .context("DATABASE_URL is required for the postgres ledger")?;

    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections())
        .acquire_timeout(Duration::from_secs(config.db_timeout_seconds()))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await
        .context("Failed to connect to database")?;

    tracing::info!(
        max_connections = config.db_max_connections(),
        "Database connected successfully"
    );

    sqlx::migrate!("../../migrations")
        .run(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database migrations applied");

    Ok(pool)
}

/// Build the configured ledger backend
pub async fn create_ledger(config: &Config) -> Result<Arc<dyn UploadLedger>> {
    match config.ledger_backend() {
        LedgerBackend::Postgres => {
            let pool = setup_database(config).await?;
            Ok(Arc::new(PgUploadLedger::new(pool)))
        }
        LedgerBackend::Memory => {
            tracing::warn!("Using in-memory upload ledger; state is lost on restart");
            Ok(Arc::new(MemoryLedger::new()))
        }
    }
}
