//! Database transaction utilities
//!
//! Ledger operations that touch more than one row (chunk confirmation, assembly
//! commit, instant completion) run inside a [`TransactionGuard`].

use anyhow::{Context, Result};
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use std::ops::{Deref, DerefMut};

/// A database transaction that must be finished with `commit` or `rollback`.
///
/// Dereferences to the underlying connection, so queries run with
/// `.execute(&mut *tx)`. A guard dropped without commit is rolled back by sqlx
/// when the connection returns to the pool.
///
/// # Example
///
/// ```ignore
/// use stowage_db::db::transaction::TransactionGuard;
///
/// async fn example(pool: &sqlx::PgPool) -> anyhow::Result<()> {
///     let mut tx = TransactionGuard::begin(pool).await?;
///     sqlx::query("UPDATE upload_sessions SET ...").execute(&mut *tx).await?;
///     tx.commit().await?;
///     Ok(())
/// }
/// ```
pub struct TransactionGuard<'a> {
    transaction: Transaction<'a, Postgres>,
}

impl<'a> TransactionGuard<'a> {
    /// Begin a new database transaction
    pub async fn begin(pool: &'a PgPool) -> Result<Self> {
        let transaction = pool
            .begin()
            .await
            .context("Failed to begin database transaction")?;

        Ok(Self { transaction })
    }

    /// Commit the transaction
    pub async fn commit(self) -> Result<()> {
        self.transaction
            .commit()
            .await
            .context("Failed to commit database transaction")
    }

    /// Rollback the transaction
    pub async fn rollback(self) -> Result<()> {
        tracing::debug!("Rolling back database transaction");
        self.transaction
            .rollback()
            .await
            .context("Failed to rollback database transaction")
    }
}

impl Deref for TransactionGuard<'_> {
    type Target = PgConnection;

    fn deref(&self) -> &Self::Target {
        &self.transaction
    }
}

impl DerefMut for TransactionGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.transaction
    }
}
