//! Transactional access to accounts, entries and transfers.
//!
//! A [`LedgerStore`] opens [`Transaction`]s; every transaction exposes the
//! single-statement [`Queries`] the transfer engine is built from.
//! [`run_in_transaction`] scopes a unit of work to one transaction and
//! guarantees it is committed or rolled back on every exit path.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{debug, warn};

use simplebank_common::{AccountId, Result};

use crate::account::{Account, CreateAccountParams};
use crate::balance::AddAccountBalanceParams;
use crate::entry::{CreateEntryParams, Entry};
use crate::transfer::{CreateTransferParams, Transfer};

pub mod memory;
pub mod postgres;

pub use memory::{MemoryStore, MemoryTransaction};
pub use postgres::{PgStore, PgTransaction};

/// Single-statement operations, each atomic on its own.
#[async_trait]
pub trait Queries: Send {
    async fn create_account(&mut self, params: CreateAccountParams) -> Result<Account>;

    /// Read an account without waiting on row locks held elsewhere.
    async fn get_account(&mut self, id: AccountId) -> Result<Account>;

    async fn create_transfer(&mut self, params: CreateTransferParams) -> Result<Transfer>;

    async fn create_entry(&mut self, params: CreateEntryParams) -> Result<Entry>;

    /// Add a signed delta to a balance and return the updated account.
    ///
    /// Takes the account's row lock and keeps it until the enclosing
    /// transaction ends, so concurrent writers to the same row serialize.
    async fn add_account_balance(&mut self, params: AddAccountBalanceParams) -> Result<Account>;

    /// Entries against an account, ascending by id.
    async fn list_entries(&mut self, account_id: AccountId) -> Result<Vec<Entry>>;

    /// Transfers with the account on either side, ascending by id.
    async fn list_transfers(&mut self, account_id: AccountId) -> Result<Vec<Transfer>>;
}

/// An open transaction. Dropping it without committing rolls it back.
#[async_trait]
pub trait Transaction: Queries + Sized {
    async fn commit(self) -> Result<()>;

    async fn rollback(self) -> Result<()>;
}

/// A transactional store of ledger rows.
#[async_trait]
pub trait LedgerStore: Send + Sync + 'static {
    type Tx: Transaction + 'static;

    async fn begin(&self) -> Result<Self::Tx>;
}

/// Run `work` inside a fresh transaction.
///
/// Commits when `work` succeeds. When it fails the transaction is rolled back
/// and the error returned unchanged; when it panics the transaction is rolled
/// back before the panic resumes. A failed rollback is logged and otherwise
/// ignored, since the store discards the transaction with its handle anyway.
pub async fn run_in_transaction<S, T, F>(store: &S, work: F) -> Result<T>
where
    S: LedgerStore + ?Sized,
    T: Send,
    F: for<'t> FnOnce(&'t mut S::Tx) -> BoxFuture<'t, Result<T>> + Send,
{
    let mut tx = store.begin().await?;

    let outcome = AssertUnwindSafe(work(&mut tx)).catch_unwind().await;

    match outcome {
        Ok(Ok(value)) => {
            tx.commit().await?;
            Ok(value)
        }
        Ok(Err(err)) => {
            debug!(error = %err, "Rolling back transaction");
            if let Err(rollback_err) = tx.rollback().await {
                warn!(
                    error = %err,
                    rollback_error = %rollback_err,
                    "Rollback failed"
                );
            }
            Err(err)
        }
        Err(panic) => {
            warn!("Unit of work panicked, rolling back transaction");
            if let Err(rollback_err) = tx.rollback().await {
                warn!(rollback_error = %rollback_err, "Rollback failed");
            }
            std::panic::resume_unwind(panic)
        }
    }
}

/// Read and setup accessors, each running in its own short transaction.
pub struct Ledger<S> {
    store: Arc<S>,
}

impl<S> Clone for Ledger<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: LedgerStore> Ledger<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Get the underlying store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Create an account after checking its owner and currency.
    pub async fn create_account(&self, params: CreateAccountParams) -> Result<Account> {
        params.validate()?;
        run_in_transaction(self.store.as_ref(), move |tx| {
            Box::pin(async move { tx.create_account(params).await })
        })
        .await
    }

    pub async fn get_account(&self, id: AccountId) -> Result<Account> {
        run_in_transaction(self.store.as_ref(), move |tx| {
            Box::pin(async move { tx.get_account(id).await })
        })
        .await
    }

    pub async fn list_entries(&self, account_id: AccountId) -> Result<Vec<Entry>> {
        run_in_transaction(self.store.as_ref(), move |tx| {
            Box::pin(async move { tx.list_entries(account_id).await })
        })
        .await
    }

    pub async fn list_transfers(&self, account_id: AccountId) -> Result<Vec<Transfer>> {
        run_in_transaction(self.store.as_ref(), move |tx| {
            Box::pin(async move { tx.list_transfers(account_id).await })
        })
        .await
    }
}
