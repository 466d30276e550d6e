//! Transfer engine.
//!
//! Executes one transfer per transaction: a transfer row, two offsetting
//! entries and both balance updates commit together or not at all.

use std::sync::Arc;

use tracing::{debug, info, instrument};

use simplebank_common::Result;

use crate::account::Account;
use crate::balance::{lock_order, AddAccountBalanceParams};
use crate::entry::CreateEntryParams;
use crate::store::{run_in_transaction, LedgerStore, Queries};
use crate::transfer::{CreateTransferParams, TransferRequest, TransferResult};

/// Moves money between accounts with double-entry bookkeeping.
///
/// The engine holds no locks of its own. Concurrent transfers are kept
/// consistent by the store's row locks, which every transfer acquires in
/// ascending account id order.
pub struct TransferEngine<S> {
    store: Arc<S>,
}

impl<S> Clone for TransferEngine<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: LedgerStore> TransferEngine<S> {
    /// Create a new transfer engine.
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Get the underlying store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Transfer `request.amount` from one account to another.
    ///
    /// Fails with `InvalidArgument` before touching the store when the amount
    /// is not positive or both sides name the same account. Any later failure
    /// rolls the whole transfer back and is returned as the store reported
    /// it. The engine never retries.
    #[instrument(
        skip(self, request),
        fields(
            from_account_id = %request.from_account_id,
            to_account_id = %request.to_account_id,
            amount = request.amount
        ),
        err
    )]
    pub async fn transfer(&self, request: TransferRequest) -> Result<TransferResult> {
        request.validate()?;

        let result = run_in_transaction(self.store.as_ref(), move |tx| {
            Box::pin(execute_transfer(tx, request))
        })
        .await?;

        info!(transfer_id = %result.transfer.id, "Transfer committed");
        Ok(result)
    }
}

/// The unit of work for one transfer.
async fn execute_transfer<Q>(queries: &mut Q, request: TransferRequest) -> Result<TransferResult>
where
    Q: Queries + ?Sized,
{
    let transfer = queries
        .create_transfer(CreateTransferParams::from(request))
        .await?;

    let from_entry = queries
        .create_entry(CreateEntryParams {
            account_id: request.from_account_id,
            amount: -request.amount,
        })
        .await?;

    let to_entry = queries
        .create_entry(CreateEntryParams {
            account_id: request.to_account_id,
            amount: request.amount,
        })
        .await?;

    let (from_account, to_account) = update_account_balances(
        queries,
        AddAccountBalanceParams::new(from_entry.account_id, from_entry.amount),
        AddAccountBalanceParams::new(to_entry.account_id, to_entry.amount),
    )
    .await?;

    Ok(TransferResult {
        transfer,
        from_entry,
        to_entry,
        from_account,
        to_account,
    })
}

/// Apply both balance updates, smaller account id first.
///
/// Returns `(from_account, to_account)` whichever order they were locked in.
async fn update_account_balances<Q>(
    queries: &mut Q,
    from: AddAccountBalanceParams,
    to: AddAccountBalanceParams,
) -> Result<(Account, Account)>
where
    Q: Queries + ?Sized,
{
    let [first, second] = lock_order(from, to);
    debug!(first = %first.id, second = %second.id, "Updating balances");

    let first_account = queries.add_account_balance(first).await?;
    let second_account = queries.add_account_balance(second).await?;

    if first.id == from.id {
        Ok((first_account, second_account))
    } else {
        Ok((second_account, first_account))
    }
}
