//! In-process transactional store.
//!
//! Mirrors the behaviour the transfer engine relies on from a relational
//! store: balance updates take a per-row lock that is held until the
//! transaction ends, readers only see committed rows (plus their own writes),
//! and a transaction that is rolled back or dropped leaves no trace.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use simplebank_common::{AccountId, EntryId, LedgerError, Result, TransferId};

use crate::account::{Account, CreateAccountParams};
use crate::balance::AddAccountBalanceParams;
use crate::config::StoreConfig;
use crate::entry::{CreateEntryParams, Entry};
use crate::transfer::{CreateTransferParams, Transfer};

use super::{LedgerStore, Queries, Transaction};

/// Default time a writer waits for a row lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// A committed account row and its write lock.
struct AccountRow {
    committed: RwLock<Account>,
    lock: Arc<Mutex<()>>,
}

impl AccountRow {
    fn new(account: Account) -> Self {
        Self {
            committed: RwLock::new(account),
            lock: Arc::new(Mutex::new(())),
        }
    }
}

/// Per-table id sequence. Ids consumed by rolled back transactions are not
/// reused.
struct Sequence(AtomicI64);

impl Sequence {
    fn new() -> Self {
        Self(AtomicI64::new(1))
    }

    fn next(&self) -> i64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

struct Tables {
    /// Held for write while a commit publishes, for read by committed reads.
    commit_gate: RwLock<()>,
    accounts: DashMap<AccountId, Arc<AccountRow>>,
    entries: RwLock<Vec<Entry>>,
    transfers: RwLock<Vec<Transfer>>,
    account_seq: Sequence,
    entry_seq: Sequence,
    transfer_seq: Sequence,
    lock_timeout: Duration,
}

/// In-memory ledger store.
#[derive(Clone)]
pub struct MemoryStore {
    tables: Arc<Tables>,
}

impl MemoryStore {
    /// Create an empty store with the default lock timeout.
    pub fn new() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    /// Create an empty store whose writers give up after `lock_timeout`.
    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            tables: Arc::new(Tables {
                commit_gate: RwLock::new(()),
                accounts: DashMap::new(),
                entries: RwLock::new(Vec::new()),
                transfers: RwLock::new(Vec::new()),
                account_seq: Sequence::new(),
                entry_seq: Sequence::new(),
                transfer_seq: Sequence::new(),
                lock_timeout,
            }),
        }
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        Self::with_lock_timeout(config.lock_timeout)
    }

    /// Number of committed transfers.
    pub fn transfer_count(&self) -> usize {
        let _gate = self.tables.commit_gate.read();
        self.tables.transfers.read().len()
    }

    /// Number of committed entries.
    pub fn entry_count(&self) -> usize {
        let _gate = self.tables.commit_gate.read();
        self.tables.entries.read().len()
    }

    /// Sum of all committed balances.
    pub fn total_balance(&self) -> i128 {
        let _gate = self.tables.commit_gate.read();
        self.tables
            .accounts
            .iter()
            .map(|row| row.committed.read().balance as i128)
            .sum()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    type Tx = MemoryTransaction;

    async fn begin(&self) -> Result<MemoryTransaction> {
        Ok(MemoryTransaction {
            tables: Arc::clone(&self.tables),
            row_locks: HashMap::new(),
            created_accounts: BTreeMap::new(),
            updated_accounts: HashMap::new(),
            entries: Vec::new(),
            transfers: Vec::new(),
        })
    }
}

/// A transaction against a [`MemoryStore`].
///
/// Writes are staged until commit. Row locks are owned guards, so dropping
/// the transaction releases them along with the staged writes.
pub struct MemoryTransaction {
    tables: Arc<Tables>,
    row_locks: HashMap<AccountId, OwnedMutexGuard<()>>,
    created_accounts: BTreeMap<AccountId, Account>,
    updated_accounts: HashMap<AccountId, Account>,
    entries: Vec<Entry>,
    transfers: Vec<Transfer>,
}

impl MemoryTransaction {
    fn committed_row(&self, id: AccountId) -> Option<Arc<AccountRow>> {
        self.tables.accounts.get(&id).map(|row| Arc::clone(row.value()))
    }

    /// The account as this transaction sees it.
    fn visible_account(&self, id: AccountId) -> Option<Account> {
        if let Some(account) = self.updated_accounts.get(&id) {
            return Some(account.clone());
        }
        if let Some(account) = self.created_accounts.get(&id) {
            return Some(account.clone());
        }
        let _gate = self.tables.commit_gate.read();
        self.committed_row(id)
            .map(|row| row.committed.read().clone())
    }

    fn ensure_account(&self, id: AccountId) -> Result<()> {
        if self.created_accounts.contains_key(&id) || self.committed_row(id).is_some() {
            Ok(())
        } else {
            Err(LedgerError::account_not_found(id))
        }
    }

    /// Take the row lock for `id`, waiting at most the store's lock timeout.
    async fn lock_row(&mut self, id: AccountId) -> Result<()> {
        if self.row_locks.contains_key(&id) {
            return Ok(());
        }

        let row = self
            .committed_row(id)
            .ok_or_else(|| LedgerError::account_not_found(id))?;

        let guard = tokio::time::timeout(self.tables.lock_timeout, row.lock.clone().lock_owned())
            .await
            .map_err(|_| {
                warn!(account_id = %id, "Lock wait timeout");
                LedgerError::retryable_store_failure(format!(
                    "lock wait timeout on account {}",
                    id
                ))
            })?;

        self.row_locks.insert(id, guard);
        Ok(())
    }
}

fn apply_delta(account: &mut Account, amount: i64) -> Result<()> {
    account.balance = account.balance.checked_add(amount).ok_or_else(|| {
        LedgerError::store_failure(format!(
            "balance of account {} out of range",
            account.id
        ))
    })?;
    Ok(())
}

#[async_trait]
impl Queries for MemoryTransaction {
    async fn create_account(&mut self, params: CreateAccountParams) -> Result<Account> {
        let account = Account {
            id: AccountId::new(self.tables.account_seq.next()),
            owner: params.owner,
            balance: params.balance,
            currency: params.currency,
            created_at: Utc::now(),
        };
        self.created_accounts.insert(account.id, account.clone());
        Ok(account)
    }

    async fn get_account(&mut self, id: AccountId) -> Result<Account> {
        self.visible_account(id)
            .ok_or_else(|| LedgerError::account_not_found(id))
    }

    async fn create_transfer(&mut self, params: CreateTransferParams) -> Result<Transfer> {
        // Checked before the account references, as Postgres does.
        if params.amount <= 0 {
            return Err(LedgerError::store_failure(
                "transfers.amount must be positive",
            ));
        }

        self.ensure_account(params.from_account_id)?;
        self.ensure_account(params.to_account_id)?;

        let transfer = Transfer {
            id: TransferId::new(self.tables.transfer_seq.next()),
            from_account_id: params.from_account_id,
            to_account_id: params.to_account_id,
            amount: params.amount,
            created_at: Utc::now(),
        };
        self.transfers.push(transfer.clone());
        Ok(transfer)
    }

    async fn create_entry(&mut self, params: CreateEntryParams) -> Result<Entry> {
        self.ensure_account(params.account_id)?;

        let entry = Entry {
            id: EntryId::new(self.tables.entry_seq.next()),
            account_id: params.account_id,
            amount: params.amount,
            created_at: Utc::now(),
        };
        self.entries.push(entry.clone());
        Ok(entry)
    }

    async fn add_account_balance(&mut self, params: AddAccountBalanceParams) -> Result<Account> {
        // Rows created by this transaction are invisible to everyone else.
        if let Some(account) = self.created_accounts.get_mut(&params.id) {
            apply_delta(account, params.amount)?;
            return Ok(account.clone());
        }

        self.lock_row(params.id).await?;

        let mut account = self
            .visible_account(params.id)
            .ok_or_else(|| LedgerError::account_not_found(params.id))?;
        apply_delta(&mut account, params.amount)?;

        self.updated_accounts.insert(params.id, account.clone());
        Ok(account)
    }

    async fn list_entries(&mut self, account_id: AccountId) -> Result<Vec<Entry>> {
        let _gate = self.tables.commit_gate.read();
        let mut entries: Vec<Entry> = self
            .tables
            .entries
            .read()
            .iter()
            .chain(self.entries.iter())
            .filter(|e| e.account_id == account_id)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.id);
        Ok(entries)
    }

    async fn list_transfers(&mut self, account_id: AccountId) -> Result<Vec<Transfer>> {
        let _gate = self.tables.commit_gate.read();
        let mut transfers: Vec<Transfer> = self
            .tables
            .transfers
            .read()
            .iter()
            .chain(self.transfers.iter())
            .filter(|t| t.from_account_id == account_id || t.to_account_id == account_id)
            .cloned()
            .collect();
        transfers.sort_by_key(|t| t.id);
        Ok(transfers)
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn commit(self) -> Result<()> {
        let MemoryTransaction {
            tables,
            row_locks,
            created_accounts,
            updated_accounts,
            entries,
            transfers,
        } = self;

        // Readers see all of this transaction or none of it.
        let gate = tables.commit_gate.write();

        for (id, account) in created_accounts {
            tables.accounts.insert(id, Arc::new(AccountRow::new(account)));
        }

        // Every updated row is locked by this transaction.
        for (id, account) in updated_accounts {
            if let Some(row) = tables.accounts.get(&id) {
                *row.committed.write() = account;
            }
        }

        tables.entries.write().extend(entries);
        tables.transfers.write().extend(transfers);
        drop(gate);

        debug!(locks_released = row_locks.len(), "Transaction committed");
        drop(row_locks);
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        debug!(locks_released = self.row_locks.len(), "Transaction rolled back");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::run_in_transaction;
    use simplebank_common::Currency;
    use tokio_test::{assert_err, assert_ok};

    async fn seeded_store(lock_timeout: Duration) -> (MemoryStore, AccountId, AccountId) {
        let store = MemoryStore::with_lock_timeout(lock_timeout);
        let (a, b) = run_in_transaction(&store, |tx| {
            Box::pin(async move {
                let a = tx
                    .create_account(CreateAccountParams::new("alice", 100, Currency::usd()))
                    .await?;
                let b = tx
                    .create_account(CreateAccountParams::new("bob", 100, Currency::usd()))
                    .await?;
                Ok((a.id, b.id))
            })
        })
        .await
        .unwrap();
        (store, a, b)
    }

    #[tokio::test]
    async fn test_uncommitted_writes_are_invisible() {
        let (store, a, _) = seeded_store(DEFAULT_LOCK_TIMEOUT).await;

        let mut writer = store.begin().await.unwrap();
        let updated = writer
            .add_account_balance(AddAccountBalanceParams::new(a, 25))
            .await
            .unwrap();
        assert_eq!(updated.balance, 125);
        assert_eq!(writer.get_account(a).await.unwrap().balance, 125);

        let mut reader = store.begin().await.unwrap();
        assert_eq!(reader.get_account(a).await.unwrap().balance, 100);

        writer.commit().await.unwrap();
        assert_eq!(reader.get_account(a).await.unwrap().balance, 125);
    }

    #[tokio::test]
    async fn test_dropped_transaction_discards_writes() {
        let (store, a, b) = seeded_store(DEFAULT_LOCK_TIMEOUT).await;

        {
            let mut tx = store.begin().await.unwrap();
            assert_ok!(
                tx.create_transfer(CreateTransferParams {
                    from_account_id: a,
                    to_account_id: b,
                    amount: 10,
                })
                .await
            );
            assert_ok!(tx.add_account_balance(AddAccountBalanceParams::new(a, -10)).await);
        }

        assert_eq!(store.transfer_count(), 0);
        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.get_account(a).await.unwrap().balance, 100);
        // The row lock went with the dropped transaction.
        assert_ok!(tx.add_account_balance(AddAccountBalanceParams::new(a, 1)).await);
    }

    #[tokio::test]
    async fn test_row_lock_blocks_second_writer_until_commit() {
        let (store, a, _) = seeded_store(Duration::from_secs(2)).await;

        let mut first = store.begin().await.unwrap();
        first
            .add_account_balance(AddAccountBalanceParams::new(a, 10))
            .await
            .unwrap();

        let second_store = store.clone();
        let second = tokio::spawn(async move {
            let mut tx = second_store.begin().await.unwrap();
            let account = tx
                .add_account_balance(AddAccountBalanceParams::new(a, 5))
                .await
                .unwrap();
            tx.commit().await.unwrap();
            account.balance
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!second.is_finished());

        first.commit().await.unwrap();
        // The second writer read the row only after the first committed.
        assert_eq!(second.await.unwrap(), 115);
    }

    #[tokio::test]
    async fn test_opposite_lock_order_times_out() {
        let (store, a, b) = seeded_store(Duration::from_millis(100)).await;

        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();
        assert_ok!(first.add_account_balance(AddAccountBalanceParams::new(a, -1)).await);
        assert_ok!(second.add_account_balance(AddAccountBalanceParams::new(b, -1)).await);

        let (first_result, second_result) = tokio::join!(
            first.add_account_balance(AddAccountBalanceParams::new(b, 1)),
            second.add_account_balance(AddAccountBalanceParams::new(a, 1)),
        );

        let err = assert_err!(first_result);
        assert!(err.is_retryable());
        assert_err!(second_result);
    }

    #[tokio::test]
    async fn test_missing_account_is_not_found() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let missing = AccountId::new(404);

        assert_eq!(
            tx.create_entry(CreateEntryParams {
                account_id: missing,
                amount: 1,
            })
            .await,
            Err(LedgerError::account_not_found(missing))
        );
        assert_eq!(
            tx.add_account_balance(AddAccountBalanceParams::new(missing, 1))
                .await,
            Err(LedgerError::account_not_found(missing))
        );
    }

    #[tokio::test]
    async fn test_balance_overflow_is_store_failure() {
        let (store, a, _) = seeded_store(DEFAULT_LOCK_TIMEOUT).await;
        let mut tx = store.begin().await.unwrap();

        let err = tx
            .add_account_balance(AddAccountBalanceParams::new(a, i64::MAX))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "STORE_FAILURE");
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_non_positive_transfer_amount_checked_before_accounts() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();

        let err = tx
            .create_transfer(CreateTransferParams {
                from_account_id: AccountId::new(404),
                to_account_id: AccountId::new(405),
                amount: 0,
            })
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "STORE_FAILURE");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_readers_never_see_half_a_commit() {
        use crate::engine::TransferEngine;
        use crate::transfer::TransferRequest;

        let (store, a, b) = seeded_store(DEFAULT_LOCK_TIMEOUT).await;
        let engine = TransferEngine::new(Arc::new(store.clone()));

        let writer = tokio::spawn(async move {
            for _ in 0..2000 {
                engine
                    .transfer(TransferRequest::new(a, b, 1))
                    .await
                    .unwrap();
            }
        });

        while !writer.is_finished() {
            assert_eq!(store.total_balance(), 200);
            tokio::task::yield_now().await;
        }
        writer.await.unwrap();

        assert_eq!(store.total_balance(), 200);
        assert_eq!(store.transfer_count(), 2000);
        assert_eq!(store.entry_count(), 4000);
    }
}
