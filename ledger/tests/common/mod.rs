//! Transfer engine checks shared by every store adapter.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinSet;

use simplebank_common::{AccountId, Currency, LedgerError, Result as LedgerResult};
use simplebank_ledger::{
    Account, AddAccountBalanceParams, CreateAccountParams, CreateEntryParams,
    CreateTransferParams, Entry, Ledger, LedgerStore, Queries, Transaction, Transfer,
    TransferEngine, TransferRequest, TransferResult,
};

/// Wraps a store, pausing after every balance update so concurrent
/// transactions interleave while holding row locks, and recording the order
/// each committed transaction updated balances in.
pub struct InterleavingStore<S> {
    inner: S,
    pause: Duration,
    lock_log: Arc<Mutex<Vec<Vec<AccountId>>>>,
}

impl<S: LedgerStore> InterleavingStore<S> {
    pub fn new(inner: S, pause: Duration) -> Self {
        Self {
            inner,
            pause,
            lock_log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Balance update order of every committed transaction.
    pub fn lock_log(&self) -> Vec<Vec<AccountId>> {
        self.lock_log.lock().clone()
    }
}

pub struct InterleavingTransaction<T> {
    inner: T,
    pause: Duration,
    locked: Vec<AccountId>,
    lock_log: Arc<Mutex<Vec<Vec<AccountId>>>>,
}

#[async_trait]
impl<S: LedgerStore> LedgerStore for InterleavingStore<S> {
    type Tx = InterleavingTransaction<S::Tx>;

    async fn begin(&self) -> LedgerResult<Self::Tx> {
        Ok(InterleavingTransaction {
            inner: self.inner.begin().await?,
            pause: self.pause,
            locked: Vec::new(),
            lock_log: Arc::clone(&self.lock_log),
        })
    }
}

#[async_trait]
impl<T: Transaction + 'static> Queries for InterleavingTransaction<T> {
    async fn create_account(&mut self, params: CreateAccountParams) -> LedgerResult<Account> {
        self.inner.create_account(params).await
    }

    async fn get_account(&mut self, id: AccountId) -> LedgerResult<Account> {
        self.inner.get_account(id).await
    }

    async fn create_transfer(&mut self, params: CreateTransferParams) -> LedgerResult<Transfer> {
        self.inner.create_transfer(params).await
    }

    async fn create_entry(&mut self, params: CreateEntryParams) -> LedgerResult<Entry> {
        self.inner.create_entry(params).await
    }

    async fn add_account_balance(&mut self, params: AddAccountBalanceParams) -> LedgerResult<Account> {
        let account = self.inner.add_account_balance(params).await?;
        self.locked.push(params.id);
        tokio::time::sleep(self.pause).await;
        Ok(account)
    }

    async fn list_entries(&mut self, account_id: AccountId) -> LedgerResult<Vec<Entry>> {
        self.inner.list_entries(account_id).await
    }

    async fn list_transfers(&mut self, account_id: AccountId) -> LedgerResult<Vec<Transfer>> {
        self.inner.list_transfers(account_id).await
    }
}

#[async_trait]
impl<T: Transaction + 'static> Transaction for InterleavingTransaction<T> {
    async fn commit(self) -> LedgerResult<()> {
        self.inner.commit().await?;
        if !self.locked.is_empty() {
            self.lock_log.lock().push(self.locked);
        }
        Ok(())
    }

    async fn rollback(self) -> LedgerResult<()> {
        self.inner.rollback().await
    }
}

pub async fn create_account<S: LedgerStore>(ledger: &Ledger<S>, balance: i64) -> Account {
    ledger
        .create_account(CreateAccountParams::new("owner", balance, Currency::usd()))
        .await
        .expect("create account")
}

/// Run every request on its own task and collect the outcomes.
pub async fn run_concurrently<S: LedgerStore>(
    engine: &TransferEngine<S>,
    requests: Vec<TransferRequest>,
) -> Vec<Result<TransferResult, LedgerError>> {
    let mut tasks = JoinSet::new();
    for request in requests {
        let engine = engine.clone();
        tasks.spawn(async move { engine.transfer(request).await });
    }

    let mut outcomes = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        outcomes.push(joined.expect("transfer task panicked"));
    }
    outcomes
}

/// N concurrent A→B transfers lose no updates.
pub async fn concurrent_same_direction<S: LedgerStore>(store: Arc<S>) {
    let ledger = Ledger::new(Arc::clone(&store));
    let engine = TransferEngine::new(store);

    let from = create_account(&ledger, 100).await;
    let to = create_account(&ledger, 100).await;

    let n = 5;
    let amount = 10;
    let requests = (0..n)
        .map(|_| TransferRequest::new(from.id, to.id, amount))
        .collect();

    let outcomes = run_concurrently(&engine, requests).await;
    assert_eq!(outcomes.len(), n);

    let mut seen_from_balances = Vec::new();
    for outcome in outcomes {
        let result = outcome.expect("transfer should succeed");

        assert_eq!(result.transfer.from_account_id, from.id);
        assert_eq!(result.transfer.to_account_id, to.id);
        assert_eq!(result.transfer.amount, amount);
        assert!(result.transfer.id.get() > 0);

        assert_eq!(result.from_entry.account_id, from.id);
        assert_eq!(result.from_entry.amount, -amount);
        assert_eq!(result.to_entry.account_id, to.id);
        assert_eq!(result.to_entry.amount, amount);
        assert!(result.is_balanced());

        // Each transfer saw a distinct, fully serialized balance.
        let moved = from.balance - result.from_account.balance;
        assert_eq!(moved % amount, 0);
        assert!((1..=n as i64).contains(&(moved / amount)));
        assert_eq!(result.to_account.balance - to.balance, moved);
        seen_from_balances.push(result.from_account.balance);
    }

    seen_from_balances.sort_unstable();
    seen_from_balances.dedup();
    assert_eq!(seen_from_balances.len(), n);

    let final_from = ledger.get_account(from.id).await.unwrap();
    let final_to = ledger.get_account(to.id).await.unwrap();
    assert_eq!(final_from.balance, from.balance - n as i64 * amount);
    assert_eq!(final_to.balance, to.balance + n as i64 * amount);
}

/// Alternating-direction transfers between two accounts complete without a
/// deadlock and net out to zero.
pub async fn alternating_directions_do_not_deadlock<S: LedgerStore>(store: Arc<S>) {
    let ledger = Ledger::new(Arc::clone(&store));
    let engine = TransferEngine::new(store);

    let a = create_account(&ledger, 100).await;
    let b = create_account(&ledger, 100).await;

    let requests = (0..10)
        .map(|i| {
            if i % 2 == 0 {
                TransferRequest::new(b.id, a.id, 10)
            } else {
                TransferRequest::new(a.id, b.id, 10)
            }
        })
        .collect();

    for outcome in run_concurrently(&engine, requests).await {
        outcome.expect("no transfer may fail");
    }

    assert_eq!(ledger.get_account(a.id).await.unwrap().balance, 100);
    assert_eq!(ledger.get_account(b.id).await.unwrap().balance, 100);
    assert_eq!(ledger.list_transfers(a.id).await.unwrap().len(), 10);
}

/// A transfer naming a missing account fails with NotFound and leaves
/// nothing behind.
pub async fn missing_account_commits_nothing<S: LedgerStore>(store: Arc<S>) {
    let ledger = Ledger::new(Arc::clone(&store));
    let engine = TransferEngine::new(store);

    let existing = create_account(&ledger, 100).await;
    let missing = AccountId::new(i64::MAX);

    for request in [
        TransferRequest::new(existing.id, missing, 10),
        TransferRequest::new(missing, existing.id, 10),
    ] {
        let err = engine.transfer(request).await.unwrap_err();
        assert_eq!(err, LedgerError::account_not_found(missing));
    }

    assert_eq!(ledger.get_account(existing.id).await.unwrap().balance, 100);
    assert!(ledger.list_transfers(existing.id).await.unwrap().is_empty());
    assert!(ledger.list_entries(existing.id).await.unwrap().is_empty());
}

/// Invalid requests are rejected before any mutation.
pub async fn invalid_requests_mutate_nothing<S: LedgerStore>(store: Arc<S>) {
    let ledger = Ledger::new(Arc::clone(&store));
    let engine = TransferEngine::new(store);

    let a = create_account(&ledger, 100).await;
    let b = create_account(&ledger, 100).await;

    for request in [
        TransferRequest::new(a.id, b.id, 0),
        TransferRequest::new(a.id, b.id, -5),
        TransferRequest::new(a.id, a.id, 10),
    ] {
        let err = engine.transfer(request).await.unwrap_err();
        assert_eq!(err.error_code(), "INVALID_ARGUMENT");
    }

    for account in [&a, &b] {
        assert_eq!(ledger.get_account(account.id).await.unwrap().balance, 100);
        assert!(ledger.list_transfers(account.id).await.unwrap().is_empty());
        assert!(ledger.list_entries(account.id).await.unwrap().is_empty());
    }
}

/// Balance deltas always equal the sum of the account's entries.
pub async fn balances_track_entries<S: LedgerStore>(store: Arc<S>) {
    let ledger = Ledger::new(Arc::clone(&store));
    let engine = TransferEngine::new(store);

    let accounts = [
        create_account(&ledger, 50).await,
        create_account(&ledger, 0).await,
        create_account(&ledger, 500).await,
    ];

    let requests = (0..12)
        .map(|i| {
            let from = &accounts[i % 3];
            let to = &accounts[(i + 1 + i / 3) % 3];
            let to = if to.id == from.id { &accounts[(i + 2) % 3] } else { to };
            TransferRequest::new(from.id, to.id, (i as i64 + 1) * 7)
        })
        .collect();

    for outcome in run_concurrently(&engine, requests).await {
        assert!(outcome.expect("transfer should succeed").is_balanced());
    }

    let mut total_before = 0;
    let mut total_after = 0;
    for account in &accounts {
        let current = ledger.get_account(account.id).await.unwrap();
        let entry_sum: i64 = ledger
            .list_entries(account.id)
            .await
            .unwrap()
            .iter()
            .map(|e| e.amount)
            .sum();
        assert_eq!(current.balance - account.balance, entry_sum);

        total_before += account.balance;
        total_after += current.balance;
    }
    assert_eq!(total_before, total_after);
}

/// Both directions between one pair of accounts update the smaller id first.
pub async fn transfers_lock_smaller_id_first<S: LedgerStore>(inner: S) {
    let store = Arc::new(InterleavingStore::new(inner, Duration::ZERO));
    let ledger = Ledger::new(Arc::clone(&store));
    let engine = TransferEngine::new(Arc::clone(&store));

    let low = create_account(&ledger, 100).await;
    let high = create_account(&ledger, 100).await;
    assert!(low.id < high.id);

    engine
        .transfer(TransferRequest::new(low.id, high.id, 10))
        .await
        .expect("low to high");
    engine
        .transfer(TransferRequest::new(high.id, low.id, 10))
        .await
        .expect("high to low");

    assert_eq!(
        store.lock_log(),
        vec![vec![low.id, high.id], vec![low.id, high.id]]
    );
}

/// Alternating-direction transfers that hold each row lock for a while
/// still complete: a transfer taking its locks in the opposite order would
/// wait on its peer until the lock timeout.
pub async fn interleaved_alternating_transfers_complete<S: LedgerStore>(inner: S) {
    let store = Arc::new(InterleavingStore::new(inner, Duration::from_millis(20)));
    let ledger = Ledger::new(Arc::clone(&store));
    let engine = TransferEngine::new(Arc::clone(&store));

    let a = create_account(&ledger, 100).await;
    let b = create_account(&ledger, 100).await;

    let requests = (0..10)
        .map(|i| {
            if i % 2 == 0 {
                TransferRequest::new(b.id, a.id, 10)
            } else {
                TransferRequest::new(a.id, b.id, 10)
            }
        })
        .collect();

    for outcome in run_concurrently(&engine, requests).await {
        outcome.expect("no transfer may fail");
    }

    let log = store.lock_log();
    assert_eq!(log.len(), 10);
    for order in log {
        assert_eq!(order.len(), 2);
        assert!(order[0] < order[1], "balances updated out of order: {:?}", order);
    }

    assert_eq!(ledger.get_account(a.id).await.unwrap().balance, 100);
    assert_eq!(ledger.get_account(b.id).await.unwrap().balance, 100);
}
