//! Postgres-backed ledger store.
//!
//! Balance updates are a single `UPDATE ... RETURNING` statement, so Postgres
//! takes the row lock and holds it until the transaction ends. Each
//! transaction sets `lock_timeout`, turning a stuck lock wait into a
//! retryable error instead of an indefinite stall.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Code | LedgerError |
//! |------------|-----------------|-------------|
//! | Database (foreign key violation) | `23503` | `NotFound` for the referenced account |
//! | Database (deadlock detected) | `40P01` | retryable `StoreFailure` |
//! | Database (serialization failure) | `40001` | retryable `StoreFailure` |
//! | Database (lock not available) | `55P03` | retryable `StoreFailure` |
//! | PoolTimedOut | N/A | retryable `StoreFailure` |
//! | Other | Any other | `StoreFailure` |

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{FromRow, Postgres};
use tracing::{info, instrument};

use simplebank_common::{AccountId, Currency, EntryId, LedgerError, Result, TransferId};

use crate::account::{Account, CreateAccountParams};
use crate::balance::AddAccountBalanceParams;
use crate::config::StoreConfig;
use crate::entry::{CreateEntryParams, Entry};
use crate::transfer::{CreateTransferParams, Transfer};

use super::{LedgerStore, Queries, Transaction};

const ACCOUNT_COLUMNS: &str = "id, owner, balance, currency, created_at";
const ENTRY_COLUMNS: &str = "id, account_id, amount, created_at";
const TRANSFER_COLUMNS: &str = "id, from_account_id, to_account_id, amount, created_at";

/// Postgres ledger store.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PgStore {
    /// Connect a pool using `config`.
    #[instrument(skip(config))]
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let url = config
            .database_url
            .as_deref()
            .ok_or_else(|| LedgerError::store_failure("database URL is not configured"))?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;

        info!(
            max_connections = config.max_connections,
            "Connected to Postgres"
        );

        Ok(Self::from_pool(pool, config.lock_timeout))
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }

    /// Apply the embedded schema migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| LedgerError::store_failure(format!("migration failed: {}", e)))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl LedgerStore for PgStore {
    type Tx = PgTransaction;

    async fn begin(&self) -> Result<PgTransaction> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        // Transaction-local, same as SET LOCAL.
        sqlx::query("SELECT set_config('lock_timeout', $1, true)")
            .bind(format!("{}ms", self.lock_timeout.as_millis()))
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("set_lock_timeout", e))?;

        Ok(PgTransaction { tx })
    }
}

/// An open Postgres transaction. Dropping it rolls back.
pub struct PgTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[derive(FromRow)]
struct AccountRow {
    id: i64,
    owner: String,
    balance: i64,
    currency: String,
    created_at: DateTime<Utc>,
}

impl From<AccountRow> for Account {
    fn from(row: AccountRow) -> Self {
        Self {
            id: AccountId::new(row.id),
            owner: row.owner,
            balance: row.balance,
            currency: Currency::new(row.currency),
            created_at: row.created_at,
        }
    }
}

#[derive(FromRow)]
struct EntryRow {
    id: i64,
    account_id: i64,
    amount: i64,
    created_at: DateTime<Utc>,
}

impl From<EntryRow> for Entry {
    fn from(row: EntryRow) -> Self {
        Self {
            id: EntryId::new(row.id),
            account_id: AccountId::new(row.account_id),
            amount: row.amount,
            created_at: row.created_at,
        }
    }
}

#[derive(FromRow)]
struct TransferRow {
    id: i64,
    from_account_id: i64,
    to_account_id: i64,
    amount: i64,
    created_at: DateTime<Utc>,
}

impl From<TransferRow> for Transfer {
    fn from(row: TransferRow) -> Self {
        Self {
            id: TransferId::new(row.id),
            from_account_id: AccountId::new(row.from_account_id),
            to_account_id: AccountId::new(row.to_account_id),
            amount: row.amount,
            created_at: row.created_at,
        }
    }
}

#[async_trait]
impl Queries for PgTransaction {
    async fn create_account(&mut self, params: CreateAccountParams) -> Result<Account> {
        let row = sqlx::query_as::<_, AccountRow>(&format!(
            "INSERT INTO accounts (owner, balance, currency) VALUES ($1, $2, $3) RETURNING {}",
            ACCOUNT_COLUMNS
        ))
        .bind(&params.owner)
        .bind(params.balance)
        .bind(params.currency.code())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("create_account", e))?;

        Ok(row.into())
    }

    async fn get_account(&mut self, id: AccountId) -> Result<Account> {
        let row = sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {} FROM accounts WHERE id = $1",
            ACCOUNT_COLUMNS
        ))
        .bind(id.get())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("get_account", e))?;

        row.map(Account::from)
            .ok_or_else(|| LedgerError::account_not_found(id))
    }

    async fn create_transfer(&mut self, params: CreateTransferParams) -> Result<Transfer> {
        let row = sqlx::query_as::<_, TransferRow>(&format!(
            "INSERT INTO transfers (from_account_id, to_account_id, amount) VALUES ($1, $2, $3) RETURNING {}",
            TRANSFER_COLUMNS
        ))
        .bind(params.from_account_id.get())
        .bind(params.to_account_id.get())
        .bind(params.amount)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| {
            map_insert_error(
                "create_transfer",
                e,
                &[
                    ("transfers_from_account_id_fkey", params.from_account_id),
                    ("transfers_to_account_id_fkey", params.to_account_id),
                ],
            )
        })?;

        Ok(row.into())
    }

    async fn create_entry(&mut self, params: CreateEntryParams) -> Result<Entry> {
        let row = sqlx::query_as::<_, EntryRow>(&format!(
            "INSERT INTO entries (account_id, amount) VALUES ($1, $2) RETURNING {}",
            ENTRY_COLUMNS
        ))
        .bind(params.account_id.get())
        .bind(params.amount)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| {
            map_insert_error(
                "create_entry",
                e,
                &[("entries_account_id_fkey", params.account_id)],
            )
        })?;

        Ok(row.into())
    }

    async fn add_account_balance(&mut self, params: AddAccountBalanceParams) -> Result<Account> {
        let row = sqlx::query_as::<_, AccountRow>(&format!(
            "UPDATE accounts SET balance = balance + $1 WHERE id = $2 RETURNING {}",
            ACCOUNT_COLUMNS
        ))
        .bind(params.amount)
        .bind(params.id.get())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("add_account_balance", e))?;

        row.map(Account::from)
            .ok_or_else(|| LedgerError::account_not_found(params.id))
    }

    async fn list_entries(&mut self, account_id: AccountId) -> Result<Vec<Entry>> {
        let rows = sqlx::query_as::<_, EntryRow>(&format!(
            "SELECT {} FROM entries WHERE account_id = $1 ORDER BY id",
            ENTRY_COLUMNS
        ))
        .bind(account_id.get())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("list_entries", e))?;

        Ok(rows.into_iter().map(Entry::from).collect())
    }

    async fn list_transfers(&mut self, account_id: AccountId) -> Result<Vec<Transfer>> {
        let rows = sqlx::query_as::<_, TransferRow>(&format!(
            "SELECT {} FROM transfers WHERE from_account_id = $1 OR to_account_id = $1 ORDER BY id",
            TRANSFER_COLUMNS
        ))
        .bind(account_id.get())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("list_transfers", e))?;

        Ok(rows.into_iter().map(Transfer::from).collect())
    }
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn commit(self) -> Result<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    async fn rollback(self) -> Result<()> {
        self.tx
            .rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback_transaction", e))
    }
}

/// Map an insert error, turning a foreign key violation on one of
/// `references` into `NotFound` for that account.
fn map_insert_error(
    operation: &str,
    err: sqlx::Error,
    references: &[(&str, AccountId)],
) -> LedgerError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some("23503") {
            let missing = db_err.constraint().and_then(|constraint| {
                references
                    .iter()
                    .find(|(name, _)| *name == constraint)
                    .map(|(_, id)| *id)
            });
            if let Some(id) = missing {
                return LedgerError::account_not_found(id);
            }
        }
    }
    map_sqlx_error(operation, err)
}

/// Map SQLx errors to LedgerError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> LedgerError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                // deadlock_detected, serialization_failure, lock_not_available
                Some("40P01") | Some("40001") | Some("55P03") => {
                    LedgerError::retryable_store_failure(msg)
                }
                _ => LedgerError::store_failure(msg),
            }
        }
        sqlx::Error::PoolTimedOut => LedgerError::retryable_store_failure(format!(
            "connection pool timed out in {}",
            operation
        )),
        sqlx::Error::PoolClosed => {
            LedgerError::store_failure(format!("connection pool closed in {}", operation))
        }
        _ => LedgerError::store_failure(format!("sqlx error in {}: {}", operation, err)),
    }
}
