//! Transfer records, requests and results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use simplebank_common::{AccountId, LedgerError, Result, TransferId};

use crate::account::Account;
use crate::entry::{Entry, EntryType};

/// The record of one money movement between two accounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    /// Unique transfer ID.
    pub id: TransferId,
    /// Source account.
    pub from_account_id: AccountId,
    /// Destination account.
    pub to_account_id: AccountId,
    /// Strictly positive amount moved.
    pub amount: i64,
    /// When the transfer was created.
    pub created_at: DateTime<Utc>,
}

/// Input for creating a transfer row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTransferParams {
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub amount: i64,
}

/// A request to move `amount` from one account to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub amount: i64,
}

impl TransferRequest {
    /// Create a transfer request.
    pub fn new(from_account_id: AccountId, to_account_id: AccountId, amount: i64) -> Self {
        Self {
            from_account_id,
            to_account_id,
            amount,
        }
    }

    /// Reject requests the engine must not open a transaction for.
    pub fn validate(&self) -> Result<()> {
        if self.amount <= 0 {
            return Err(LedgerError::invalid_argument(
                "amount",
                format!("transfer amount must be positive, got {}", self.amount),
            ));
        }

        if self.from_account_id == self.to_account_id {
            return Err(LedgerError::invalid_argument(
                "to_account_id",
                format!(
                    "cannot transfer from account {} to itself",
                    self.from_account_id
                ),
            ));
        }

        Ok(())
    }
}

impl From<TransferRequest> for CreateTransferParams {
    fn from(request: TransferRequest) -> Self {
        Self {
            from_account_id: request.from_account_id,
            to_account_id: request.to_account_id,
            amount: request.amount,
        }
    }
}

/// Everything a committed transfer produced, read inside the same transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferResult {
    pub transfer: Transfer,
    pub from_entry: Entry,
    pub to_entry: Entry,
    /// Source account after the debit.
    pub from_account: Account,
    /// Destination account after the credit.
    pub to_account: Account,
}

impl TransferResult {
    /// Check the source was debited, the destination credited, and the two
    /// entries cancel out.
    pub fn is_balanced(&self) -> bool {
        self.from_entry.entry_type() == EntryType::Debit
            && self.to_entry.entry_type() == EntryType::Credit
            && self.from_entry.amount.checked_add(self.to_entry.amount) == Some(0)
    }
}
