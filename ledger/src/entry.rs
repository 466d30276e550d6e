//! Ledger entries for double-entry bookkeeping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use simplebank_common::{AccountId, EntryId};

/// Direction of an entry, derived from the sign of its amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryType {
    /// Money leaving the account (negative amount).
    Debit,
    /// Money arriving in the account (positive amount).
    Credit,
}

/// A single signed line item against one account.
///
/// Entries are immutable and only ever created in pairs by a transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Unique entry ID.
    pub id: EntryId,
    /// Account affected.
    pub account_id: AccountId,
    /// Signed amount: negative for a debit, positive for a credit.
    pub amount: i64,
    /// When this entry was created.
    pub created_at: DateTime<Utc>,
}

impl Entry {
    /// Get the entry direction.
    pub fn entry_type(&self) -> EntryType {
        if self.amount < 0 {
            EntryType::Debit
        } else {
            EntryType::Credit
        }
    }
}

/// Input for creating an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateEntryParams {
    pub account_id: AccountId,
    pub amount: i64,
}
