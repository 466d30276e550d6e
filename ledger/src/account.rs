//! Account definitions for ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use simplebank_common::{AccountId, Currency, LedgerError, Result};

/// A ledger account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Unique account identifier.
    pub id: AccountId,
    /// Account owner name.
    pub owner: String,
    /// Current balance in the currency's smallest unit. May go negative; the
    /// ledger performs no overdraft check.
    pub balance: i64,
    /// Account currency.
    pub currency: Currency,
    /// When the account was created.
    pub created_at: DateTime<Utc>,
}

/// Input for creating an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateAccountParams {
    pub owner: String,
    pub balance: i64,
    pub currency: Currency,
}

impl CreateAccountParams {
    /// Create account parameters.
    pub fn new(owner: impl Into<String>, balance: i64, currency: Currency) -> Self {
        Self {
            owner: owner.into(),
            balance,
            currency,
        }
    }

    /// Reject an empty owner or a currency outside [`Currency::SUPPORTED`].
    pub fn validate(&self) -> Result<()> {
        if self.owner.trim().is_empty() {
            return Err(LedgerError::invalid_argument(
                "owner",
                "account owner cannot be empty",
            ));
        }

        if !self.currency.is_supported() {
            return Err(LedgerError::invalid_argument(
                "currency",
                format!("unsupported currency {}", self.currency),
            ));
        }

        Ok(())
    }
}
