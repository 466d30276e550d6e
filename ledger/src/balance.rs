//! Account balance adjustments and the order they are applied in.

use serde::{Deserialize, Serialize};

use simplebank_common::AccountId;

/// Add a signed delta to one account's balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddAccountBalanceParams {
    /// Account to adjust.
    pub id: AccountId,
    /// Signed delta applied to the balance.
    pub amount: i64,
}

impl AddAccountBalanceParams {
    pub fn new(id: AccountId, amount: i64) -> Self {
        Self { id, amount }
    }
}

/// Order two balance adjustments so the smaller account id is locked first.
///
/// Every transfer touching the same pair of accounts requests their row locks
/// in the same order, whichever side is the source, so concurrent transfers
/// can never wait on each other in a cycle.
pub fn lock_order(
    a: AddAccountBalanceParams,
    b: AddAccountBalanceParams,
) -> [AddAccountBalanceParams; 2] {
    if a.id < b.id {
        [a, b]
    } else {
        [b, a]
    }
}
