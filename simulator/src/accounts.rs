//! Seed accounts for a simulation run.

use rand::rngs::StdRng;
use rand::Rng;

use simplebank_common::Currency;
use simplebank_ledger::{Account, CreateAccountParams, Ledger, LedgerStore};

const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz";

/// Random six-letter owner name.
pub fn random_owner(rng: &mut StdRng) -> String {
    (0..6)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Account factory for simulation runs.
pub struct AccountFactory;

impl AccountFactory {
    /// Create `count` accounts holding `initial_balance` each.
    pub async fn create_accounts<S: LedgerStore>(
        ledger: &Ledger<S>,
        rng: &mut StdRng,
        count: usize,
        initial_balance: i64,
        currency: &Currency,
    ) -> anyhow::Result<Vec<Account>> {
        let mut accounts = Vec::with_capacity(count);
        for _ in 0..count {
            let account = ledger
                .create_account(CreateAccountParams::new(
                    random_owner(rng),
                    initial_balance,
                    currency.clone(),
                ))
                .await?;
            accounts.push(account);
        }
        Ok(accounts)
    }
}
