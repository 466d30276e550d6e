//! Simulation scenarios.

use clap::ValueEnum;
use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

use simplebank_common::{AccountId, LedgerError};
use simplebank_ledger::{Account, TransferRequest, TransferResult};

/// Traffic pattern a scenario generates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ScenarioKind {
    /// Every transfer goes from the first account to the second.
    SameDirection,
    /// Transfers alternate direction between the first two accounts.
    Alternating,
    /// Transfers between random distinct pairs.
    Random,
    /// Every transfer names an account that does not exist.
    MissingAccount,
}

/// A simulation scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub kind: ScenarioKind,
    /// Number of concurrent transfers.
    pub transfers: usize,
    /// Amount per transfer.
    pub amount: i64,
}

impl Scenario {
    pub fn new(kind: ScenarioKind, transfers: usize, amount: i64) -> Self {
        Self {
            kind,
            transfers,
            amount,
        }
    }

    /// Accounts the scenario needs before it can run.
    pub fn min_accounts(&self) -> usize {
        match self.kind {
            ScenarioKind::MissingAccount => 1,
            _ => 2,
        }
    }

    /// Build the transfer requests for this run.
    pub fn requests(&self, accounts: &[Account], rng: &mut StdRng) -> Vec<TransferRequest> {
        (0..self.transfers)
            .map(|i| match self.kind {
                ScenarioKind::SameDirection => {
                    TransferRequest::new(accounts[0].id, accounts[1].id, self.amount)
                }
                ScenarioKind::Alternating => {
                    if i % 2 == 0 {
                        TransferRequest::new(accounts[1].id, accounts[0].id, self.amount)
                    } else {
                        TransferRequest::new(accounts[0].id, accounts[1].id, self.amount)
                    }
                }
                ScenarioKind::Random => {
                    let from = rng.gen_range(0..accounts.len());
                    let mut to = rng.gen_range(0..accounts.len());
                    while to == from {
                        to = rng.gen_range(0..accounts.len());
                    }
                    TransferRequest::new(accounts[from].id, accounts[to].id, self.amount)
                }
                ScenarioKind::MissingAccount => {
                    TransferRequest::new(accounts[0].id, missing_account_id(accounts), self.amount)
                }
            })
            .collect()
    }

    /// Check scenario-specific expectations. Returns one message per
    /// violation.
    pub fn verify(
        &self,
        before: &[Account],
        after: &[Account],
        outcomes: &[Result<TransferResult, LedgerError>],
    ) -> Vec<String> {
        let mut violations = Vec::new();

        let total_before: i128 = before.iter().map(|a| a.balance as i128).sum();
        let total_after: i128 = after.iter().map(|a| a.balance as i128).sum();
        if total_before != total_after {
            violations.push(format!(
                "money not conserved: {} before, {} after",
                total_before, total_after
            ));
        }

        for outcome in outcomes.iter().flatten() {
            if !outcome.is_balanced() {
                violations.push(format!("transfer {} is unbalanced", outcome.transfer.id));
            }
        }

        let total = self.amount as i128 * self.transfers as i128;
        match self.kind {
            ScenarioKind::SameDirection => {
                expect_all_ok(outcomes, &mut violations);
                expect_delta(before, after, 0, -total, &mut violations);
                expect_delta(before, after, 1, total, &mut violations);
            }
            ScenarioKind::Alternating => {
                expect_all_ok(outcomes, &mut violations);
                // An odd count leaves one net transfer into the first account.
                let net = if self.transfers % 2 == 1 { self.amount as i128 } else { 0 };
                expect_delta(before, after, 0, net, &mut violations);
                expect_delta(before, after, 1, -net, &mut violations);
            }
            ScenarioKind::Random => expect_all_ok(outcomes, &mut violations),
            ScenarioKind::MissingAccount => {
                for outcome in outcomes {
                    match outcome {
                        Err(LedgerError::NotFound { .. }) => {}
                        other => violations.push(format!("expected NotFound, got {:?}", other)),
                    }
                }
                for (b, a) in before.iter().zip(after) {
                    if a.balance != b.balance {
                        violations.push(format!("account {} changed after failed transfers", a.id));
                    }
                }
            }
        }

        violations
    }
}

/// An id one past the highest seeded account.
fn missing_account_id(accounts: &[Account]) -> AccountId {
    let max = accounts.iter().map(|a| a.id.get()).max().unwrap_or(0);
    AccountId::new(max.saturating_add(1_000_000))
}

fn expect_all_ok(outcomes: &[Result<TransferResult, LedgerError>], violations: &mut Vec<String>) {
    for outcome in outcomes {
        if let Err(e) = outcome {
            violations.push(format!("transfer failed: {}", e));
        }
    }
}

fn expect_delta(
    before: &[Account],
    after: &[Account],
    index: usize,
    expected: i128,
    violations: &mut Vec<String>,
) {
    let (Some(b), Some(a)) = (before.get(index), after.get(index)) else {
        return;
    };
    let delta = a.balance as i128 - b.balance as i128;
    if delta != expected {
        violations.push(format!(
            "account {} moved by {}, expected {}",
            a.id, delta, expected
        ));
    }
}
