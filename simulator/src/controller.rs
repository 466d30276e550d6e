//! Simulation controller.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use simplebank_common::{Currency, LedgerError};
use simplebank_ledger::{Account, Ledger, LedgerStore, TransferEngine, TransferResult};

use crate::accounts::AccountFactory;
use crate::metrics::{MetricsSummary, SimulationMetrics};
use crate::scenario::Scenario;

/// Outcome of one scenario run.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub scenario: Scenario,
    pub accounts_before: Vec<Account>,
    pub accounts_after: Vec<Account>,
    pub metrics: MetricsSummary,
    pub violations: Vec<String>,
}

impl SimulationReport {
    /// Whether every check held.
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Drives concurrent transfer traffic against a ledger store.
pub struct SimulationController<S> {
    ledger: Ledger<S>,
    engine: TransferEngine<S>,
    /// Random number generator.
    rng: StdRng,
    /// Seeded accounts, in creation order.
    accounts: Vec<Account>,
    metrics: Arc<Mutex<SimulationMetrics>>,
}

impl<S: LedgerStore> SimulationController<S> {
    /// Create a new simulation controller.
    pub fn new(store: Arc<S>, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };

        Self {
            ledger: Ledger::new(Arc::clone(&store)),
            engine: TransferEngine::new(store),
            rng,
            accounts: Vec::new(),
            metrics: Arc::new(Mutex::new(SimulationMetrics::new())),
        }
    }

    /// Seed `count` accounts with `initial_balance` each.
    pub async fn initialize(&mut self, count: usize, initial_balance: i64) -> anyhow::Result<()> {
        info!("Initializing simulation with {} accounts", count);

        let accounts = AccountFactory::create_accounts(
            &self.ledger,
            &mut self.rng,
            count,
            initial_balance,
            &Currency::usd(),
        )
        .await?;

        for account in &accounts {
            info!(account_id = %account.id, owner = %account.owner, "Initialized account with balance {}", account.balance);
        }

        self.accounts = accounts;
        Ok(())
    }

    /// Run every transfer of the scenario concurrently, then check the
    /// resulting balances.
    pub async fn run_scenario(&mut self, scenario: Scenario) -> anyhow::Result<SimulationReport> {
        if self.accounts.len() < scenario.min_accounts() {
            anyhow::bail!(
                "scenario {:?} needs at least {} accounts, have {}",
                scenario.kind,
                scenario.min_accounts(),
                self.accounts.len()
            );
        }

        info!(
            "Running scenario {:?}: {} transfers of {}",
            scenario.kind, scenario.transfers, scenario.amount
        );

        let before = self.current_accounts().await?;
        let requests = scenario.requests(&before, &mut self.rng);

        let mut tasks = JoinSet::new();
        for request in requests {
            let engine = self.engine.clone();
            let metrics = Arc::clone(&self.metrics);
            tasks.spawn(async move {
                let started = Instant::now();
                let outcome = engine.transfer(request).await;
                let latency_us = started.elapsed().as_micros() as u64;

                match &outcome {
                    Ok(result) => {
                        debug!(transfer_id = %result.transfer.id, latency_us, "Transfer done");
                        metrics.lock().record_success(latency_us);
                    }
                    Err(e) => {
                        debug!(error = %e, "Transfer failed");
                        metrics.lock().record_failure(e.is_retryable());
                    }
                }
                outcome
            });
        }

        let mut outcomes: Vec<Result<TransferResult, LedgerError>> = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            outcomes.push(joined?);
        }

        let after = self.current_accounts().await?;
        let violations = scenario.verify(&before, &after, &outcomes);
        for violation in &violations {
            warn!("Check failed: {}", violation);
        }

        Ok(SimulationReport {
            scenario,
            accounts_before: before,
            accounts_after: after,
            metrics: self.metrics(),
            violations,
        })
    }

    /// Get simulation metrics.
    pub fn metrics(&self) -> MetricsSummary {
        self.metrics.lock().summary()
    }

    async fn current_accounts(&self) -> anyhow::Result<Vec<Account>> {
        let mut current = Vec::with_capacity(self.accounts.len());
        for account in &self.accounts {
            current.push(self.ledger.get_account(account.id).await?);
        }
        Ok(current)
    }
}
