//! SimpleBank Simulator
//!
//! Fires concurrent transfers at the ledger and checks that money is
//! conserved and that no transfer deadlocks.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use simplebank_ledger::{LedgerConfig, LedgerStore, LogFormat, MemoryStore, PgStore};

mod accounts;
mod controller;
mod metrics;
mod scenario;

use controller::SimulationController;
use scenario::{Scenario, ScenarioKind};

/// SimpleBank Simulator CLI
#[derive(Parser, Debug)]
#[command(name = "simulator")]
#[command(about = "Concurrent transfer simulator for the SimpleBank ledger")]
struct Args {
    /// Number of accounts to create
    #[arg(short, long, default_value = "2")]
    accounts: usize,

    /// Starting balance of every account
    #[arg(long, default_value = "100")]
    initial_balance: i64,

    /// Scenario to run
    #[arg(short, long, value_enum, default_value = "alternating")]
    scenario: ScenarioKind,

    /// Number of concurrent transfers
    #[arg(short, long, default_value = "10")]
    transfers: usize,

    /// Amount moved by each transfer
    #[arg(long, default_value = "10")]
    amount: i64,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,

    /// Postgres URL; the in-memory store is used when unset
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Row lock wait limit in milliseconds
    #[arg(long)]
    lock_timeout_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = LedgerConfig::from_env();
    if args.database_url.is_some() {
        config.store.database_url = args.database_url.clone();
    }
    if let Some(ms) = args.lock_timeout_ms {
        config.store.lock_timeout = Duration::from_millis(ms);
    }

    init_tracing(&config);
    config.validate().map_err(anyhow::Error::msg)?;

    info!("Starting SimpleBank Simulator");
    info!("Accounts: {}", args.accounts);

    let scenario = Scenario::new(args.scenario, args.transfers, args.amount);

    match &config.store.database_url {
        Some(_) => {
            let store = PgStore::connect(&config.store).await?;
            store.migrate().await?;
            info!("Using Postgres store");
            simulate(Arc::new(store), &args, scenario).await
        }
        None => {
            info!("Using in-memory store");
            simulate(Arc::new(MemoryStore::from_config(&config.store)), &args, scenario).await
        }
    }
}

fn init_tracing(config: &LedgerConfig) {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone()),
    );
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn simulate<S: LedgerStore>(
    store: Arc<S>,
    args: &Args,
    scenario: Scenario,
) -> anyhow::Result<()> {
    let mut controller = SimulationController::new(store, args.seed);
    controller
        .initialize(args.accounts, args.initial_balance)
        .await?;

    let report = controller.run_scenario(scenario).await?;

    info!("Simulation complete");
    info!("Total transfers: {}", report.metrics.total_transfers);
    info!("Successful: {}", report.metrics.successful_transfers);
    info!("Failed: {}", report.metrics.failed_transfers);
    info!("Average latency: {}us", report.metrics.average_latency_us);

    println!("{}", serde_json::to_string_pretty(&report)?);

    if !report.passed() {
        error!("{} check(s) failed", report.violations.len());
        anyhow::bail!("simulation checks failed");
    }

    Ok(())
}
