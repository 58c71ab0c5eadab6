//! `stockbook-admin`: operator commands for the stock ledger.

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;

use stockbook_core::ItemId;
use stockbook_infra::{CostingPolicy, LedgerConfig, PostgresLedgerStore, StockLedger};
use stockbook_ledger::LegacyCostMode;

#[derive(Parser, Debug)]
#[command(author, version, about = "stockbook: stock ledger administration", long_about = None)]
struct Cli {
    /// Postgres connection string (defaults to `DATABASE_URL`).
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Print reports as JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the ledger tables.
    Migrate,

    /// Recompute costs and snapshots for every item.
    #[command(
        after_help = "EXAMPLES:\n    stockbook-admin rebuild\n    stockbook-admin rebuild --policy lpp --json"
    )]
    Rebuild {
        #[arg(long, value_enum, default_value_t = PolicyArg::Fifo)]
        policy: PolicyArg,
    },

    /// Replay one item's ledger.
    Replay {
        #[arg(long)]
        item: ItemId,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum PolicyArg {
    Fifo,
    MovingAverage,
    Lpp,
}

impl PolicyArg {
    fn apply(self, config: LedgerConfig) -> (CostingPolicy, LedgerConfig) {
        match self {
            Self::Fifo => (CostingPolicy::Fifo, config),
            Self::MovingAverage => (
                CostingPolicy::MovingAverageOrLpp,
                config.with_legacy_cost_mode(LegacyCostMode::MovingAverage),
            ),
            Self::Lpp => (
                CostingPolicy::MovingAverageOrLpp,
                config.with_legacy_cost_mode(LegacyCostMode::LastPurchasePrice),
            ),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    stockbook_observability::init();

    let cli = Cli::parse();
    let config = LedgerConfig::from_env();
    let database_url = cli
        .database_url
        .clone()
        .or_else(|| config.database_url.clone())
        .context("DATABASE_URL must be set (or pass --database-url)")?;

    let store = PostgresLedgerStore::connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::Migrate => {
            store.migrate().await?;
            info!("ledger schema is up to date");
        }
        Commands::Rebuild { policy } => {
            let (policy, config) = policy.apply(config);
            let ledger = StockLedger::new(store, config);
            let report = ledger.rebuild_all(policy).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "Rebuild done. Items rebuilt={}, events updated={}",
                    report.items_rebuilt, report.events_updated
                );
            }
        }
        Commands::Replay { item } => {
            let ledger = StockLedger::new(store, config);
            let summary = ledger.replay_item(item).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!(
                    "Replayed {}: {} events, {} updated, {} provisional, on hand {}",
                    summary.item_id,
                    summary.events,
                    summary.updated,
                    summary.provisional,
                    summary.snapshot.quantity_on_hand
                );
            }
        }
    }

    Ok(())
}
