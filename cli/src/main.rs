//! ChainLedger CLI — operator tooling for the canonical ledger.
//!
//! # Commands
//! ```bash
//! chainledger info
//! chainledger audit   --db ./ledger.db --chain ethereum [--since <unix>] [--until <unix>]
//! chainledger records --db ./ledger.db --chain ethereum --record-type transfer [--all]
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use chainledger_core::normalize::RecordType;
use chainledger_core::store::{LedgerStore, QueryView};
use chainledger_storage::sqlite::SqliteLedger;

#[derive(Parser)]
#[command(
    name = "chainledger",
    about = "Reorg-safe canonical ledger for decoded contract events",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show build configuration info
    Info,
    /// Query the reorg audit trail of a SQLite ledger
    Audit {
        /// Path to the SQLite ledger file
        #[arg(long)]
        db: String,
        /// Chain slug (e.g. "ethereum")
        #[arg(long)]
        chain: String,
        /// Only events detected at or after this Unix timestamp
        #[arg(long, default_value_t = 0)]
        since: i64,
        /// Only events detected at or before this Unix timestamp
        #[arg(long, default_value_t = i64::MAX)]
        until: i64,
    },
    /// List ledger records of one type
    Records {
        /// Path to the SQLite ledger file
        #[arg(long)]
        db: String,
        /// Chain slug (e.g. "ethereum")
        #[arg(long)]
        chain: String,
        /// Record type: block | transfer | approval | generic
        #[arg(long)]
        record_type: RecordType,
        /// Include non-canonical (demoted) rows
        #[arg(long)]
        all: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    match Cli::parse().command {
        Commands::Info => cmd_info(),
        Commands::Audit { db, chain, since, until } => cmd_audit(&db, &chain, since, until).await?,
        Commands::Records { db, chain, record_type, all } => {
            cmd_records(&db, &chain, record_type, all).await?
        }
    }
    Ok(())
}

fn cmd_info() {
    println!("ChainLedger v{}", env!("CARGO_PKG_VERSION"));
    println!("  Default poll interval: 2000 ms");
    println!("  Default max reorg depth: 64 blocks");
    println!("  Default fetch retries: 3 (exponential backoff)");
    println!("  Record types: block, transfer, approval, generic");
    println!("  Storage backends: memory, SQLite (feature: sqlite)");
}

async fn cmd_audit(db: &str, chain: &str, since: i64, until: i64) -> Result<()> {
    let store = SqliteLedger::open(db)
        .await
        .with_context(|| format!("opening ledger at {db}"))?;
    let events = store
        .reorg_events(chain, since, until)
        .await
        .context("querying reorg audit trail")?;

    if events.is_empty() {
        println!("No reorg events for {chain} in the given window.");
        return Ok(());
    }

    for event in events {
        let when = chrono::DateTime::from_timestamp(event.detected_at, 0)
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| event.detected_at.to_string());
        println!(
            "{when}  depth={}  {} -> {}  ancestor={}  orphaned={}",
            event.depth,
            event.old_head,
            event.new_head,
            event.common_ancestor,
            event.affected_blocks.len(),
        );
    }
    Ok(())
}

async fn cmd_records(db: &str, chain: &str, record_type: RecordType, all: bool) -> Result<()> {
    let store = SqliteLedger::open(db)
        .await
        .with_context(|| format!("opening ledger at {db}"))?;
    let view = if all {
        QueryView::IncludeNonCanonical
    } else {
        QueryView::CanonicalOnly
    };
    let records = store
        .records_by_type(chain, record_type, view)
        .await
        .context("querying records")?;

    println!("{} {record_type} record(s) for {chain}:", records.len());
    for record in records {
        println!(
            "  block {} ({})  tx {}  log {}  canonical={}",
            record.meta.block_number,
            record.meta.block_hash,
            record.meta.tx_hash,
            record.meta.log_index,
            record.meta.canonical,
        );
    }
    Ok(())
}
