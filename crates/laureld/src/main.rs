//! Laurel Daemon - progress & rewards service
//!
//! Serves achievements, points, leaderboards and referrals over HTTP/JSON on
//! localhost.

use anyhow::{Context, Result};
use clap::Parser;
use laurel_common::referral::ReferralLedger;
use laurel_common::{LaurelConfig, RewardsEngine, SqliteFactStore, SqliteUnlockRegistry};
use laureld::server::{self, AppState};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "laureld", version, about = "Laurel progress & rewards daemon")]
struct Args {
    /// Config file (otherwise $LAUREL_CONFIG, /etc/laurel, /var/lib/laurel)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the configured bind address
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    info!("[BOOT] Laurel Daemon v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = LaurelConfig::load(args.config.as_deref());
    info!("[BOOT] Config loaded");

    let facts = SqliteFactStore::open(&config.storage.facts_db).with_context(|| {
        format!(
            "Failed to open fact store at {}",
            config.storage.facts_db.display()
        )
    })?;
    let registry = SqliteUnlockRegistry::open(&config.storage.rewards_db, &config.unlock)
        .with_context(|| {
            format!(
                "Failed to open unlock registry at {}",
                config.storage.rewards_db.display()
            )
        })?;
    info!("[BOOT] Storage ready");

    let ledger = ReferralLedger::new(&facts);
    let engine = RewardsEngine::new(Arc::new(facts), Arc::new(registry), &config).with_ledger(ledger);
    info!("[BOOT] Catalog ready ({} achievements)", engine.catalog().len());

    let bind = args.bind.unwrap_or_else(|| config.server.bind.clone());
    let state = AppState::new(
        engine,
        Duration::from_secs(config.server.request_timeout_secs.max(1)),
    );

    info!("[READY] laureld operational");
    server::run(state, &bind).await
}
