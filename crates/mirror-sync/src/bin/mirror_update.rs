//! mirror-update: Bring a client's mirrored assets up to date.
//!
//! Checks the version service for the client, applies every pending update
//! package or patch, records the changed files and publishes a snapshot.
//!
//! # Usage
//!
//! ```bash
//! mirror-update --client EN
//! ```

use anyhow::Context;
use clap::Parser;
use env_logger::Env;
use log::{error, info, warn};
use mirror_sync::{
    ClientRegistry, GitSnapshotStore, ReqwestTransport, Settings, SyncOutcome, Synchronizer,
};
use std::path::PathBuf;
use std::process;
use std::time::Duration;

/// Synchronize a client's asset mirror with the version service.
#[derive(Parser, Debug)]
#[command(name = "mirror-update")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Client identifier (EN, KR, TW_OLD, JP, TW)
    #[arg(short, long)]
    client: String,

    /// Path to the settings file
    #[arg(long, default_value = "config.json")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Fail instead of asking for missing settings
    #[arg(long)]
    no_prompt: bool,
}

fn run(args: &Args) -> anyhow::Result<()> {
    let client = *ClientRegistry::global()
        .get(&args.client)
        .with_context(|| format!("unknown client {}", args.client))?;
    if !client.active {
        warn!("Client {} is no longer active", client.id);
    }

    let settings = Settings::load_interactive(&args.config, !args.no_prompt)
        .with_context(|| format!("failed to load {}", args.config.display()))?;

    info!("Starting version check for {}", client.id);
    let transport = ReqwestTransport::new(Duration::from_secs(120))?;
    let snapshot = GitSnapshotStore::new(&settings.asset_repo);
    let mut sync = Synchronizer::from_settings(&settings, client, transport, snapshot);
    let report = sync.synchronize()?;

    for applied in &report.applied {
        info!(
            "Applied version {} ({} changes, ledger {})",
            applied.actual_version,
            applied.changes.len(),
            applied.ledger_path.display()
        );
    }
    match report.outcome {
        SyncOutcome::UpToDate => info!("{} is up to date", client.id),
        SyncOutcome::Patched { version } => info!("{} patched to {}", client.id, version),
        SyncOutcome::Maintenance { notice } => warn!("Maintenance: {}", notice),
        SyncOutcome::ForceUpdateRequired => warn!("{} needs a new client build", client.id),
        SyncOutcome::Unknown(code) => warn!("Server returned unknown code {}", code),
    }
    Ok(())
}

fn main() {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_timestamp_millis()
        .init();

    if let Err(e) = run(&args) {
        error!("{:#}", e);
        process::exit(1);
    }
}
