//! mirror-import: Build a client's asset mirror from its XAPK bundle.
//!
//! Extracts and decodes the bundled archives, restores logical asset paths,
//! converts the config database and decompiles scripts.
//!
//! # Usage
//!
//! ```bash
//! mirror-import game.xapk
//! mirror-import --client KR --no-clear --no-extract --no-rename --no-tidy
//! ```

use anyhow::Context;
use clap::Parser;
use env_logger::Env;
use log::{error, info};
use mirror_sync::{
    catalog::RENAME_ERROR_LOG, resolve_client, ExternalDecompiler, ImportStages, Importer,
    Settings,
};
use std::path::PathBuf;
use std::process;

/// Import a client's assets from an XAPK bundle.
#[derive(Parser, Debug)]
#[command(name = "mirror-import")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the XAPK bundle (required unless --no-extract)
    #[arg(value_name = "XAPK")]
    xapk: Option<PathBuf>,

    /// Client identifier; read from the bundle when omitted
    #[arg(short, long)]
    client: Option<String>,

    /// Keep existing asset directories
    #[arg(long)]
    no_clear: bool,

    /// Skip bundle extraction
    #[arg(long)]
    no_extract: bool,

    /// Skip restoring logical asset paths
    #[arg(long)]
    no_rename: bool,

    /// Skip moving leftover files
    #[arg(long)]
    no_tidy: bool,

    /// Skip config database conversion
    #[arg(long)]
    no_gameconfig: bool,

    /// Skip script decompilation
    #[arg(long)]
    no_decompile: bool,

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
    let stages = ImportStages {
        clear: !args.no_clear,
        extract: !args.no_extract,
        rename: !args.no_rename,
        tidy: !args.no_tidy,
        gameconfig: !args.no_gameconfig,
        decompile: !args.no_decompile,
    };

    let client = resolve_client(args.client.as_deref(), args.xapk.as_deref())?;
    let settings = Settings::load_interactive(&args.config, !args.no_prompt)
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    info!("Importing {} into {}", client.id, settings.asset_dir);

    let mut importer = Importer::new(settings.client_paths(&client))
        .with_stages(stages)
        .with_error_log(RENAME_ERROR_LOG, settings.error_log_threshold);
    if let Some(xapk) = &args.xapk {
        importer = importer.with_xapk(xapk);
    }
    if let Some(decompiler) = settings
        .decompiler
        .as_deref()
        .and_then(ExternalDecompiler::from_command)
    {
        importer = importer.with_decompiler(Box::new(decompiler));
    }

    let report = importer.run()?;
    if let Some(decoded) = report.decoded {
        info!("Decoded {} files ({} failed)", decoded.decoded, decoded.failed);
    }
    if let Some(renamed) = report.renamed {
        info!(
            "Restored {} assets ({} issues)",
            renamed.moved + renamed.copied,
            report.catalog_issues
        );
    }
    if let Some(tables) = report.tables_converted {
        info!("Converted {} tables ({} failed)", tables, report.tables_failed);
    }
    if let Some(scripts) = report.decompiled {
        info!(
            "Scripts: {} decompiled, {} renamed, {} failed",
            scripts.decompiled, scripts.renamed, scripts.failed
        );
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
