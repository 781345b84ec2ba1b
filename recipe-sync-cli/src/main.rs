use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use recipe_sync_core::config::Config;
use recipe_sync_core::core_catalog::{provider_for, ItemId, SubItemRef};
use recipe_sync_core::core_export::write_export;
use recipe_sync_core::core_selection::{SyncEngine, SyncHandle, SyncReport};
use recipe_sync_core::core_store::SelectionRecord;
use recipe_sync_core::logging::init_logging_with_config;
use recipe_sync_core::metrics::init_metrics;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "recipe-sync")]
#[command(author, version, about = "Keep a recipe selection in sync with a shared store", long_about = None)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Catalog file path or URL (overrides the configuration)
    #[arg(long)]
    catalog: Option<String>,

    /// Set the log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Enable JSON formatted logging
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// Print the current selection as JSON
    Status,
    /// Check an item and select all of its images
    Check { item: String },
    /// Uncheck an item and drop its images
    Uncheck { item: String },
    /// Toggle one image of an item
    Toggle { item: String, image: String },
    /// Replace the selected images of an item
    Select { item: String, images: Vec<String> },
    /// Write the selected recipes as JSON
    Export {
        /// Output file or directory (defaults to the configured file name)
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Follow changes from other clients until Ctrl-C
    Watch,
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = Config::load(args.config.as_deref()).context("loading configuration")?;
    if let Some(catalog) = &args.catalog {
        config.catalog.path = catalog.clone();
    }
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    if args.json_logs {
        config.logging.json_format = true;
    }
    config.validate()?;
    Ok(config)
}

fn parse_image(raw: &str) -> Result<SubItemRef> {
    SubItemRef::parse(raw).ok_or_else(|| anyhow!("'{}' is not a selectable image", raw))
}

/// Wait until the store has answered the upsert for `item`
async fn await_upsert(handle: &SyncHandle, record: SelectionRecord) -> Result<SelectionRecord> {
    let item = record.item_id.clone();
    let report = handle
        .wait_for_report(|r| match r {
            SyncReport::UpsertAcknowledged { item: acked } => acked == &item,
            SyncReport::UpsertFailed { item: failed, .. } => failed == &item,
            _ => false,
        })
        .await;

    match report {
        Some(SyncReport::UpsertAcknowledged { .. }) => Ok(record),
        Some(SyncReport::UpsertFailed { error, .. }) => Err(error.into()),
        _ => bail!("sync engine stopped before the upsert for {} completed", item),
    }
}

fn describe(report: &SyncReport) -> String {
    match report {
        SyncReport::Seeded { records } => format!("seeded from {} stored records", records),
        SyncReport::SeedFailed(e) => format!("seed failed: {}", e),
        SyncReport::Subscribed => "listening for changes".to_string(),
        SyncReport::SubscriptionFailed(e) => format!("live sync off: {}", e),
        SyncReport::UpsertAcknowledged { item } => format!("{}: saved", item),
        SyncReport::UpsertFailed { item, error } => format!("{}: not saved ({})", item, error),
        SyncReport::EventApplied { item, op } => format!("{}: {} by another client", item, op),
        SyncReport::EventDiscarded(e) => format!("ignored change: {}", e),
        SyncReport::EventSuperseded { item } => format!("{}: remote change overridden locally", item),
    }
}

async fn run(handle: &SyncHandle, command: Command, config: &Config) -> Result<()> {
    match command {
        Command::Status => {
            let snapshot = handle.snapshot().await?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        Command::Check { item } => {
            let record = handle.check_item(item).await?;
            let record = await_upsert(handle, record).await?;
            println!("{}", serde_json::to_string(&record)?);
        }
        Command::Uncheck { item } => {
            let record = handle.uncheck_item(item).await?;
            let record = await_upsert(handle, record).await?;
            println!("{}", serde_json::to_string(&record)?);
        }
        Command::Toggle { item, image } => {
            let record = handle.toggle_sub_item(item, parse_image(&image)?).await?;
            let record = await_upsert(handle, record).await?;
            println!("{}", serde_json::to_string(&record)?);
        }
        Command::Select { item, images } => {
            let images = images
                .iter()
                .map(|raw| parse_image(raw))
                .collect::<Result<Vec<_>>>()?;
            let record = handle.select_sub_items(ItemId::new(item), images).await?;
            let record = await_upsert(handle, record).await?;
            println!("{}", serde_json::to_string(&record)?);
        }
        Command::Export { out } => {
            let snapshot = handle.export().await?;
            let path = out.unwrap_or_else(|| config.export_path());
            let written = write_export(&snapshot, &path, config.export.pretty).await?;
            println!("{}", written.display());
        }
        Command::Watch => {
            info!("Watching for changes, Ctrl-C to stop");
            loop {
                tokio::select! {
                    report = handle.next_report() => match report {
                        Some(report) => {
                            println!("{}", describe(&report));
                            if matches!(report, SyncReport::EventApplied { .. }) {
                                let snapshot = handle.snapshot().await?;
                                println!("{}", serde_json::to_string(&snapshot)?);
                            }
                        }
                        None => break,
                    },
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    init_logging_with_config(config.logging.to_log_config()?)?;
    init_metrics();

    let catalog = provider_for(&config.catalog.path)
        .load()
        .await
        .with_context(|| format!("loading catalog from {}", config.catalog.path))?;
    let store = config.store.build_store()?;

    let (handle, engine) = SyncEngine::start(Arc::new(catalog), store, &config.sync);

    // Reports before the seed outcome are start-up noise for one-shot commands
    match handle
        .wait_for_report(|r| matches!(r, SyncReport::Seeded { .. } | SyncReport::SeedFailed(_)))
        .await
    {
        Some(SyncReport::SeedFailed(e)) => warn!(error = %e, "Continuing without stored selection"),
        Some(report) => info!("{}", describe(&report)),
        None => bail!("sync engine stopped during start-up"),
    }

    let result = run(&handle, args.command, &config).await;

    handle.shutdown().await?;
    engine.await?;
    result
}
