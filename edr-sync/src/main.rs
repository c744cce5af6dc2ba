//! edr-sync: Keeps the EDR review sheet in step with the design-doc folder
//!
//! Polls the Drive folder that holds engineering design reviews, scores each
//! document's urgency and writes the result to the tracking spreadsheet,
//! leaving the Status and Notes columns to the reviewers.

mod config;
mod demo;
mod logging;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{info, warn};

use config::{Config, Overrides};
use edr_core::auth::{AuthorizedUserToken, TokenSource};
use edr_core::daemon::SyncDaemon;
use edr_core::model::{DocumentRecord, SourceDocument};
use edr_core::priority::rank_by_urgency;
use edr_core::source::{DocumentSource, DriveSource};
use edr_core::store::{DocumentStore, SheetsStore};
use edr_core::summary::ReviewSummary;

#[derive(Parser)]
#[command(name = "edr-sync")]
#[command(about = "Sync daemon for the EDR review tracking sheet")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "edr-sync.toml")]
    config: String,

    /// Spreadsheet id (overrides config file)
    #[arg(long, env = "EDR_STORE_ID")]
    store_id: Option<String>,

    /// Drive folder id (overrides config file)
    #[arg(long, env = "EDR_FOLDER_ID")]
    folder_id: Option<String>,

    /// OAuth authorized-user file (overrides config file)
    #[arg(long, env = "EDR_CREDENTIALS")]
    credentials: Option<PathBuf>,

    /// Minutes between sync cycles (overrides config file)
    #[arg(long, env = "EDR_INTERVAL_MINUTES")]
    interval_minutes: Option<u64>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Sync on the configured interval until interrupted (default)
    Run,
    /// Run a single sync cycle and exit
    Once,
    /// List the tracked documents with their scores, without writing
    Scan,
    /// Summarize the tracking sheet
    Report {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
        /// Number of urgent reviews to list
        #[arg(long, default_value_t = 10)]
        top: usize,
    },
    /// Write demo documents into the tracking sheet
    SeedDemo {
        /// Random documents on top of the fixed scenarios
        #[arg(long, default_value_t = 5)]
        filler: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(Path::new(&cli.config))?;
    config.apply(Overrides {
        store_id: cli.store_id,
        folder_id: cli.folder_id,
        credentials: cli.credentials,
        interval_minutes: cli.interval_minutes,
    });

    let _log_guard = logging::init(&config.logging)?;
    info!(config = %cli.config, "Starting edr-sync");

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(&config).await,
        Command::Once => once(&config).await,
        Command::Scan => scan(&config).await,
        Command::Report { json, top } => report(&config, json, top).await,
        Command::SeedDemo { filler } => seed_demo(&config, filler).await,
    }
}

fn tokens(config: &Config) -> anyhow::Result<Arc<dyn TokenSource>> {
    let path = &config.google.credentials;
    let tokens = AuthorizedUserToken::from_file(path)
        .with_context(|| format!("loading credentials from {}", path.display()))?;
    Ok(Arc::new(tokens))
}

fn drive(config: &Config, tokens: Arc<dyn TokenSource>) -> DriveSource {
    DriveSource::new(tokens).with_base_url(config.google.drive_api_base.as_str())
}

fn sheets(config: &Config, tokens: Arc<dyn TokenSource>) -> SheetsStore {
    SheetsStore::new(config.google.store_id.trim(), tokens)
        .with_base_url(config.google.sheets_api_base.as_str())
        .with_worksheet(config.google.worksheet.as_str())
}

fn daemon(config: &Config) -> anyhow::Result<SyncDaemon> {
    config.validate()?;
    let tokens = tokens(config)?;
    Ok(SyncDaemon::new(
        Arc::new(drive(config, tokens.clone())),
        Arc::new(sheets(config, tokens)),
        config.daemon_config(),
    ))
}

async fn run(config: &Config) -> anyhow::Result<()> {
    let daemon = daemon(config)?;
    info!(
        store = %config.google.store_id,
        folder = %config.google.folder_filter,
        interval_minutes = config.sync.interval_minutes,
        missing_policy = ?config.sync.missing_policy,
        "Sync daemon starting"
    );

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };
    daemon.run_until(shutdown).await?;

    info!("edr-sync stopped");
    Ok(())
}

async fn once(config: &Config) -> anyhow::Result<()> {
    let report = daemon(config)?.run_cycle().await?;
    println!(
        "fetched {} (invalid {}), created {}, updated {}, unchanged {}, missing {}, written {}, skipped {}",
        report.fetched,
        report.invalid_documents,
        report.created,
        report.updated,
        report.unchanged,
        report.missing,
        report.written,
        report.skipped.len()
    );
    Ok(())
}

async fn scan(config: &Config) -> anyhow::Result<()> {
    config.require_folder()?;
    let source = drive(config, tokens(config)?);
    let now = Utc::now();

    let mut records = Vec::new();
    for raw in source.list_tracked_documents(&config.folder()).await? {
        match SourceDocument::try_from(raw) {
            Ok(doc) => records.push(DocumentRecord::discovered(&doc, now)),
            Err(e) => warn!(error = %e, "Skipping malformed document"),
        }
    }
    rank_by_urgency(&mut records);

    println!("{:>5}  {:<8}  {:<20}  {}", "SCORE", "TIER", "OWNER", "DOCUMENT");
    for record in &records {
        println!(
            "{:>5}  {:<8}  {:<20}  {}",
            record.priority_score, record.priority_tier, record.owner, record.name
        );
    }
    println!("{} documents", records.len());
    Ok(())
}

async fn report(config: &Config, json: bool, top: usize) -> anyhow::Result<()> {
    config.require_store()?;
    let store = sheets(config, tokens(config)?);
    let snapshot = store.read_all().await?;
    if !snapshot.malformed.is_empty() {
        warn!(rows = snapshot.malformed.len(), "Some rows could not be read");
    }

    let summary = ReviewSummary::from_records(snapshot.records.values(), top);
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("{} reviews, {} open, {} missing from Drive", summary.total, summary.open, summary.missing);
    println!();
    println!("By status:");
    for (status, count) in &summary.by_status {
        println!("  {:<14} {}", status, count);
    }
    println!("By tier:");
    for (tier, count) in &summary.by_tier {
        println!("  {:<14} {}", tier, count);
    }
    println!("Workload:");
    for (owner, statuses) in &summary.by_owner {
        let breakdown: Vec<String> = statuses
            .iter()
            .map(|(status, count)| format!("{} {}", count, status))
            .collect();
        println!("  {:<20} {}", owner, breakdown.join(", "));
    }
    println!("Most urgent:");
    for doc in &summary.most_urgent {
        println!(
            "  {:>4} {:<8} {:<14} {} ({})",
            doc.priority_score, doc.priority_tier, doc.status, doc.name, doc.owner
        );
    }
    Ok(())
}

async fn seed_demo(config: &Config, filler: usize) -> anyhow::Result<()> {
    config.require_store()?;
    let store = sheets(config, tokens(config)?);
    let mut rng = StdRng::from_entropy();

    let written = demo::seed(&store, &mut rng, filler, Utc::now()).await?;
    println!("Seeded {} demo documents", written);
    Ok(())
}
