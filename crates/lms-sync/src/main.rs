//! lms-sync - LMS data synchronization tool

use anyhow::{Context, Result};
use clap::Parser;
use lms_common::logging::{init_logging, LogConfig, LogLevel};
use lms_sync::api::ApiClient;
use lms_sync::config::Config;
use lms_sync::pipeline::{Pipeline, Stage, INGEST_STAGES, NORMALIZE_STAGES};
use lms_sync::store::{PgStore, SyncStore};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "lms-sync")]
#[command(author, version, about = "Synchronize LMS course data into a relational store")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Parser, Debug)]
enum Command {
    /// Run a synchronization batch: ingest raw API data, then normalize it
    Sync {
        /// Resume an existing pull instead of creating a new one
        #[arg(long)]
        pull: Option<i64>,

        /// Parse and map staged data without writing canonical rows
        #[arg(long)]
        dry_run: bool,

        /// Skip the ingestion stages (requires staged data from an earlier run)
        #[arg(long)]
        skip_ingest: bool,

        /// Skip the normalization stages
        #[arg(long)]
        skip_normalize: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    // Environment variables take precedence over the flag
    let log_config = LogConfig::with_level(log_level).from_env()?;
    init_logging(&log_config)?;

    match cli.command {
        Command::Sync {
            pull,
            dry_run,
            skip_ingest,
            skip_normalize,
        } => {
            sync(pull, dry_run, skip_ingest, skip_normalize).await?;
        },
    }

    Ok(())
}

async fn sync(
    pull_id: Option<i64>,
    dry_run: bool,
    skip_ingest: bool,
    skip_normalize: bool,
) -> Result<()> {
    let config = Config::load()?;
    if !config.exclusions.is_empty() {
        info!(excluded = config.exclusions.len(), "loaded course exclusions");
    }

    let client = ApiClient::new(&config.api)?;
    let store = PgStore::connect(&config.database)
        .await
        .context("failed to connect to the database")?;
    store.run_migrations().await?;

    let pull = match pull_id {
        Some(id) => store
            .get_pull(id)
            .await?
            .ok_or(lms_common::SyncError::PullNotFound(id))?,
        None => store.create_pull().await?,
    };
    info!(pull_id = pull.id, ts = %pull.ts, dry_run, "starting sync");

    let mut pipeline = Pipeline::new(&client, &store, &config.exclusions, dry_run);

    let mut stages: Vec<Stage> = Vec::new();
    if skip_ingest {
        // Staged data from an earlier invocation of this pull stands in
        for &stage in INGEST_STAGES {
            pipeline.assume_completed(stage);
        }
    } else {
        stages.extend_from_slice(INGEST_STAGES);
    }
    if !skip_normalize {
        stages.extend_from_slice(NORMALIZE_STAGES);
    }

    let reports = pipeline.run(&pull, &stages).await?;
    for report in &reports {
        info!(
            stage = %report.stage,
            processed = report.processed,
            skipped = report.skipped,
            "stage summary"
        );
    }

    info!(pull_id = pull.id, "sync complete");
    Ok(())
}
