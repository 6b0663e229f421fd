#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for the police log ETL.
//!
//! `police_log_ingest run` performs one full run and exits non-zero if any
//! stage fails; it is the command a daily cron job invokes.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use police_log_database::LoadStrategy;
use police_log_ingest::config::PipelineConfig;
use police_log_ingest::{
    open_table, print_recent, print_sources, print_status, report_outcome, run_pipeline,
};
use police_log_source::FetchOptions;
use police_log_source::registry::DEFAULT_SOURCE_ID;

#[derive(Parser)]
#[command(name = "police_log_ingest", about = "Police log ETL pipeline")]
struct Cli {
    /// `DuckDB` file (overrides `POLICE_LOG_DB_PATH`)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Destination table (overrides `POLICE_LOG_TABLE`)
    #[arg(long, global = true)]
    table: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, validate, transform, and load one snapshot
    Run {
        /// Source identifier
        #[arg(long, default_value = DEFAULT_SOURCE_ID)]
        source: String,
        /// Maximum number of records to fetch (for testing)
        #[arg(long)]
        limit: Option<u64>,
        /// Load strategy: `replace` or `upsert`
        #[arg(long, default_value = "replace")]
        strategy: LoadStrategy,
        /// Print the run summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Create the database and incident table if they do not exist
    Init,
    /// Show the stored snapshot's record count and sync state
    Status {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the most recent stored incidents
    Recent {
        /// Number of incidents to show
        #[arg(long, default_value = "10")]
        count: u32,
    },
    /// List all configured data sources
    Sources,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = police_log_cli_utils::init_logger();
    let cli = Cli::parse();

    let mut config = PipelineConfig::from_env();
    if let Some(db) = cli.db {
        config.db_path = db;
    }
    if let Some(table) = cli.table {
        config.table = table;
    }

    let Some(command) = cli.command else {
        return police_log_ingest::interactive::run(config, &multi).await;
    };

    match command {
        Commands::Run {
            source,
            limit,
            strategy,
            json,
        } => {
            config.strategy = strategy;
            let progress = if json { None } else { Some(&multi) };
            let outcome = run_pipeline(&config, &source, FetchOptions { limit }, progress).await?;
            report_outcome(outcome, json)?;
        }
        Commands::Init => {
            let table = open_table(&config)?;
            log::info!(
                "Initialized {} in {}",
                table.table(),
                config.db_path.display()
            );
        }
        Commands::Status { json } => print_status(&config, json)?,
        Commands::Recent { count } => print_recent(&config, count)?,
        Commands::Sources => print_sources()?,
    }

    Ok(())
}
