#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Library behind the `police_log_ingest` CLI: wires a configured source,
//! the `DuckDB` incident table, and the pipeline orchestrator together
//! for one guarded run.

pub mod config;
pub mod interactive;
pub mod lock;

use std::path::PathBuf;
use std::sync::Arc;

use police_log_cli_utils::{IndicatifProgress, MultiProgress};
use police_log_database::DbError;
use police_log_database::incident_table::IncidentTable;
use police_log_pipeline::{PipelineError, PipelineOrchestrator, RunOutcome};
use police_log_pipeline_models::RunSummary;
use police_log_source::progress::null_progress;
use police_log_source::socrata::SocrataSource;
use police_log_source::source_def::SourceDefinition;
use police_log_source::{FetchOptions, SourceError, registry};

use crate::config::PipelineConfig;
use crate::lock::RunLock;

/// Errors surfaced by the CLI.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Source definition or client setup failed.
    #[error(transparent)]
    Source(#[from] SourceError),

    /// Opening or querying the database failed.
    #[error(transparent)]
    Database(#[from] DbError),

    /// The pipeline run failed.
    #[error("Run failed during {stage} stage: {0}", stage = .0.stage())]
    Pipeline(#[from] PipelineError),

    /// Another run holds the lock for this database.
    #[error("Another run is in progress (lock file {})", lock.display())]
    AlreadyRunning {
        /// Lock file path.
        lock: PathBuf,
    },

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Output serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Returns all configured data sources from the embedded registry.
///
/// # Errors
///
/// Returns [`IngestError::Source`] if an embedded definition is malformed.
pub fn all_sources() -> Result<Vec<SourceDefinition>, IngestError> {
    Ok(registry::all_sources()?)
}

/// Opens the configured incident table, creating the schema if needed.
///
/// # Errors
///
/// Returns [`IngestError::Database`] if the database cannot be opened.
pub fn open_table(config: &PipelineConfig) -> Result<IncidentTable, IngestError> {
    Ok(IncidentTable::open(&config.store_config(None))?)
}

/// Runs the pipeline once for `source_id` while holding the run lock.
///
/// Progress bars are drawn on `multi` when given. A failed run is returned
/// as an outcome, not an error; errors here mean the run could not start.
///
/// # Errors
///
/// Returns [`IngestError`] if the source is unknown, the lock is held, or
/// the database or HTTP client cannot be set up.
pub async fn run_pipeline(
    config: &PipelineConfig,
    source_id: &str,
    options: FetchOptions,
    multi: Option<&MultiProgress>,
) -> Result<RunOutcome, IngestError> {
    let definition = registry::find_source(source_id)?;
    let source_name = definition.name().to_string();

    let _lock = RunLock::acquire(&config.db_path)?;
    log::info!(
        "Running {source_name} into {} (table {}, {} strategy)",
        config.db_path.display(),
        config.table,
        config.strategy
    );

    let table = IncidentTable::open(&config.store_config(Some(&source_name)))?;

    let (fetch_progress, stage_progress) = multi.map_or_else(
        || (null_progress(), null_progress()),
        |multi| {
            (
                IndicatifProgress::records_bar(multi, &format!("Fetching {source_name}")),
                IndicatifProgress::stages_bar(multi, "Pipeline"),
            )
        },
    );

    let source = SocrataSource::new(definition, config.credentials(), options, fetch_progress)?;

    Ok(PipelineOrchestrator::new(Arc::new(source), Arc::new(table))
        .with_progress(stage_progress)
        .run()
        .await)
}

/// Prints a run outcome, then converts it into the process result.
///
/// # Errors
///
/// Returns [`IngestError::Pipeline`] if the run failed.
pub fn report_outcome(outcome: RunOutcome, json: bool) -> Result<RunSummary, IngestError> {
    if json {
        println!("{}", serde_json::to_string_pretty(&outcome.summary)?);
    } else {
        print_summary(&outcome.summary);
    }

    Ok(outcome.into_result()?)
}

fn print_summary(summary: &RunSummary) {
    let stats = &summary.stats;
    let verdict = if summary.succeeded() {
        "succeeded"
    } else {
        "FAILED"
    };

    println!(
        "{} run {verdict} in {:.1}s",
        summary.source_name,
        summary.duration.as_secs_f64()
    );
    println!("  {:<24} {}", "fetched", stats.fetched);
    println!("  {:<24} {}", "duplicates removed", stats.duplicates_removed);
    println!("  {:<24} {}", "invalid ids removed", stats.invalid_ids_removed);
    println!(
        "  {:<24} {}",
        "unreadable last_updated", stats.unreadable_last_updated
    );
    println!("  {:<24} {}", "stored", stats.stored);
    println!("  {:<24} {}", "table rows", stats.table_rows);
}

/// Prints the configured sources.
///
/// # Errors
///
/// Returns [`IngestError::Source`] if an embedded definition is malformed.
pub fn print_sources() -> Result<(), IngestError> {
    let sources = all_sources()?;
    println!("{:<20} {:<40} PORTAL", "ID", "NAME");
    println!("{}", "-".repeat(100));
    for source in &sources {
        println!(
            "{:<20} {:<40} {}",
            source.id(),
            source.name(),
            source.fetcher.portal_url()
        );
    }
    Ok(())
}

/// Prints the stored snapshot's status.
///
/// # Errors
///
/// Returns [`IngestError`] if the database cannot be queried.
pub fn print_status(config: &PipelineConfig, json: bool) -> Result<(), IngestError> {
    let status = open_table(config)?.status()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    let or_never = |v: Option<String>| v.unwrap_or_else(|| "never".to_string());

    println!("Database:         {}", config.db_path.display());
    println!("Table:            {}", status.table);
    println!("Records:          {}", status.record_count);
    println!(
        "Latest incident:  {}",
        or_never(status.latest_date_time.map(|d| d.to_string()))
    );
    println!("Last synced:      {}", or_never(status.last_synced_at));
    println!("Source:           {}", or_never(status.source_name));
    Ok(())
}

/// Prints the `count` most recent stored incidents.
///
/// # Errors
///
/// Returns [`IngestError`] if the database cannot be queried.
pub fn print_recent(config: &PipelineConfig, count: u32) -> Result<(), IngestError> {
    let incidents = open_table(config)?.recent(count)?;

    if incidents.is_empty() {
        println!("No incidents stored.");
        return Ok(());
    }

    println!("{:<12} {:<20} {:<30} LOCATION", "ID", "DATE_TIME", "TYPE");
    println!("{}", "-".repeat(100));
    for incident in &incidents {
        println!(
            "{:<12} {:<20} {:<30} {}",
            incident.id,
            incident.date_time.format("%Y-%m-%d %H:%M:%S").to_string(),
            incident.incident_type,
            incident.location
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use police_log_database::LoadStrategy;
    use police_log_database::TableWriter;
    use police_log_source::registry::DEFAULT_SOURCE_ID;

    use super::*;

    fn temp_config(dir: &tempfile::TempDir) -> PipelineConfig {
        PipelineConfig {
            db_path: dir.path().join("police_log.duckdb"),
            ..PipelineConfig::from_lookup(|_| None)
        }
    }

    #[test]
    fn lists_embedded_sources() {
        let sources = all_sources().unwrap();
        assert!(sources.iter().any(|s| s.id() == DEFAULT_SOURCE_ID));
    }

    #[test]
    fn open_table_creates_empty_schema() {
        let dir = tempfile::tempdir().unwrap();
        let table = open_table(&temp_config(&dir)).unwrap();

        assert_eq!(table.record_count().unwrap(), 0);
        assert_eq!(table.strategy(), LoadStrategy::Replace);
        assert!(table.load_all().unwrap().is_empty());
    }

    #[test]
    fn open_table_writes_through_configured_table() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = temp_config(&dir);
        config.table = "incidents_test".to_string();

        let table = open_table(&config).unwrap();
        let summary = table.write(&[]).unwrap();

        assert_eq!(table.table(), "incidents_test");
        assert_eq!(summary.table_rows, 0);
    }

    #[test]
    fn pipeline_errors_name_their_stage() {
        let err = IngestError::from(PipelineError::InvalidTimestamp {
            id: 7,
            value: "not-a-date".to_string(),
        });

        assert_eq!(
            err.to_string(),
            "Run failed during transform stage: Invalid timestamp \"not-a-date\" for incident 7"
        );
    }

    #[tokio::test]
    async fn unknown_source_fails_before_locking() {
        let dir = tempfile::tempdir().unwrap();
        let config = temp_config(&dir);

        let result = run_pipeline(&config, "atlantis_pd", FetchOptions::default(), None).await;

        assert!(matches!(result, Err(IngestError::Source(_))));
        assert!(!police_log_database::paths::lock_path(&config.db_path).exists());
    }

    #[tokio::test]
    async fn held_lock_blocks_a_second_run() {
        let dir = tempfile::tempdir().unwrap();
        let config = temp_config(&dir);
        let _held = RunLock::acquire(&config.db_path).unwrap();

        let result =
            run_pipeline(&config, DEFAULT_SOURCE_ID, FetchOptions::default(), None).await;

        assert!(matches!(result, Err(IngestError::AlreadyRunning { .. })));
    }
}
