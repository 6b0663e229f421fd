#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! The police log ETL pipeline.
//!
//! [`PipelineOrchestrator`] runs one batch through four strictly
//! sequential stages: extract from a [`RecordSource`], [`validate`],
//! [`transform`], and load through a [`TableWriter`]. The first failure
//! ends the run; it is reported with the [`Stage`] that produced it and the
//! destination table is left as it was.

pub mod transform;
pub mod validate;

use std::sync::Arc;
use std::time::Instant;

use police_log_database::{DbError, TableWriter};
use police_log_incident_models::SourceColumn;
use police_log_pipeline_models::{RunState, RunStats, RunSummary, Stage};
use police_log_source::progress::{ProgressCallback, null_progress};
use police_log_source::{RecordSource, SourceError};

/// A failure that ends a run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The source could not deliver a complete batch, after retries.
    #[error("Source unavailable: {0}")]
    SourceUnavailable(#[from] SourceError),

    /// The batch's columns differ from the expected source columns.
    #[error("Schema mismatch: missing {missing:?}, unexpected {unexpected:?}")]
    SchemaMismatch {
        /// Expected columns absent from the batch.
        missing: Vec<String>,
        /// Columns in the batch that are not expected.
        unexpected: Vec<String>,
    },

    /// A required column has missing values.
    #[error("Missing required field '{column}' in {count} row(s)")]
    MissingRequiredField {
        /// First offending column in check order.
        column: SourceColumn,
        /// Rows missing it.
        count: usize,
    },

    /// A `date_time` value could not be parsed.
    #[error("Invalid timestamp {value:?} for incident {id}")]
    InvalidTimestamp {
        /// Incident id.
        id: i64,
        /// Raw value.
        value: String,
    },

    /// The write failed and was rolled back.
    #[error("Storage error: {0}")]
    Storage(#[from] DbError),

    /// The blocking write task panicked or was cancelled.
    #[error("Load task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl PipelineError {
    /// The stage this error ends a run in.
    #[must_use]
    pub const fn stage(&self) -> Stage {
        match self {
            Self::SourceUnavailable(_) => Stage::Extract,
            Self::SchemaMismatch { .. } | Self::MissingRequiredField { .. } => Stage::Validate,
            Self::InvalidTimestamp { .. } => Stage::Transform,
            Self::Storage(_) | Self::Task(_) => Stage::Load,
        }
    }
}

/// Outcome of [`PipelineOrchestrator::run`]: the summary is always
/// present, the error only when the run failed.
#[derive(Debug)]
pub struct RunOutcome {
    /// What happened.
    pub summary: RunSummary,
    /// Why the run failed, if it did.
    pub error: Option<PipelineError>,
}

impl RunOutcome {
    /// Converts into a `Result`, dropping the summary on failure.
    ///
    /// # Errors
    ///
    /// Returns the run's [`PipelineError`] if it failed.
    pub fn into_result(self) -> Result<RunSummary, PipelineError> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.summary),
        }
    }
}

/// Runs the pipeline end to end. One instance may be run repeatedly, but
/// runs against the same destination must not overlap.
pub struct PipelineOrchestrator {
    source: Arc<dyn RecordSource>,
    writer: Arc<dyn TableWriter>,
    progress: Arc<dyn ProgressCallback>,
}

impl PipelineOrchestrator {
    /// Creates an orchestrator that reads from `source` and loads through
    /// `writer`, with no progress reporting.
    #[must_use]
    pub fn new(source: Arc<dyn RecordSource>, writer: Arc<dyn TableWriter>) -> Self {
        Self {
            source,
            writer,
            progress: null_progress(),
        }
    }

    /// Reports one step per stage to `progress`.
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    /// Runs one batch through every stage.
    pub async fn run(&self) -> RunOutcome {
        let started_at = chrono::Utc::now();
        let start = Instant::now();
        let mut tracker = RunTracker::new(self.progress.as_ref());

        log::info!("Starting pipeline run for {}", self.source.name());

        let error = self.execute(&mut tracker).await.err();

        let state = match &error {
            None => RunState::Succeeded,
            Some(e) => RunState::Failed {
                stage: e.stage(),
                cause: e.to_string(),
            },
        };

        let duration = start.elapsed();
        match &error {
            None => {
                log::info!(
                    "Pipeline run succeeded in {duration:.1?}: {} fetched, {} stored, {} excluded",
                    tracker.stats.fetched,
                    tracker.stats.stored,
                    tracker.stats.excluded()
                );
                self.progress
                    .finish(format!("Stored {} incidents", tracker.stats.stored));
            }
            Some(e) => {
                log::error!("Pipeline run failed during {} stage: {e}", e.stage());
                self.progress.finish(format!("Failed during {}", e.stage()));
            }
        }

        tracker.transitions.push(state.clone());

        RunOutcome {
            summary: RunSummary {
                source_name: self.source.name().to_string(),
                started_at,
                duration,
                state,
                transitions: tracker.transitions,
                stats: tracker.stats,
            },
            error,
        }
    }

    async fn execute(&self, tracker: &mut RunTracker<'_>) -> Result<(), PipelineError> {
        tracker.enter(Stage::Extract);
        let batch = self.source.fetch().await?;
        tracker.stats.fetched = batch.len() as u64;
        tracker.complete(Stage::Extract);

        tracker.enter(Stage::Validate);
        let rows = validate::validate(batch)?;
        tracker.complete(Stage::Validate);

        tracker.enter(Stage::Transform);
        let (rows, duplicates) = transform::dedupe(rows);
        let (rows, invalid) = transform::drop_invalid_ids(rows);
        let expanded = transform::expand_datetime(rows)?;
        tracker.stats.duplicates_removed = duplicates;
        tracker.stats.invalid_ids_removed = invalid;
        tracker.stats.unreadable_last_updated = expanded.unreadable_last_updated;
        tracker.complete(Stage::Transform);

        tracker.enter(Stage::Load);
        let writer = Arc::clone(&self.writer);
        let incidents = expanded.incidents;
        let written = tokio::task::spawn_blocking(move || writer.write(&incidents)).await??;
        tracker.stats.stored = written.rows_written;
        tracker.stats.table_rows = written.table_rows;
        tracker.complete(Stage::Load);

        Ok(())
    }
}

/// Records state transitions and stats, and mirrors them to the log and
/// progress callback.
struct RunTracker<'a> {
    progress: &'a dyn ProgressCallback,
    transitions: Vec<RunState>,
    stats: RunStats,
}

impl<'a> RunTracker<'a> {
    fn new(progress: &'a dyn ProgressCallback) -> Self {
        progress.set_total(Stage::ALL.len() as u64);
        Self {
            progress,
            transitions: Vec::new(),
            stats: RunStats::default(),
        }
    }

    fn enter(&mut self, stage: Stage) {
        let state = RunState::entering(stage);
        log::info!("[{}/{}] {}", stage.step(), Stage::ALL.len(), stage.label());
        self.progress.set_message(stage.label().to_string());
        self.transitions.push(state);
    }

    fn complete(&self, stage: Stage) {
        log::debug!("Completed {stage} stage");
        self.progress.inc(1);
    }
}
