#![allow(clippy::module_name_repetitions)]

//! Interactive menu for the police log ETL.
//!
//! Provides a menu-driven interface using `dialoguer` for running the
//! pipeline and inspecting the stored snapshot without memorizing CLI
//! flags.

use dialoguer::{Input, Select};
use police_log_cli_utils::MultiProgress;
use police_log_database::LoadStrategy;
use police_log_source::FetchOptions;

use crate::config::PipelineConfig;

/// Top-level actions available in the interactive menu.
enum IngestAction {
    RunPipeline,
    ShowStatus,
    ShowRecent,
    ListSources,
    InitDatabase,
}

impl IngestAction {
    const ALL: &[Self] = &[
        Self::RunPipeline,
        Self::ShowStatus,
        Self::ShowRecent,
        Self::ListSources,
        Self::InitDatabase,
    ];

    #[must_use]
    const fn label(&self) -> &'static str {
        match self {
            Self::RunPipeline => "Run pipeline",
            Self::ShowStatus => "Show table status",
            Self::ShowRecent => "Show recent incidents",
            Self::ListSources => "List sources",
            Self::InitDatabase => "Initialize database",
        }
    }
}

/// Runs the interactive menu, prompting the user to select and configure
/// an operation.
///
/// # Errors
///
/// Returns an error if a prompt fails or the selected operation fails.
pub async fn run(
    mut config: PipelineConfig,
    multi: &MultiProgress,
) -> Result<(), Box<dyn std::error::Error>> {
    let labels: Vec<&str> = IngestAction::ALL.iter().map(IngestAction::label).collect();

    let idx = Select::new()
        .with_prompt("What would you like to do?")
        .items(&labels)
        .default(0)
        .interact()?;

    match IngestAction::ALL[idx] {
        IngestAction::RunPipeline => {
            let source_id = select_source()?;
            let limit = prompt_optional_u64("Record limit (empty for no limit)")?;
            config.strategy = select_strategy()?;

            let outcome =
                crate::run_pipeline(&config, &source_id, FetchOptions { limit }, Some(multi))
                    .await?;
            crate::report_outcome(outcome, false)?;
        }
        IngestAction::ShowStatus => crate::print_status(&config, false)?,
        IngestAction::ShowRecent => {
            let count: u32 = Input::new()
                .with_prompt("How many incidents?")
                .default(10)
                .interact_text()?;
            crate::print_recent(&config, count)?;
        }
        IngestAction::ListSources => crate::print_sources()?,
        IngestAction::InitDatabase => {
            let table = crate::open_table(&config)?;
            log::info!(
                "Initialized {} in {}",
                table.table(),
                config.db_path.display()
            );
        }
    }

    Ok(())
}

/// Prompts for a source, skipping the prompt when only one is configured.
fn select_source() -> Result<String, Box<dyn std::error::Error>> {
    let sources = crate::all_sources()?;
    if let [only] = sources.as_slice() {
        return Ok(only.id().to_string());
    }

    let labels: Vec<String> = sources
        .iter()
        .map(|s| format!("{} ({})", s.id(), s.name()))
        .collect();

    let idx = Select::new()
        .with_prompt("Which source?")
        .items(&labels)
        .default(0)
        .interact()?;

    Ok(sources[idx].id().to_string())
}

fn select_strategy() -> Result<LoadStrategy, Box<dyn std::error::Error>> {
    const STRATEGIES: &[LoadStrategy] = &[LoadStrategy::Replace, LoadStrategy::Upsert];

    let labels: Vec<String> = STRATEGIES
        .iter()
        .map(|s| match s {
            LoadStrategy::Replace => "replace (table becomes this snapshot)".to_string(),
            LoadStrategy::Upsert => "upsert (merge by id, keep older rows)".to_string(),
        })
        .collect();

    let idx = Select::new()
        .with_prompt("Load strategy")
        .items(&labels)
        .default(0)
        .interact()?;

    Ok(STRATEGIES[idx])
}

/// Prompts for an optional `u64` value. Returns `None` if the user enters
/// an empty string.
fn prompt_optional_u64(prompt: &str) -> Result<Option<u64>, Box<dyn std::error::Error>> {
    let input: String = Input::new()
        .with_prompt(prompt)
        .allow_empty(true)
        .interact_text()?;

    if input.trim().is_empty() {
        Ok(None)
    } else {
        Ok(Some(input.trim().parse()?))
    }
}
