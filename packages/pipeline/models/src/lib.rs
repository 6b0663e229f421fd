#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Run state, stage, and summary types for the police log pipeline.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// A pipeline stage. Every failure is attributed to exactly one stage.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Stage {
    /// Fetching the upstream snapshot.
    Extract,
    /// Schema gate, id coercion, and completeness gate.
    Validate,
    /// Deduplication, invalid-id filtering, and timestamp decomposition.
    Transform,
    /// Writing the destination table.
    Load,
}

impl Stage {
    /// All stages in execution order.
    pub const ALL: &[Self] = &[Self::Extract, Self::Validate, Self::Transform, Self::Load];

    /// 1-based position, used for step progress.
    #[must_use]
    pub const fn step(self) -> u64 {
        match self {
            Self::Extract => 1,
            Self::Validate => 2,
            Self::Transform => 3,
            Self::Load => 4,
        }
    }

    /// Human-readable label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Extract => "Extracting records",
            Self::Validate => "Validating batch",
            Self::Transform => "Transforming batch",
            Self::Load => "Loading table",
        }
    }
}

/// Lifecycle state of a single run.
///
/// `Extracting → Validating → Transforming → Loading → Succeeded`, with
/// `Failed` reachable from any non-terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunState {
    /// Fetching the snapshot from the source.
    Extracting,
    /// Checking schema, ids and required fields.
    Validating,
    /// Deduplicating, filtering and decomposing timestamps.
    Transforming,
    /// Writing the batch to the destination table.
    Loading,
    /// Every stage completed and the load committed.
    Succeeded,
    /// A stage failed; nothing after it ran.
    Failed {
        /// Stage that produced the failure.
        stage: Stage,
        /// Rendered cause.
        cause: String,
    },
}

impl RunState {
    /// The in-progress state for `stage`.
    #[must_use]
    pub const fn entering(stage: Stage) -> Self {
        match stage {
            Stage::Extract => Self::Extracting,
            Stage::Validate => Self::Validating,
            Stage::Transform => Self::Transforming,
            Stage::Load => Self::Loading,
        }
    }

    /// Whether no further transitions can happen.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed { .. })
    }
}

/// Counts collected over a run. Exclusions are data-level outcomes, not
/// failures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    /// Records received from the source.
    pub fetched: u64,
    /// Later rows dropped because an earlier row had the same id. All
    /// unparseable ids count as one id here.
    pub duplicates_removed: u64,
    /// Rows dropped because their id could not be parsed. At most one per
    /// batch, since deduplication runs first.
    pub invalid_ids_removed: u64,
    /// Rows whose `last_updated` was unreadable and stored as NULL.
    pub unreadable_last_updated: u64,
    /// Rows written by the load.
    pub stored: u64,
    /// Rows in the destination table after the load.
    pub table_rows: u64,
}

impl RunStats {
    /// Total rows excluded without failing the run.
    #[must_use]
    pub const fn excluded(&self) -> u64 {
        self.duplicates_removed + self.invalid_ids_removed
    }
}

/// Result of a completed (successful or failed) run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Display name of the source.
    pub source_name: String,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// How long the run took.
    pub duration: Duration,
    /// Final state.
    pub state: RunState,
    /// Every state entered, in order.
    pub transitions: Vec<RunState>,
    /// Counts collected before the run ended.
    pub stats: RunStats,
}

impl RunSummary {
    /// Whether the run ended in [`RunState::Succeeded`].
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        matches!(self.state, RunState::Succeeded)
    }
}
