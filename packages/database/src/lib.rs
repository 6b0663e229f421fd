#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! `DuckDB` storage for police log incidents.
//!
//! The destination is a single incidents table (plus a `_meta` key/value
//! table) in a `DuckDB` file. [`incident_table::IncidentTable`] implements
//! [`TableWriter`], which loads a transformed batch atomically: either the
//! whole batch lands or the table keeps its prior contents.

pub mod db;
pub mod incident_table;
pub mod paths;

use std::time::Duration;

use police_log_incident_models::StoredIncident;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Default destination table name.
pub const DEFAULT_TABLE: &str = "cpd_incidents";

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// `DuckDB` query or connection error.
    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),

    /// I/O error (creating the data directory).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The configured table name is not a plain SQL identifier.
    #[error("Invalid table name: {name:?}")]
    InvalidTableName {
        /// The rejected name.
        name: String,
    },

    /// The write did not finish within the configured timeout and was
    /// rolled back.
    #[error("Write exceeded timeout of {limit:?} and was rolled back")]
    Timeout {
        /// The configured limit.
        limit: Duration,
    },

    /// A previous holder of the connection lock panicked.
    #[error("Database connection lock poisoned")]
    Poisoned,

    /// Data conversion error.
    #[error("Data conversion error: {message}")]
    Conversion {
        /// Description of what went wrong.
        message: String,
    },
}

/// How a batch is loaded into the destination table.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LoadStrategy {
    /// The batch becomes the entire table contents.
    #[default]
    Replace,
    /// The batch is merged by `id`; rows absent from the batch are kept.
    Upsert,
}

/// Result of a successful write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteSummary {
    /// Rows written by this load.
    pub rows_written: u64,
    /// Rows in the table after the load.
    pub table_rows: u64,
    /// Strategy used.
    pub strategy: LoadStrategy,
}

/// Destination for a fully transformed batch.
pub trait TableWriter: Send + Sync {
    /// Ensures the destination table exists, then loads `incidents` in a
    /// single transaction.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if any statement fails or the write times out.
    /// The table is left unmodified in either case.
    fn write(&self, incidents: &[StoredIncident]) -> Result<WriteSummary, DbError>;
}
