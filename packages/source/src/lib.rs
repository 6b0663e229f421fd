#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Record source for the police log pipeline.
//!
//! A [`RecordSource`] fetches the complete current upstream snapshot and
//! hands it to the pipeline as a single untyped [`RawBatch`]. The Socrata
//! implementation lives in [`socrata`]; its definition (domain, dataset,
//! paging and retry settings) is embedded from TOML via [`registry`].

pub mod parsing;
pub mod progress;
pub mod registry;
pub mod retry;
pub mod socrata;
pub mod source_def;

use async_trait::async_trait;
use police_log_incident_models::RawBatch;

/// Errors that can occur during data source operations.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("HTTP {status} from {url}")]
    Status {
        /// Response status.
        status: reqwest::StatusCode,
        /// Requested URL.
        url: String,
    },

    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// The response was valid JSON but not the expected shape.
    #[error("Unexpected response shape: {message}")]
    Shape {
        /// Description of what went wrong.
        message: String,
    },

    /// A source definition could not be loaded.
    #[error("Invalid source definition {name}: {message}")]
    Definition {
        /// Definition file name.
        name: String,
        /// Parser message.
        message: String,
    },

    /// The background fetch task panicked or was cancelled.
    #[error("Fetch task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// Transient failures persisted past the retry policy.
    #[error("Source unavailable after {attempts} attempt(s): {last}")]
    Exhausted {
        /// Total attempts made.
        attempts: u32,
        /// The final error.
        last: Box<Self>,
    },
}

impl SourceError {
    /// Returns `true` if the error is likely transient and worth retrying.
    ///
    /// Timeouts, connection failures, a connection dropped while the body
    /// was being read, HTTP 429 and HTTP 5xx are transient. Other 4xx
    /// statuses and bodies that arrive whole but cannot be decoded are
    /// permanent.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request() || e.is_body(),
            Self::Status { status, .. } => {
                *status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
            Self::Json(_)
            | Self::Shape { .. }
            | Self::Definition { .. }
            | Self::Task(_)
            | Self::Exhausted { .. } => false,
        }
    }
}

/// Options that narrow a fetch.
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Maximum number of records to fetch. `None` fetches everything.
    pub limit: Option<u64>,
}

/// A provider of full incident snapshots.
///
/// Each call is a pure read: it performs network I/O but has no other side
/// effects. Two calls may return different batches as upstream data changes.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Returns a unique identifier for this source (e.g., `"cambridge_pd_log"`).
    fn id(&self) -> &str;

    /// Returns the human-readable name of this source.
    fn name(&self) -> &str;

    /// Fetches the complete current dataset, paginating until exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if a page cannot be fetched after the retry
    /// policy is exhausted or a response cannot be decoded.
    async fn fetch(&self) -> Result<RawBatch, SourceError>;
}
