//! Config-driven record source definition.
//!
//! [`SourceDefinition`] captures everything unique about an upstream
//! dataset in a serializable config struct: where it lives, how to page
//! through it, and how patiently to retry. Definitions are embedded from
//! TOML at compile time (see [`crate::registry`]).

use std::time::Duration;

use serde::Deserialize;

use crate::retry::RetryPolicy;

/// Default Socrata column used for stable pagination order.
const DEFAULT_ORDER_COLUMN: &str = ":id";

/// Default per-request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// A complete, config-driven source definition.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceDefinition {
    /// Unique identifier (e.g., `"cambridge_pd_log"`).
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// City the dataset covers.
    pub city: String,
    /// Two-letter state abbreviation.
    pub state: String,
    /// How to fetch raw data from the API.
    pub fetcher: FetcherConfig,
    /// Retry policy applied to every page request.
    #[serde(default)]
    pub retry: RetryPolicy,
}

/// How to fetch raw data from the source API.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FetcherConfig {
    /// Socrata SODA API (`$limit/$offset/$order`).
    Socrata {
        /// Portal domain (e.g., `"data.cambridgema.gov"`).
        domain: String,
        /// Four-by-four dataset identifier (e.g., `"3gki-wyrb"`).
        dataset_id: String,
        /// Column used for `$order`, so pages do not overlap.
        #[serde(default = "default_order_column")]
        order_column: String,
        /// Records per page.
        page_size: u64,
        /// Per-request timeout in seconds.
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },
}

fn default_order_column() -> String {
    DEFAULT_ORDER_COLUMN.to_string()
}

const fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl FetcherConfig {
    /// Returns the JSON resource URL for the dataset.
    #[must_use]
    pub fn api_url(&self) -> String {
        match self {
            Self::Socrata {
                domain, dataset_id, ..
            } => format!("https://{domain}/resource/{dataset_id}.json"),
        }
    }

    /// Returns the human-readable portal page for the dataset.
    #[must_use]
    pub fn portal_url(&self) -> String {
        match self {
            Self::Socrata {
                domain, dataset_id, ..
            } => format!("https://{domain}/d/{dataset_id}"),
        }
    }

    /// Returns the configured page size.
    #[must_use]
    pub const fn page_size(&self) -> u64 {
        match self {
            Self::Socrata { page_size, .. } => *page_size,
        }
    }

    /// Returns the per-request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        match self {
            Self::Socrata { timeout_secs, .. } => Duration::from_secs(*timeout_secs),
        }
    }

    /// Returns the `$order` column.
    #[must_use]
    pub fn order_column(&self) -> &str {
        match self {
            Self::Socrata { order_column, .. } => order_column,
        }
    }
}

impl SourceDefinition {
    /// Returns the unique source identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the human-readable source name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Parses a [`SourceDefinition`] from a TOML string.
///
/// # Errors
///
/// Returns an error if the TOML is malformed or missing required fields.
pub fn parse_source_toml(toml_str: &str) -> Result<SourceDefinition, toml::de::Error> {
    toml::de::from_str(toml_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_cambridge_toml() {
        let def = parse_source_toml(include_str!("../sources/cambridge.toml")).unwrap();
        assert_eq!(def.id(), "cambridge_pd_log");
        assert_eq!(def.state, "MA");
        assert_eq!(
            def.fetcher.api_url(),
            "https://data.cambridgema.gov/resource/3gki-wyrb.json"
        );
        assert_eq!(
            def.fetcher.portal_url(),
            "https://data.cambridgema.gov/d/3gki-wyrb"
        );
        assert_eq!(def.fetcher.timeout(), Duration::from_secs(30));
        assert_eq!(def.retry.max_retries, 3);
        assert_eq!(def.retry.delay, Duration::from_secs(10));
    }

    #[test]
    fn fills_in_defaults() {
        let def = parse_source_toml(
            r#"
            id = "x"
            name = "X"
            city = "Somewhere"
            state = "MA"

            [fetcher]
            type = "socrata"
            domain = "data.example.gov"
            dataset_id = "abcd-1234"
            page_size = 1000
            "#,
        )
        .unwrap();

        assert_eq!(def.fetcher.order_column(), ":id");
        assert_eq!(def.fetcher.timeout(), Duration::from_secs(30));
        assert_eq!(def.retry, RetryPolicy::default());
    }

    #[test]
    fn rejects_unknown_fetcher_type() {
        let result = parse_source_toml(
            r#"
            id = "x"
            name = "X"
            city = "Somewhere"
            state = "MA"

            [fetcher]
            type = "carrier_pigeon"
            "#,
        );
        assert!(result.is_err());
    }
}
