//! Run configuration resolved from the environment.

use std::path::PathBuf;
use std::time::Duration;

use police_log_database::incident_table::{DEFAULT_WRITE_TIMEOUT, StoreConfig};
use police_log_database::{DEFAULT_TABLE, LoadStrategy, paths};
use police_log_source::socrata::SocrataCredentials;

/// Socrata application token.
pub const APP_TOKEN_VAR: &str = "SOCRATA_APP_TOKEN";
/// Database file path.
pub const DB_PATH_VAR: &str = "POLICE_LOG_DB_PATH";
/// Destination table name.
pub const TABLE_VAR: &str = "POLICE_LOG_TABLE";

/// Everything a run needs that is not part of the source definition.
#[derive(Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Socrata application token, if any.
    pub app_token: Option<String>,
    /// `DuckDB` file.
    pub db_path: PathBuf,
    /// Destination table.
    pub table: String,
    /// Load strategy.
    pub strategy: LoadStrategy,
    /// Upper bound on the load.
    pub write_timeout: Duration,
}

impl std::fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("app_token", &self.app_token.as_ref().map(|_| "<redacted>"))
            .field("db_path", &self.db_path)
            .field("table", &self.table)
            .field("strategy", &self.strategy)
            .field("write_timeout", &self.write_timeout)
            .finish()
    }
}

impl PipelineConfig {
    /// Reads the configuration from process environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable lookup. Blank
    /// values are treated as unset.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            app_token: var(APP_TOKEN_VAR),
            db_path: var(DB_PATH_VAR).map_or_else(paths::default_db_path, PathBuf::from),
            table: var(TABLE_VAR).unwrap_or_else(|| DEFAULT_TABLE.to_string()),
            strategy: LoadStrategy::default(),
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }

    /// Socrata credentials for the source.
    #[must_use]
    pub fn credentials(&self) -> SocrataCredentials {
        SocrataCredentials {
            app_token: self.app_token.clone(),
        }
    }

    /// Storage settings, recording `source_name` in the sync metadata.
    #[must_use]
    pub fn store_config(&self, source_name: Option<&str>) -> StoreConfig {
        StoreConfig {
            path: Some(self.db_path.clone()),
            table: self.table.clone(),
            strategy: self.strategy,
            write_timeout: self.write_timeout,
            source_name: source_name.map(str::to_string),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> PipelineConfig {
        let vars: BTreeMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        PipelineConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_environment_is_empty() {
        let config = config(&[]);

        assert_eq!(config.app_token, None);
        assert_eq!(config.db_path, paths::default_db_path());
        assert_eq!(config.table, "cpd_incidents");
        assert_eq!(config.strategy, LoadStrategy::Replace);
    }

    #[test]
    fn reads_overrides() {
        let config = config(&[
            (APP_TOKEN_VAR, "secret"),
            (DB_PATH_VAR, "/tmp/log.duckdb"),
            (TABLE_VAR, "incidents"),
        ]);

        assert_eq!(config.credentials().app_token.as_deref(), Some("secret"));
        assert_eq!(config.db_path, PathBuf::from("/tmp/log.duckdb"));
        assert_eq!(config.table, "incidents");
    }

    #[test]
    fn blank_values_are_unset() {
        let config = config(&[(APP_TOKEN_VAR, "  "), (TABLE_VAR, "")]);

        assert_eq!(config.app_token, None);
        assert_eq!(config.table, DEFAULT_TABLE);
    }

    #[test]
    fn debug_output_hides_token() {
        let config = config(&[(APP_TOKEN_VAR, "secret")]);
        let rendered = format!("{config:?}");

        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn store_config_carries_run_settings() {
        let mut config = config(&[(DB_PATH_VAR, "/tmp/log.duckdb")]);
        config.strategy = LoadStrategy::Upsert;

        let store = config.store_config(Some("Cambridge"));
        assert_eq!(store.path, Some(PathBuf::from("/tmp/log.duckdb")));
        assert_eq!(store.strategy, LoadStrategy::Upsert);
        assert_eq!(store.source_name.as_deref(), Some("Cambridge"));
    }
}
