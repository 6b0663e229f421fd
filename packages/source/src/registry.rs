//! Source registry. Loads all source definitions from embedded TOML configs.
//!
//! Each `.toml` file in `packages/source/sources/` is baked into the binary
//! at compile time via [`include_str!`].

use crate::SourceError;
use crate::source_def::{SourceDefinition, parse_source_toml};

/// TOML configs embedded at compile time.
const SOURCE_TOMLS: &[(&str, &str)] = &[("cambridge", include_str!("../sources/cambridge.toml"))];

/// Id of the source used when none is specified.
pub const DEFAULT_SOURCE_ID: &str = "cambridge_pd_log";

/// Returns all configured source definitions, parsed from embedded TOML.
///
/// # Errors
///
/// Returns [`SourceError::Definition`] if any embedded TOML is malformed.
pub fn all_sources() -> Result<Vec<SourceDefinition>, SourceError> {
    SOURCE_TOMLS
        .iter()
        .map(|(name, toml)| {
            parse_source_toml(toml).map_err(|e| SourceError::Definition {
                name: format!("{name}.toml"),
                message: e.to_string(),
            })
        })
        .collect()
}

/// Looks up a source definition by id.
///
/// # Errors
///
/// Returns [`SourceError::Definition`] if the embedded TOML is malformed or
/// no source has the given id.
pub fn find_source(id: &str) -> Result<SourceDefinition, SourceError> {
    all_sources()?
        .into_iter()
        .find(|s| s.id() == id)
        .ok_or_else(|| SourceError::Definition {
            name: id.to_string(),
            message: "no source with this id".to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_all_sources() {
        let sources = all_sources().unwrap();
        assert_eq!(sources.len(), SOURCE_TOMLS.len());
    }

    #[test]
    fn source_ids_are_unique() {
        let sources = all_sources().unwrap();
        let mut ids: Vec<&str> = sources.iter().map(SourceDefinition::id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), SOURCE_TOMLS.len());
    }

    #[test]
    fn default_source_exists() {
        let source = find_source(DEFAULT_SOURCE_ID).unwrap();
        assert_eq!(source.city, "Cambridge");
    }

    #[test]
    fn unknown_source_is_an_error() {
        assert!(matches!(
            find_source("atlantis_pd"),
            Err(SourceError::Definition { .. })
        ));
    }
}
