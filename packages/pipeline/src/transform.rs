//! Transformation stage: deduplication, invalid-id filtering, and
//! timestamp decomposition.
//!
//! Deduplication runs before filtering, so an invalid-id row never
//! shadows a valid one.

use std::collections::HashSet;

use police_log_incident_models::{CheckedIncident, Incident, KeyedIncident, StoredIncident};
use police_log_source::parsing::parse_socrata_timestamp;

use crate::PipelineError;

/// Keeps the first row for each id, in batch order. Unparseable ids share
/// one group, so only the first invalid-id row survives to be counted by
/// [`drop_invalid_ids`].
///
/// Returns the kept rows and the number of duplicates removed.
#[must_use]
pub fn dedupe(rows: Vec<CheckedIncident>) -> (Vec<CheckedIncident>, u64) {
    let mut seen = HashSet::new();
    let mut removed = 0u64;

    let kept = rows
        .into_iter()
        .filter(|row| {
            let key = row.id.as_valid();
            if seen.insert(key) {
                return true;
            }
            match key {
                Some(id) => log::debug!("Dropping duplicate incident id {id}"),
                None => log::debug!("Dropping duplicate unparseable id {:?}", row.id.to_string()),
            }
            removed += 1;
            false
        })
        .collect();

    if removed > 0 {
        log::warn!("Removed {removed} duplicate incident(s)");
    }

    (kept, removed)
}

/// Removes rows whose id could not be parsed.
///
/// Returns the remaining rows, now keyed by a plain `i64`, and the number
/// removed.
#[must_use]
pub fn drop_invalid_ids(rows: Vec<CheckedIncident>) -> (Vec<KeyedIncident>, u64) {
    let mut removed = 0u64;

    let kept = rows
        .into_iter()
        .filter_map(|row| {
            let Some(id) = row.id.as_valid() else {
                log::debug!("Dropping incident with unparseable id {:?}", row.id.to_string());
                removed += 1;
                return None;
            };

            Some(Incident {
                id,
                date_time: row.date_time,
                incident_type: row.incident_type,
                subtype: row.subtype,
                location: row.location,
                last_updated: row.last_updated,
                description: row.description,
            })
        })
        .collect();

    if removed > 0 {
        log::warn!("Removed {removed} incident(s) with unparseable ids");
    }

    (kept, removed)
}

/// Rows produced by [`expand_datetime`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expanded {
    /// Rows ready to store.
    pub incidents: Vec<StoredIncident>,
    /// Rows whose `last_updated` could not be parsed and is stored as NULL.
    pub unreadable_last_updated: u64,
}

/// Parses `date_time` (and `last_updated`) on every row.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidTimestamp`] for the first row whose
/// `date_time` cannot be parsed.
pub fn expand_datetime(rows: Vec<KeyedIncident>) -> Result<Expanded, PipelineError> {
    let mut unreadable_last_updated = 0u64;
    let mut incidents = Vec::with_capacity(rows.len());

    for row in rows {
        let date_time =
            parse_socrata_timestamp(&row.date_time).ok_or_else(|| PipelineError::InvalidTimestamp {
                id: row.id,
                value: row.date_time.clone(),
            })?;

        let last_updated = match row.last_updated.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(text) => {
                let parsed = parse_socrata_timestamp(text);
                if parsed.is_none() {
                    log::warn!(
                        "Incident {} has unreadable last_updated {text:?}; storing NULL",
                        row.id
                    );
                    unreadable_last_updated += 1;
                }
                parsed
            }
        };

        incidents.push(StoredIncident {
            id: row.id,
            date_time,
            incident_type: row.incident_type,
            subtype: row.subtype,
            location: row.location,
            description: row.description,
            last_updated,
        });
    }

    Ok(Expanded {
        incidents,
        unreadable_last_updated,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{Datelike, Timelike};
    use police_log_incident_models::IncidentId;

    use super::*;

    fn checked(id: IncidentId, location: &str) -> CheckedIncident {
        Incident {
            id,
            date_time: "2024-01-01T10:00:00".to_string(),
            incident_type: "Theft".to_string(),
            subtype: None,
            location: location.to_string(),
            last_updated: None,
            description: None,
        }
    }

    fn keyed(id: i64, date_time: &str) -> KeyedIncident {
        Incident {
            id,
            date_time: date_time.to_string(),
            incident_type: "Theft".to_string(),
            subtype: None,
            location: "Main St".to_string(),
            last_updated: None,
            description: None,
        }
    }

    #[test]
    fn dedupe_keeps_first_occurrence() {
        let rows = vec![
            checked(IncidentId::Valid(1), "first"),
            checked(IncidentId::Valid(2), "other"),
            checked(IncidentId::Valid(1), "second"),
        ];

        let (kept, removed) = dedupe(rows);
        assert_eq!(removed, 1);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].location, "first");
        assert_eq!(kept[1].id, IncidentId::Valid(2));
    }

    #[test]
    fn dedupe_collapses_unparseable_ids() {
        let rows = vec![
            checked(IncidentId::Invalid("abc".to_string()), "a"),
            checked(IncidentId::Valid(1), "b"),
            checked(IncidentId::Invalid("x-9".to_string()), "c"),
        ];

        let (kept, removed) = dedupe(rows);
        assert_eq!(removed, 1);
        assert_eq!(
            kept.iter().map(|r| r.location.as_str()).collect::<Vec<_>>(),
            vec!["a", "b"]
        );

        let (keyed, invalid) = drop_invalid_ids(kept);
        assert_eq!(invalid, 1);
        assert_eq!(keyed.len(), 1);
    }

    #[test]
    fn filter_leaves_no_invalid_ids() {
        let rows = vec![
            checked(IncidentId::Valid(1), "a"),
            checked(IncidentId::Invalid("x".to_string()), "b"),
            checked(IncidentId::Valid(3), "c"),
        ];

        let (kept, removed) = drop_invalid_ids(rows);
        assert_eq!(removed, 1);
        assert_eq!(kept.iter().map(|r| r.id).collect::<Vec<_>>(), vec![1, 3]);
    }

    #[test]
    fn decomposition_matches_parsed_timestamp() {
        let expanded = expand_datetime(vec![keyed(1, "2023-07-04T21:15:42.000")]).unwrap();
        let stored = &expanded.incidents[0];
        let parts = stored.parts();

        assert_eq!(parts.year, stored.date_time.year());
        assert_eq!(
            (parts.month, parts.day, parts.hour, parts.minute, parts.second),
            (7, 4, 21, 15, 42)
        );
        assert_eq!(parts.second, stored.date_time.second());
    }

    #[test]
    fn unparseable_date_time_is_fatal() {
        let err = expand_datetime(vec![keyed(1, "2024-01-01T00:00:00"), keyed(9, "not-a-date")])
            .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::InvalidTimestamp { id: 9, ref value } if value == "not-a-date"
        ));
    }

    #[test]
    fn unreadable_last_updated_becomes_null() {
        let mut row = keyed(1, "2024-01-01T00:00:00");
        row.last_updated = Some("yesterday".to_string());
        let mut blank = keyed(2, "2024-01-01T00:00:00");
        blank.last_updated = Some(String::new());

        let expanded = expand_datetime(vec![row, blank]).unwrap();
        assert_eq!(expanded.unreadable_last_updated, 1);
        assert!(expanded.incidents.iter().all(|i| i.last_updated.is_none()));
    }
}
