#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Incident record types for the police log pipeline.
//!
//! A batch moves through a fixed sequence of row shapes, one per stage:
//!
//! 1. [`RawBatch`]: untyped JSON rows exactly as the source returned them.
//! 2. [`RawIncident`]: typed rows after the schema gate, every field optional.
//! 3. [`NormalizedIncident`]: `id` coerced into an [`IncidentId`].
//! 4. [`CheckedIncident`]: required fields proven present.
//! 5. [`KeyedIncident`]: invalid ids filtered out, `id` is a plain `i64`.
//! 6. [`StoredIncident`]: timestamps parsed and decomposed, ready to write.

use std::collections::BTreeSet;

use chrono::{Datelike, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// A column of the upstream police log dataset.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SourceColumn {
    /// When the incident occurred.
    DateTime,
    /// External incident identifier.
    Id,
    /// Incident type (e.g. `"Theft"`).
    Type,
    /// Optional incident subtype.
    Subtype,
    /// Free-text location description.
    Location,
    /// When the upstream record was last revised.
    LastUpdated,
    /// Free-text narrative.
    Description,
}

impl SourceColumn {
    /// Every column the upstream dataset must provide, in source order.
    pub const ALL: &[Self] = &[
        Self::DateTime,
        Self::Id,
        Self::Type,
        Self::Subtype,
        Self::Location,
        Self::LastUpdated,
        Self::Description,
    ];

    /// Columns that must be populated on every row, in the order they are
    /// checked.
    pub const REQUIRED: &[Self] = &[Self::DateTime, Self::Id, Self::Type, Self::Location];

    /// Returns the expected column names as a set.
    #[must_use]
    pub fn expected_names() -> BTreeSet<String> {
        Self::ALL.iter().map(|c| c.as_ref().to_string()).collect()
    }
}

/// One row as returned by the upstream API, before any validation.
pub type RawRow = serde_json::Map<String, serde_json::Value>;

/// An untyped extraction snapshot.
///
/// `columns` is the union of keys across all rows. Socrata omits keys whose
/// value is null, so a column that is null on every row does not appear.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawBatch {
    /// Column names present anywhere in the batch.
    pub columns: BTreeSet<String>,
    /// Rows in upstream order.
    pub rows: Vec<RawRow>,
}

impl RawBatch {
    /// Builds a batch from rows, deriving the column set from their keys.
    #[must_use]
    pub fn from_rows(rows: Vec<RawRow>) -> Self {
        let columns = rows.iter().flat_map(|r| r.keys().cloned()).collect();
        Self { columns, rows }
    }

    /// Builds a batch with an explicit column set (e.g. from a tabular
    /// source that reports headers separately from the rows).
    #[must_use]
    pub const fn with_columns(columns: BTreeSet<String>, rows: Vec<RawRow>) -> Self {
        Self { columns, rows }
    }

    /// Number of rows in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns `true` if the batch has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// A typed source row. Every field is optional because the source may
/// omit any of them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawIncident {
    /// Raw identifier text.
    pub id: Option<String>,
    /// Raw event timestamp text.
    pub date_time: Option<String>,
    /// Incident type.
    #[serde(rename = "type")]
    pub incident_type: Option<String>,
    /// Incident subtype.
    pub subtype: Option<String>,
    /// Location description.
    pub location: Option<String>,
    /// Raw last-revision timestamp text.
    pub last_updated: Option<String>,
    /// Narrative description.
    pub description: Option<String>,
}

/// An incident identifier after numeric coercion.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum IncidentId {
    /// A usable numeric key.
    Valid(i64),
    /// Present but could not be coerced; carries the original text.
    Invalid(String),
    /// Absent or blank in the source row.
    Missing,
}

impl IncidentId {
    /// Returns the numeric key if this id is valid.
    #[must_use]
    pub const fn as_valid(&self) -> Option<i64> {
        match self {
            Self::Valid(id) => Some(*id),
            Self::Invalid(_) | Self::Missing => None,
        }
    }

    /// Returns `true` if the id carries the sentinel-invalid marker.
    #[must_use]
    pub const fn is_invalid(&self) -> bool {
        matches!(self, Self::Invalid(_))
    }

    /// Returns `true` if the id was absent from the source row.
    #[must_use]
    pub const fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }
}

impl std::fmt::Display for IncidentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Valid(id) => write!(f, "{id}"),
            Self::Invalid(raw) => write!(f, "invalid({raw:?})"),
            Self::Missing => f.write_str("missing"),
        }
    }
}

/// A source row whose `id` has been coerced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedIncident {
    /// Coerced identifier.
    pub id: IncidentId,
    /// Raw event timestamp text.
    pub date_time: Option<String>,
    /// Incident type.
    pub incident_type: Option<String>,
    /// Incident subtype.
    pub subtype: Option<String>,
    /// Location description.
    pub location: Option<String>,
    /// Raw last-revision timestamp text.
    pub last_updated: Option<String>,
    /// Narrative description.
    pub description: Option<String>,
}

/// A row with every required field present.
///
/// The identifier type changes as the row moves through the transform
/// stage: [`CheckedIncident`] still carries an [`IncidentId`], while
/// [`KeyedIncident`] only exists for rows with a valid numeric key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Incident<I> {
    /// Identifier.
    pub id: I,
    /// Raw event timestamp text (not yet parsed).
    pub date_time: String,
    /// Incident type.
    pub incident_type: String,
    /// Incident subtype.
    pub subtype: Option<String>,
    /// Location description.
    pub location: String,
    /// Raw last-revision timestamp text.
    pub last_updated: Option<String>,
    /// Narrative description.
    pub description: Option<String>,
}

/// A row that passed the completeness gate.
pub type CheckedIncident = Incident<IncidentId>;

/// A row with a valid numeric primary key.
pub type KeyedIncident = Incident<i64>;

/// Calendar and clock components of an event timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateTimeParts {
    /// Calendar year.
    pub year: i32,
    /// Month of year, 1-12.
    pub month: u32,
    /// Day of month, 1-31.
    pub day: u32,
    /// Hour of day, 0-23.
    pub hour: u32,
    /// Minute of hour, 0-59.
    pub minute: u32,
    /// Second of minute, 0-59.
    pub second: u32,
}

impl From<&NaiveDateTime> for DateTimeParts {
    fn from(dt: &NaiveDateTime) -> Self {
        Self {
            year: dt.year(),
            month: dt.month(),
            day: dt.day(),
            hour: dt.hour(),
            minute: dt.minute(),
            second: dt.second(),
        }
    }
}

/// A fully transformed incident, ready to be written to the destination
/// table.
///
/// The decomposed fields are only reachable through [`Self::parts`], which
/// is always derived from `date_time`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredIncident {
    /// Primary key.
    pub id: i64,
    /// Parsed event timestamp (floating, no timezone).
    pub date_time: NaiveDateTime,
    /// Incident type.
    #[serde(rename = "type")]
    pub incident_type: String,
    /// Incident subtype.
    pub subtype: Option<String>,
    /// Location description.
    pub location: String,
    /// Narrative description.
    pub description: Option<String>,
    /// Parsed last-revision timestamp. `None` when absent or unparseable.
    pub last_updated: Option<NaiveDateTime>,
}

impl StoredIncident {
    /// Returns the calendar/clock decomposition of `date_time`.
    #[must_use]
    pub fn parts(&self) -> DateTimeParts {
        DateTimeParts::from(&self.date_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_names_match_source_dataset() {
        let names: Vec<&str> = SourceColumn::ALL.iter().map(AsRef::as_ref).collect();
        assert_eq!(
            names,
            vec![
                "date_time",
                "id",
                "type",
                "subtype",
                "location",
                "last_updated",
                "description"
            ]
        );
    }

    #[test]
    fn required_columns_are_a_subset() {
        for col in SourceColumn::REQUIRED {
            assert!(SourceColumn::ALL.contains(col));
        }
        assert!(!SourceColumn::REQUIRED.contains(&SourceColumn::Subtype));
    }

    #[test]
    fn raw_batch_columns_are_union_of_row_keys() {
        let rows = vec![
            serde_json::json!({"id": "1", "type": "Theft"}),
            serde_json::json!({"id": "2", "location": "Main St"}),
        ]
        .into_iter()
        .filter_map(|v| v.as_object().cloned())
        .collect();

        let batch = RawBatch::from_rows(rows);
        let cols: Vec<&str> = batch.columns.iter().map(String::as_str).collect();
        assert_eq!(cols, vec!["id", "location", "type"]);
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn incident_id_accessors() {
        assert_eq!(IncidentId::Valid(7).as_valid(), Some(7));
        assert!(IncidentId::Invalid("abc".to_string()).is_invalid());
        assert!(IncidentId::Missing.is_missing());
        assert_eq!(IncidentId::Missing.as_valid(), None);
    }

    #[test]
    fn parts_are_derived_from_date_time() {
        let dt = NaiveDateTime::parse_from_str("2024-03-05T07:08:09", "%Y-%m-%dT%H:%M:%S")
            .unwrap();
        let incident = StoredIncident {
            id: 1,
            date_time: dt,
            incident_type: "Theft".to_string(),
            subtype: None,
            location: "Main St".to_string(),
            description: None,
            last_updated: None,
        };
        assert_eq!(
            incident.parts(),
            DateTimeParts {
                year: 2024,
                month: 3,
                day: 5,
                hour: 7,
                minute: 8,
                second: 9,
            }
        );
    }
}
