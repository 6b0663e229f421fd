//! Validation stage: schema gate, id coercion, and completeness gate.

use std::collections::BTreeMap;

use police_log_incident_models::{
    CheckedIncident, Incident, IncidentId, NormalizedIncident, RawBatch, RawIncident, RawRow,
    SourceColumn,
};

use crate::PipelineError;

/// Checks that the batch's column set is exactly the expected source
/// columns, then converts every row into a [`RawIncident`].
///
/// JSON numbers and booleans are stringified; JSON null becomes `None`.
///
/// # Errors
///
/// Returns [`PipelineError::SchemaMismatch`] listing every missing and
/// unexpected column.
pub fn check_schema(batch: RawBatch) -> Result<Vec<RawIncident>, PipelineError> {
    let expected = SourceColumn::expected_names();

    let missing: Vec<String> = expected.difference(&batch.columns).cloned().collect();
    let unexpected: Vec<String> = batch.columns.difference(&expected).cloned().collect();

    if !missing.is_empty() || !unexpected.is_empty() {
        return Err(PipelineError::SchemaMismatch {
            missing,
            unexpected,
        });
    }

    Ok(batch.rows.into_iter().map(into_raw_incident).collect())
}

fn into_raw_incident(mut row: RawRow) -> RawIncident {
    let mut take = |column: SourceColumn| row.remove(column.as_ref()).and_then(value_text);

    RawIncident {
        id: take(SourceColumn::Id),
        date_time: take(SourceColumn::DateTime),
        incident_type: take(SourceColumn::Type),
        subtype: take(SourceColumn::Subtype),
        location: take(SourceColumn::Location),
        last_updated: take(SourceColumn::LastUpdated),
        description: take(SourceColumn::Description),
    }
}

fn value_text(value: serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

/// Coerces every `id` into an [`IncidentId`]. Rows are never dropped.
#[must_use]
pub fn coerce_ids(rows: Vec<RawIncident>) -> Vec<NormalizedIncident> {
    rows.into_iter()
        .map(|row| NormalizedIncident {
            id: parse_id(row.id.as_deref()),
            date_time: row.date_time,
            incident_type: row.incident_type,
            subtype: row.subtype,
            location: row.location,
            last_updated: row.last_updated,
            description: row.description,
        })
        .collect()
}

/// Parses a raw id.
///
/// Integer text is accepted, as is decimal text whose fraction is all
/// zeros (`"12.0"`). Absent or blank ids are [`IncidentId::Missing`];
/// anything else is [`IncidentId::Invalid`] carrying the raw text.
#[must_use]
pub fn parse_id(raw: Option<&str>) -> IncidentId {
    let Some(raw) = raw else {
        return IncidentId::Missing;
    };

    let text = raw.trim();
    if text.is_empty() {
        return IncidentId::Missing;
    }

    let integral = text
        .split_once('.')
        .filter(|(_, fraction)| fraction.bytes().all(|b| b == b'0'))
        .map_or(text, |(whole, _)| whole);

    integral
        .parse::<i64>()
        .map_or_else(|_| IncidentId::Invalid(raw.to_string()), IncidentId::Valid)
}

/// Verifies that `date_time`, `id`, `type`, and `location` are present on
/// every row.
///
/// Blank text counts as missing. An unparseable id is present (it is
/// filtered later); only an absent or blank id counts as missing.
///
/// # Errors
///
/// Returns [`PipelineError::MissingRequiredField`] for the first required
/// column (in check order) with any missing values, with the count.
pub fn check_required(
    rows: Vec<NormalizedIncident>,
) -> Result<Vec<CheckedIncident>, PipelineError> {
    let mut missing: BTreeMap<SourceColumn, usize> = BTreeMap::new();
    let mut checked = Vec::with_capacity(rows.len());

    for row in rows {
        let date_time = present(row.date_time);
        let incident_type = present(row.incident_type);
        let location = present(row.location);

        for (column, absent) in [
            (SourceColumn::DateTime, date_time.is_none()),
            (SourceColumn::Id, row.id.is_missing()),
            (SourceColumn::Type, incident_type.is_none()),
            (SourceColumn::Location, location.is_none()),
        ] {
            if absent {
                *missing.entry(column).or_default() += 1;
            }
        }

        if let (Some(date_time), Some(incident_type), Some(location)) =
            (date_time, incident_type, location)
            && !row.id.is_missing()
        {
            checked.push(Incident {
                id: row.id,
                date_time,
                incident_type,
                subtype: row.subtype,
                location,
                last_updated: row.last_updated,
                description: row.description,
            });
        }
    }

    let first_missing = SourceColumn::REQUIRED
        .iter()
        .find_map(|column| missing.get(column).map(|count| (*column, *count)));

    if let Some((column, count)) = first_missing {
        return Err(PipelineError::MissingRequiredField { column, count });
    }

    Ok(checked)
}

fn present(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

/// Runs the whole validation stage.
///
/// # Errors
///
/// Returns the first schema or completeness failure.
pub fn validate(batch: RawBatch) -> Result<Vec<CheckedIncident>, PipelineError> {
    let rows = check_schema(batch)?;
    let rows = coerce_ids(rows);
    check_required(rows)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn full_row(id: &str) -> serde_json::Value {
        json!({
            "id": id,
            "date_time": "2024-01-01T10:00:00.000",
            "type": "Theft",
            "subtype": "Bicycle",
            "location": "Main St",
            "last_updated": "2024-01-02T08:00:00.000",
            "description": "Bike stolen",
        })
    }

    fn batch(rows: Vec<serde_json::Value>) -> RawBatch {
        RawBatch::from_rows(
            rows.into_iter()
                .map(|v| v.as_object().cloned().unwrap())
                .collect(),
        )
    }

    #[test]
    fn correct_schema_passes_every_row_through() {
        let rows = check_schema(batch(vec![full_row("1"), full_row("2")])).unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id.as_deref(), Some("1"));
        assert_eq!(rows[0].incident_type.as_deref(), Some("Theft"));
        assert_eq!(rows[1].location.as_deref(), Some("Main St"));
    }

    #[test]
    fn missing_column_is_a_schema_mismatch() {
        let mut row = full_row("1");
        row.as_object_mut().unwrap().remove("location");

        let err = check_schema(batch(vec![row])).unwrap_err();
        match err {
            PipelineError::SchemaMismatch {
                missing,
                unexpected,
            } => {
                assert_eq!(missing, vec!["location".to_string()]);
                assert!(unexpected.is_empty());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn extra_column_is_a_schema_mismatch() {
        let mut row = full_row("1");
        row.as_object_mut()
            .unwrap()
            .insert("latitude".to_string(), json!("42.37"));

        assert!(matches!(
            check_schema(batch(vec![row])),
            Err(PipelineError::SchemaMismatch { unexpected, .. })
                if unexpected == vec!["latitude".to_string()]
        ));
    }

    #[test]
    fn column_order_does_not_matter() {
        let columns = SourceColumn::ALL
            .iter()
            .rev()
            .map(|c| c.as_ref().to_string())
            .collect();
        let batch = RawBatch::with_columns(columns, Vec::new());

        assert!(check_schema(batch).unwrap().is_empty());
    }

    #[test]
    fn null_and_numeric_values_are_normalized() {
        let mut row = full_row("1");
        let obj = row.as_object_mut().unwrap();
        obj.insert("id".to_string(), json!(42));
        obj.insert("subtype".to_string(), serde_json::Value::Null);

        let rows = check_schema(batch(vec![row])).unwrap();
        assert_eq!(rows[0].id.as_deref(), Some("42"));
        assert_eq!(rows[0].subtype, None);
    }

    #[test]
    fn ids_are_valid_or_explicitly_invalid() {
        assert_eq!(parse_id(Some("17")), IncidentId::Valid(17));
        assert_eq!(parse_id(Some(" 17 ")), IncidentId::Valid(17));
        assert_eq!(parse_id(Some("12.0")), IncidentId::Valid(12));
        assert_eq!(parse_id(Some("-3")), IncidentId::Valid(-3));
        assert_eq!(parse_id(Some("abc")), IncidentId::Invalid("abc".to_string()));
        assert_eq!(parse_id(Some("12.5")), IncidentId::Invalid("12.5".to_string()));
        assert_eq!(parse_id(Some(".0")), IncidentId::Invalid(".0".to_string()));
        assert_eq!(parse_id(Some("1.2.0")), IncidentId::Invalid("1.2.0".to_string()));
        assert_eq!(parse_id(Some("   ")), IncidentId::Missing);
        assert_eq!(parse_id(None), IncidentId::Missing);
    }

    #[test]
    fn coercion_never_drops_rows() {
        let rows = vec![
            RawIncident {
                id: Some("abc".to_string()),
                ..RawIncident::default()
            },
            RawIncident::default(),
            RawIncident {
                id: Some("5".to_string()),
                ..RawIncident::default()
            },
        ];

        let ids: Vec<IncidentId> = coerce_ids(rows).into_iter().map(|r| r.id).collect();
        assert_eq!(
            ids,
            vec![
                IncidentId::Invalid("abc".to_string()),
                IncidentId::Missing,
                IncidentId::Valid(5)
            ]
        );
    }

    #[test]
    fn null_location_fails_completeness() {
        let mut row = full_row("2");
        row["location"] = serde_json::Value::Null;

        let err = validate(batch(vec![full_row("1"), row])).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::MissingRequiredField {
                column: SourceColumn::Location,
                count: 1
            }
        ));
    }

    #[test]
    fn blank_type_counts_as_missing() {
        let mut row = full_row("1");
        row["type"] = json!("  ");

        assert!(matches!(
            validate(batch(vec![row])),
            Err(PipelineError::MissingRequiredField {
                column: SourceColumn::Type,
                ..
            })
        ));
    }

    #[test]
    fn reports_first_offending_column_in_check_order() {
        let mut row = full_row("1");
        row["location"] = serde_json::Value::Null;
        row["date_time"] = serde_json::Value::Null;

        assert!(matches!(
            validate(batch(vec![row])),
            Err(PipelineError::MissingRequiredField {
                column: SourceColumn::DateTime,
                ..
            })
        ));
    }

    #[test]
    fn unparseable_id_is_not_missing() {
        let rows = validate(batch(vec![full_row("abc"), full_row("2")])).unwrap();

        assert_eq!(rows.len(), 2);
        assert!(rows[0].id.is_invalid());
    }

    #[test]
    fn absent_id_is_missing() {
        let mut row = full_row("1");
        row["id"] = serde_json::Value::Null;

        assert!(matches!(
            validate(batch(vec![row])),
            Err(PipelineError::MissingRequiredField {
                column: SourceColumn::Id,
                count: 1
            })
        ));
    }
}
