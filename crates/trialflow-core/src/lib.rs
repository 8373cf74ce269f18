//! Canonical clinical-trial record and the validation contract every
//! combined batch must satisfy before persistence.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CRATE_NAME: &str = "trialflow-core";

/// Column set of the unified table, in schema order. The staging sink builds
/// its parquet schema from this list and the validator checks staged schemas
/// against it exactly.
pub const CANONICAL_COLUMNS: [&str; 7] = [
    "trial_id",
    "source",
    "registry_id",
    "title",
    "condition",
    "country",
    "ingestion_ts",
];

/// Origin registries. The tag doubles as the `source` column value and the
/// trial-id prefix, so casing follows each registry's convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Source {
    Isrctn,
    Ctgov,
    Euctr,
    EmaCdp,
}

impl Source {
    pub fn tag(self) -> &'static str {
        match self {
            Source::Isrctn => "isrctn",
            Source::Ctgov => "CTGOV",
            Source::Euctr => "EUCTR",
            Source::EmaCdp => "EMA_CDP",
        }
    }

    /// Builds the globally unique `<prefix>:<registry_id>` identifier.
    /// Records without a registry id get no trial id and are dropped by the
    /// combiner.
    pub fn trial_id(self, registry_id: Option<&str>) -> Option<String> {
        registry_id
            .filter(|id| !id.is_empty())
            .map(|id| format!("{}:{}", self.tag(), id))
    }
}

/// The unifying record shape all extractors emit. `condition` and `country`
/// may hold comma-joined lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    pub trial_id: Option<String>,
    pub source: String,
    pub registry_id: Option<String>,
    pub title: Option<String>,
    pub condition: Option<String>,
    pub country: Option<String>,
    pub ingestion_ts: DateTime<Utc>,
}

/// Validation failures carry the violated rule so operators can tell them
/// apart from transport or parse errors; the pipeline treats them as fatal
/// before any persistence step.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("missing required column: {0}")]
    MissingColumn(&'static str),
    #[error("unexpected column in staged schema: {0}")]
    UnexpectedColumn(String),
    #[error("null trial_id values found")]
    NullTrialId,
    #[error("duplicate trial_id values detected: {0}")]
    DuplicateTrialId(String),
    #[error("null source values detected")]
    NullSource,
}

/// Enforces the combined-table invariants: non-null unique `trial_id` and
/// non-null `source`. `ingestion_ts` is non-nullable by construction of
/// [`TrialRecord`]; the staged schema keeps that column non-nullable so the
/// guarantee survives serialization.
pub fn validate(records: &[TrialRecord]) -> Result<(), ValidationError> {
    let mut seen = HashSet::with_capacity(records.len());
    for record in records {
        let id = record
            .trial_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or(ValidationError::NullTrialId)?;
        if !seen.insert(id.to_string()) {
            return Err(ValidationError::DuplicateTrialId(id.to_string()));
        }
        if record.source.trim().is_empty() {
            return Err(ValidationError::NullSource);
        }
    }
    Ok(())
}

/// Checks a staged schema against [`CANONICAL_COLUMNS`] exactly: every
/// canonical column must be present and no others are allowed.
pub fn validate_columns<S: AsRef<str>>(columns: &[S]) -> Result<(), ValidationError> {
    for required in CANONICAL_COLUMNS {
        if !columns.iter().any(|c| c.as_ref() == required) {
            return Err(ValidationError::MissingColumn(required));
        }
    }
    for column in columns {
        if !CANONICAL_COLUMNS.contains(&column.as_ref()) {
            return Err(ValidationError::UnexpectedColumn(column.as_ref().to_string()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(trial_id: Option<&str>, source: &str) -> TrialRecord {
        TrialRecord {
            trial_id: trial_id.map(str::to_string),
            source: source.to_string(),
            registry_id: trial_id.map(|id| id.split(':').nth(1).unwrap_or(id).to_string()),
            title: None,
            condition: None,
            country: None,
            ingestion_ts: Utc.with_ymd_and_hms(2026, 8, 27, 9, 0, 0).single().unwrap(),
        }
    }

    #[test]
    fn trial_id_prefixes_follow_registry_convention() {
        assert_eq!(
            Source::Isrctn.trial_id(Some("12345678")).as_deref(),
            Some("isrctn:12345678")
        );
        assert_eq!(
            Source::Ctgov.trial_id(Some("NCT00000001")).as_deref(),
            Some("CTGOV:NCT00000001")
        );
        assert_eq!(Source::Euctr.trial_id(None), None);
        assert_eq!(Source::EmaCdp.trial_id(Some("")), None);
    }

    #[test]
    fn valid_batch_passes() {
        let records = vec![
            record(Some("isrctn:1"), "isrctn"),
            record(Some("CTGOV:NCT1"), "CTGOV"),
        ];
        assert!(validate(&records).is_ok());
    }

    #[test]
    fn null_trial_id_is_rejected() {
        let records = vec![record(None, "isrctn")];
        assert!(matches!(validate(&records), Err(ValidationError::NullTrialId)));
    }

    #[test]
    fn duplicate_trial_id_is_rejected() {
        let records = vec![
            record(Some("CTGOV:NCT1"), "CTGOV"),
            record(Some("CTGOV:NCT1"), "CTGOV"),
        ];
        match validate(&records) {
            Err(ValidationError::DuplicateTrialId(id)) => assert_eq!(id, "CTGOV:NCT1"),
            other => panic!("expected duplicate trial_id failure, got {other:?}"),
        }
    }

    #[test]
    fn blank_source_is_rejected() {
        let records = vec![record(Some("EUCTR:2020-001"), "  ")];
        assert!(matches!(validate(&records), Err(ValidationError::NullSource)));
    }

    #[test]
    fn column_check_requires_all_seven_columns() {
        assert!(validate_columns(&CANONICAL_COLUMNS).is_ok());

        let missing_country: Vec<&str> = CANONICAL_COLUMNS
            .iter()
            .copied()
            .filter(|c| *c != "country")
            .collect();
        match validate_columns(&missing_country) {
            Err(ValidationError::MissingColumn(col)) => assert_eq!(col, "country"),
            other => panic!("expected missing-column failure, got {other:?}"),
        }
    }

    #[test]
    fn column_check_rejects_extra_columns() {
        let mut columns: Vec<&str> = CANONICAL_COLUMNS.to_vec();
        columns.push("phase");
        match validate_columns(&columns) {
            Err(ValidationError::UnexpectedColumn(col)) => assert_eq!(col, "phase"),
            other => panic!("expected unexpected-column failure, got {other:?}"),
        }
    }
}
