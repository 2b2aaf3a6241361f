//! Visit-window resolution from raw survey rows.
//!
//! Each participant's study timeline is anchored by four visits: baseline,
//! intervention start, follow-up start, and end of collection. The survey
//! export records visit dates and times as free-text strings; this module
//! parses them, checks that the required visits are present, and derives the
//! synthetic period boundaries.

use crate::survey::SurveyRow;
use chrono::{Duration, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

/// Accepted date/time formats, tried in order. The export mixes a
/// four-digit-year dashed format with a two-digit-year slashed one.
pub const VISIT_DATETIME_FORMATS: &[&str] = &["%m-%d-%Y %H:%M", "%m/%d/%y %H:%M"];

/// Required visit labels. A participant without all three cannot be aligned.
const REQUIRED_VISITS: &[&str] = &["1", "2", "3"];

/// Errors from visit-window resolution. All variants are recoverable at the
/// run level: the participant is excluded, the batch continues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VisitError {
    /// A visit date/time string matched none of the accepted formats.
    Parse { participant: String, input: String },
    /// One of visits 1-3 has no survey row.
    MissingVisit { participant: String, visit: String },
}

impl std::fmt::Display for VisitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VisitError::Parse { participant, input } => {
                write!(
                    f,
                    "participant {participant}: could not parse visit date/time '{input}'"
                )
            }
            VisitError::MissingVisit { participant, visit } => {
                write!(
                    f,
                    "participant {participant} has no data log entry for visit {visit}"
                )
            }
        }
    }
}

impl std::error::Error for VisitError {}

/// The resolved set of boundary timestamps for one participant.
///
/// Timestamps are kept as recorded (no timezone); epoch conversion treats
/// them as UTC so device queries are deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitWindowSet {
    /// Visit 1: baseline, start of collection
    pub baseline: NaiveDateTime,
    /// Visit 2: intervention visit
    pub intervention: NaiveDateTime,
    /// Start of the intervention period (visit 2 + 1 minute)
    pub intervention_period_start: NaiveDateTime,
    /// Visit 3: follow-up visit
    pub follow_up: NaiveDateTime,
    /// Start of the follow-up period (visit 3 + 1 minute)
    pub follow_up_period_start: NaiveDateTime,
    /// Visit 4: end of collection (synthesized when no override is recorded)
    pub end: NaiveDateTime,
}

impl VisitWindowSet {
    /// Closed collection interval as epoch seconds, for the device query.
    pub fn collection_range(&self) -> (i64, i64) {
        (
            self.baseline.and_utc().timestamp(),
            self.end.and_utc().timestamp(),
        )
    }

    /// Boundaries in logical visit order.
    pub fn ordered(&self) -> [NaiveDateTime; 6] {
        [
            self.baseline,
            self.intervention,
            self.intervention_period_start,
            self.follow_up,
            self.follow_up_period_start,
            self.end,
        ]
    }

    /// Whether the boundaries are non-decreasing in logical order.
    pub fn is_ordered(&self) -> bool {
        self.ordered().windows(2).all(|pair| pair[0] <= pair[1])
    }
}

/// Everything pulled from one participant's survey rows.
#[derive(Debug, Clone)]
pub struct ResolvedVisits {
    pub windows: VisitWindowSet,
    /// Raw group code; sparse in the export, last non-missing value wins.
    pub cohort_code: Option<String>,
    /// Device identifier; sparse in the export, last non-missing value wins.
    pub device_id: Option<String>,
}

/// Parse a concatenated visit date/time string, trying each accepted format
/// in order.
pub fn parse_visit_datetime(participant: &str, input: &str) -> Result<NaiveDateTime, VisitError> {
    for format in VISIT_DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(input, format) {
            return Ok(parsed);
        }
    }
    Err(VisitError::Parse {
        participant: participant.to_string(),
        input: input.to_string(),
    })
}

/// Resolve the visit windows for one participant from their survey rows.
///
/// `end_override` is the recorded end-of-collection timestamp for
/// participants who stopped using the device early; everyone else collects
/// through `now` (truncated to whole seconds). Resolution is idempotent for
/// visits 1-3; only the synthesized end depends on the clock.
pub fn resolve_visits(
    participant: &str,
    rows: &[SurveyRow],
    end_override: Option<NaiveDateTime>,
    now: NaiveDateTime,
) -> Result<ResolvedVisits, VisitError> {
    let mut visit_dates: BTreeMap<String, NaiveDateTime> = BTreeMap::new();
    let mut cohort_code: Option<String> = None;
    let mut device_id: Option<String> = None;

    for row in rows {
        let combined = format!("{} {}", row.date.trim(), row.time.trim());
        let parsed = parse_visit_datetime(participant, &combined)?;
        // Duplicate visit rows: last one wins.
        visit_dates.insert(row.visit.trim().to_string(), parsed);

        if let Some(code) = &row.cohort_code {
            if !code.trim().is_empty() {
                cohort_code = Some(code.trim().to_string());
            }
        }
        if let Some(id) = &row.device_id {
            if !id.trim().is_empty() {
                device_id = Some(id.trim().to_string());
            }
        }
    }

    for visit in REQUIRED_VISITS {
        if !visit_dates.contains_key(*visit) {
            return Err(VisitError::MissingVisit {
                participant: participant.to_string(),
                visit: visit.to_string(),
            });
        }
    }

    let baseline = visit_dates["1"];
    let intervention = visit_dates["2"];
    let follow_up = visit_dates["3"];

    // An absent visit-4 row is synthesized, never an error. A recorded
    // override (early termination) takes precedence over the clock.
    let end = match end_override {
        Some(recorded) => recorded,
        None => now.with_nanosecond(0).unwrap_or(now),
    };

    let windows = VisitWindowSet {
        baseline,
        intervention,
        intervention_period_start: intervention + Duration::minutes(1),
        follow_up,
        follow_up_period_start: follow_up + Duration::minutes(1),
        end,
    };

    if !windows.is_ordered() {
        warn!(
            participant,
            "visit timestamps are not in non-decreasing logical order"
        );
    }

    Ok(ResolvedVisits {
        windows,
        cohort_code,
        device_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn row(visit: &str, date: &str, time: &str) -> SurveyRow {
        SurveyRow {
            participant_id: "A001".to_string(),
            visit: visit.to_string(),
            date: date.to_string(),
            time: time.to_string(),
            cohort_code: None,
            device_id: None,
        }
    }

    fn fixed_now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2023, 7, 11)
            .unwrap()
            .and_hms_opt(12, 50, 10)
            .unwrap()
    }

    fn full_rows() -> Vec<SurveyRow> {
        vec![
            row("1", "03-23-2023", "14:45"),
            row("2", "04-07-2023", "10:10"),
            row("3", "04-24-2023", "16:00"),
        ]
    }

    #[test]
    fn test_parse_primary_format() {
        let parsed = parse_visit_datetime("A001", "03-23-2023 14:45").unwrap();
        assert_eq!(
            parsed,
            NaiveDate::from_ymd_opt(2023, 3, 23)
                .unwrap()
                .and_hms_opt(14, 45, 0)
                .unwrap()
        );
    }

    #[test]
    fn test_parse_fallback_format() {
        let parsed = parse_visit_datetime("A001", "3/23/23 14:45").unwrap();
        assert_eq!(
            parsed,
            NaiveDate::from_ymd_opt(2023, 3, 23)
                .unwrap()
                .and_hms_opt(14, 45, 0)
                .unwrap()
        );
    }

    #[test]
    fn test_parse_failure_is_typed() {
        let err = parse_visit_datetime("A001", "March 23rd, 2023").unwrap_err();
        assert!(matches!(err, VisitError::Parse { .. }));
    }

    #[test]
    fn test_resolution_derives_period_starts() {
        let resolved = resolve_visits("A001", &full_rows(), None, fixed_now()).unwrap();
        let windows = &resolved.windows;

        assert_eq!(
            windows.intervention_period_start,
            windows.intervention + Duration::minutes(1)
        );
        assert_eq!(
            windows.follow_up_period_start,
            windows.follow_up + Duration::minutes(1)
        );
        assert_eq!(windows.end, fixed_now());
        assert!(windows.is_ordered());
    }

    #[test]
    fn test_missing_visit_rejected() {
        let rows = vec![row("1", "03-23-2023", "14:45"), row("3", "04-24-2023", "16:00")];
        let err = resolve_visits("A001", &rows, None, fixed_now()).unwrap_err();
        assert_eq!(
            err,
            VisitError::MissingVisit {
                participant: "A001".to_string(),
                visit: "2".to_string()
            }
        );
    }

    #[test]
    fn test_resolution_is_idempotent_under_fixed_clock() {
        let first = resolve_visits("A001", &full_rows(), None, fixed_now()).unwrap();
        let second = resolve_visits("A001", &full_rows(), None, fixed_now()).unwrap();
        assert_eq!(first.windows, second.windows);
    }

    #[test]
    fn test_end_override_wins_over_clock() {
        let recorded = NaiveDate::from_ymd_opt(2023, 5, 1)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        let resolved = resolve_visits("A004", &full_rows(), Some(recorded), fixed_now()).unwrap();
        assert_eq!(resolved.windows.end, recorded);
    }

    #[test]
    fn test_sparse_fields_last_non_missing_wins() {
        let mut rows = full_rows();
        rows[0].cohort_code = Some("1".to_string());
        rows[0].device_id = Some("A01".to_string());
        rows[1].cohort_code = Some(String::new()); // blank, must not overwrite
        rows[2].device_id = Some("A02".to_string());

        let resolved = resolve_visits("A001", &rows, None, fixed_now()).unwrap();
        assert_eq!(resolved.cohort_code.as_deref(), Some("1"));
        assert_eq!(resolved.device_id.as_deref(), Some("A02"));
    }

    #[test]
    fn test_duplicate_visit_rows_last_wins() {
        let mut rows = full_rows();
        rows.push(row("1", "03-24-2023", "09:00"));
        let resolved = resolve_visits("A001", &rows, None, fixed_now()).unwrap();
        assert_eq!(
            resolved.windows.baseline,
            NaiveDate::from_ymd_opt(2023, 3, 24)
                .unwrap()
                .and_hms_opt(9, 0, 0)
                .unwrap()
        );
    }
}
