//! Sample alignment and cleaning.
//!
//! Raw device samples arrive as column-oriented JSON with arbitrary value
//! types per cell. This module turns them into a cleaned, row-oriented
//! [`SampleSeries`]: timestamps first, variables in retrieval order, cells
//! coerced to numbers with a missing marker for anything unparseable.
//!
//! Restriction to the collection interval [visit 1, visit 4] is enforced by
//! the caller via the device query; nothing is re-filtered here.

use crate::device::RawSampleSet;
use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Policy for rows with missing values.
///
/// The default excludes misses per column and keeps the row alive for the
/// other variables; `DropRow` discards a row as soon as any cell is missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingPolicy {
    PerColumn,
    DropRow,
}

impl Default for MissingPolicy {
    fn default() -> Self {
        MissingPolicy::PerColumn
    }
}

/// One cleaned sample: a timestamp plus one optional value per variable,
/// positionally matched to [`SampleSeries::variables`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleRow {
    pub time: NaiveDateTime,
    pub values: Vec<Option<f64>>,
}

/// A cleaned, time-ordered series for one participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleSeries {
    /// Variable column names, in retrieval order. The timestamp column is
    /// implicit and always first in tabular output.
    pub variables: Vec<String>,
    pub rows: Vec<SampleRow>,
}

impl SampleSeries {
    /// Create an empty series with the given columns.
    pub fn new(variables: Vec<String>) -> Self {
        Self {
            variables,
            rows: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Cleaned values for one variable, missing entries excluded.
    ///
    /// Returns `None` when the series has no column of that name.
    pub fn column(&self, variable: &str) -> Option<Vec<f64>> {
        let index = self.variables.iter().position(|v| v == variable)?;
        Some(
            self.rows
                .iter()
                .filter_map(|row| row.values.get(index).copied().flatten())
                .filter(|v| v.is_finite())
                .collect(),
        )
    }
}

/// Coerce one raw cell to a number. Strings are parsed; anything else
/// non-numeric becomes the missing marker.
fn coerce_numeric(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        _ => None,
    }
}

/// Clean a raw sample set into a [`SampleSeries`].
///
/// Columns keep their retrieval order; each cell is coerced to numeric with
/// unparseable entries replaced by the missing marker, then the missing-value
/// policy is applied row-wise.
pub fn align_samples(raw: &RawSampleSet, policy: MissingPolicy) -> SampleSeries {
    let variables: Vec<String> = raw.columns.iter().map(|(name, _)| name.clone()).collect();
    let mut series = SampleSeries::new(variables);

    for (index, epoch) in raw.time.iter().enumerate() {
        let time = match DateTime::from_timestamp(*epoch, 0) {
            Some(dt) => dt.naive_utc(),
            None => continue,
        };

        let values: Vec<Option<f64>> = raw
            .columns
            .iter()
            .map(|(_, cells)| cells.get(index).and_then(coerce_numeric))
            .collect();

        if policy == MissingPolicy::DropRow && values.iter().any(|v| v.is_none()) {
            continue;
        }

        series.rows.push(SampleRow { time, values });
    }

    series
}
