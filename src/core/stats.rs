//! Summary-statistics computation.
//!
//! One fixed statistic set is computed at every granularity: per participant,
//! per cohort, and for the whole population. Cohort and population records
//! are computed over the pooled raw values, never by averaging per-participant
//! statistics.

use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

/// The distinguished variable that carries a threshold-exceedance statistic.
pub const PM25_VARIABLE: &str = "pm25";

/// Default exceedance threshold for pm25, in the sensor's reporting units.
pub const DEFAULT_PM25_THRESHOLD: f64 = 12.0;

/// The percentiles in the fixed statistic set.
pub const PERCENTILES: [f64; 5] = [10.0, 25.0, 50.0, 75.0, 90.0];

/// Errors from statistics computation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatsError {
    /// No values remained after missing-value exclusion.
    EmptyInput { variable: String },
}

impl std::fmt::Display for StatsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatsError::EmptyInput { variable } => {
                write!(f, "no cleaned samples to summarize for variable '{variable}'")
            }
        }
    }
}

impl std::error::Error for StatsError {}

/// The fixed statistic set for one numeric collection.
///
/// `percent_above_threshold` is present only for the pm25 variable; chart
/// consumers that exclude it filter on `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryStats {
    pub p10: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p90: f64,
    pub max: f64,
    pub mean: f64,
    pub percent_above_threshold: Option<f64>,
}

impl SummaryStats {
    /// Statistic names in output order, matching the summary-table columns.
    pub const STAT_NAMES: [&'static str; 7] = [
        "10th_percentile",
        "25th_percentile",
        "50th_percentile",
        "75th_percentile",
        "90th_percentile",
        "max",
        "mean",
    ];

    /// Column name for the pm25 exceedance statistic.
    pub const PERCENT_ABOVE_NAME: &'static str = "percent_above_threshold";

    /// Statistic values in the same order as [`Self::STAT_NAMES`].
    pub fn values(&self) -> [f64; 7] {
        [
            self.p10, self.p25, self.p50, self.p75, self.p90, self.max, self.mean,
        ]
    }
}

/// Compute the fixed statistic set over a cleaned value collection.
///
/// Percentiles use linear interpolation between closest ranks
/// (`rank = p/100 * (n-1)`). The input need not be sorted. An empty
/// collection is an explicit error, not a NaN record.
pub fn compute_stats(
    values: &[f64],
    variable: &str,
    threshold: f64,
) -> Result<SummaryStats, StatsError> {
    if values.is_empty() {
        return Err(StatsError::EmptyInput {
            variable: variable.to_string(),
        });
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let percent_above_threshold = if variable == PM25_VARIABLE {
        let above = values.iter().filter(|&&v| v > threshold).count();
        Some(above as f64 / values.len() as f64 * 100.0)
    } else {
        None
    };

    Ok(SummaryStats {
        p10: percentile(&sorted, 10.0),
        p25: percentile(&sorted, 25.0),
        p50: percentile(&sorted, 50.0),
        p75: percentile(&sorted, 75.0),
        p90: percentile(&sorted, 90.0),
        max: Statistics::max(values),
        mean: Statistics::mean(values),
        percent_above_threshold,
    })
}

/// Percentile of a sorted, non-empty slice by linear interpolation between
/// closest ranks.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }

    let rank = p / 100.0 * (n - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        return sorted[lo];
    }

    let weight = rank - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * weight
}
