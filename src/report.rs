//! Report assembly and tabular artifacts.
//!
//! The assembled report is what the chart/export layer consumes: one entry
//! per participant plus the reserved pooled-group entries, each carrying the
//! cohort label, display color, cleaned series, and summary statistics.
//! Pooled keys live in their own namespace so time-series plots can filter
//! them out while summary charts keep them.

use crate::core::cohort::Cohort;
use crate::core::session::PooledKey;
use crate::core::stats::{SummaryStats, PM25_VARIABLE};
use crate::core::{SampleRow, SampleSeries};
use chrono::NaiveDateTime;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Timestamp format used in CSV artifacts.
const CSV_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Key of one report entry. Participants sort before the pooled groups, and
/// the two kinds can never collide.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum SubjectKey {
    Participant(String),
    Pooled(PooledKey),
}

impl std::fmt::Display for SubjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubjectKey::Participant(id) => write!(f, "{id}"),
            SubjectKey::Pooled(key) => write!(f, "{key}"),
        }
    }
}

/// One assembled entry: everything the presentation layer needs for one
/// participant or pooled group.
#[derive(Debug, Clone)]
pub struct ReportEntry {
    pub cohort: Cohort,
    pub color: String,
    /// Cleaned time series; present for participants, absent for pooled
    /// groups (their values have no shared timestamps)
    pub series: Option<SampleSeries>,
    /// Pooled raw values per variable; populated only for pooled groups
    pub pooled_values: BTreeMap<String, Vec<f64>>,
    /// Summary statistics per analyzed variable
    pub stats: BTreeMap<String, SummaryStats>,
}

impl ReportEntry {
    /// Entry for an individual participant.
    pub fn participant(cohort: Cohort, series: SampleSeries) -> Self {
        Self {
            cohort,
            color: cohort.color().to_string(),
            series: Some(series),
            pooled_values: BTreeMap::new(),
            stats: BTreeMap::new(),
        }
    }

    /// Entry for a pooled group.
    pub fn pooled() -> Self {
        Self {
            cohort: Cohort::Pooled,
            color: Cohort::Pooled.color().to_string(),
            series: None,
            pooled_values: BTreeMap::new(),
            stats: BTreeMap::new(),
        }
    }

    pub fn is_pooled(&self) -> bool {
        self.series.is_none()
    }
}

/// The assembled run report.
#[derive(Debug, Clone, Default)]
pub struct Report {
    pub entries: BTreeMap<SubjectKey, ReportEntry>,
}

impl Report {
    pub fn new() -> Self {
        Self::default()
    }

    /// Individual participant entries, in sorted-id order.
    pub fn participants(&self) -> impl Iterator<Item = (&SubjectKey, &ReportEntry)> {
        self.entries
            .iter()
            .filter(|(key, _)| matches!(key, SubjectKey::Participant(_)))
    }

    /// Pooled-group entries, in bucket order.
    pub fn pooled_groups(&self) -> impl Iterator<Item = (&SubjectKey, &ReportEntry)> {
        self.entries
            .iter()
            .filter(|(key, _)| matches!(key, SubjectKey::Pooled(_)))
    }

    /// Write one cleaned-series CSV per participant into `dir`.
    ///
    /// The timestamp column comes first, then the variables in retrieval
    /// order; missing cells are left empty.
    pub fn write_series_csvs(&self, dir: &Path) -> Result<Vec<PathBuf>, ReportError> {
        std::fs::create_dir_all(dir).map_err(|e| ReportError::Io(e.to_string()))?;

        let mut written = Vec::new();
        for (key, entry) in self.participants() {
            let series = match &entry.series {
                Some(series) => series,
                None => continue,
            };
            let path = dir.join(format!("{key}.csv"));
            write_series_csv(&path, series)?;
            written.push(path);
        }
        Ok(written)
    }

    /// Write the summary-statistics table for one variable.
    ///
    /// One row per participant and pooled group, keyed by the fixed
    /// statistic names. The exceedance column appears only for pm25.
    pub fn write_summary_csv(&self, path: &Path, variable: &str) -> Result<(), ReportError> {
        let mut writer = csv::Writer::from_path(path).map_err(|e| ReportError::Csv(e.to_string()))?;

        let mut header: Vec<&str> = vec!["id"];
        header.extend(SummaryStats::STAT_NAMES);
        if variable == PM25_VARIABLE {
            header.push(SummaryStats::PERCENT_ABOVE_NAME);
        }
        writer
            .write_record(&header)
            .map_err(|e| ReportError::Csv(e.to_string()))?;

        for (key, entry) in &self.entries {
            let stats = match entry.stats.get(variable) {
                Some(stats) => stats,
                None => continue,
            };

            let mut record: Vec<String> = vec![key.to_string()];
            record.extend(stats.values().iter().map(|v| v.to_string()));
            if variable == PM25_VARIABLE {
                record.push(
                    stats
                        .percent_above_threshold
                        .map(|v| v.to_string())
                        .unwrap_or_default(),
                );
            }
            writer
                .write_record(&record)
                .map_err(|e| ReportError::Csv(e.to_string()))?;
        }

        writer.flush().map_err(|e| ReportError::Io(e.to_string()))?;
        Ok(())
    }
}

/// Report I/O error types.
#[derive(Debug)]
pub enum ReportError {
    Io(String),
    Csv(String),
    Parse(String),
}

impl std::fmt::Display for ReportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReportError::Io(e) => write!(f, "Report IO error: {e}"),
            ReportError::Csv(e) => write!(f, "Report CSV error: {e}"),
            ReportError::Parse(e) => write!(f, "Report parse error: {e}"),
        }
    }
}

impl std::error::Error for ReportError {}

/// Write one cleaned series as CSV, timestamp column first.
pub fn write_series_csv(path: &Path, series: &SampleSeries) -> Result<(), ReportError> {
    let mut writer = csv::Writer::from_path(path).map_err(|e| ReportError::Csv(e.to_string()))?;

    let mut header: Vec<&str> = vec!["time"];
    header.extend(series.variables.iter().map(String::as_str));
    writer
        .write_record(&header)
        .map_err(|e| ReportError::Csv(e.to_string()))?;

    for row in &series.rows {
        let mut record: Vec<String> = vec![row.time.format(CSV_TIME_FORMAT).to_string()];
        record.extend(
            row.values
                .iter()
                .map(|value| value.map(|v| v.to_string()).unwrap_or_default()),
        );
        writer
            .write_record(&record)
            .map_err(|e| ReportError::Csv(e.to_string()))?;
    }

    writer.flush().map_err(|e| ReportError::Io(e.to_string()))?;
    Ok(())
}

/// Read a cleaned series back from CSV. Empty or non-numeric cells become
/// missing markers.
pub fn read_series_csv(path: &Path) -> Result<SampleSeries, ReportError> {
    let mut reader = csv::Reader::from_path(path).map_err(|e| ReportError::Csv(e.to_string()))?;

    let headers = reader
        .headers()
        .map_err(|e| ReportError::Csv(e.to_string()))?
        .clone();
    if headers.is_empty() || headers.get(0) != Some("time") {
        return Err(ReportError::Parse(format!(
            "{}: first column must be 'time'",
            path.display()
        )));
    }

    let variables: Vec<String> = headers.iter().skip(1).map(String::from).collect();
    let mut series = SampleSeries::new(variables);

    for record in reader.records() {
        let record = record.map_err(|e| ReportError::Csv(e.to_string()))?;
        let time_field = record.get(0).unwrap_or("");
        let time = NaiveDateTime::parse_from_str(time_field, CSV_TIME_FORMAT)
            .map_err(|e| ReportError::Parse(format!("bad timestamp '{time_field}': {e}")))?;

        let values: Vec<Option<f64>> = record
            .iter()
            .skip(1)
            .map(|cell| cell.trim().parse::<f64>().ok())
            .collect();

        series.rows.push(SampleRow { time, values });
    }

    Ok(series)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::stats::compute_stats;
    use chrono::NaiveDate;

    fn sample_series() -> SampleSeries {
        let mut series = SampleSeries::new(vec!["co2".to_string(), "pm25".to_string()]);
        let base = NaiveDate::from_ymd_opt(2023, 3, 23)
            .unwrap()
            .and_hms_opt(19, 0, 0)
            .unwrap();
        series.rows.push(SampleRow {
            time: base,
            values: vec![Some(753.0), Some(10.25)],
        });
        series.rows.push(SampleRow {
            time: base + chrono::Duration::hours(1),
            values: vec![Some(757.0), None],
        });
        series
    }

    #[test]
    fn test_subject_key_ordering_and_display() {
        let mut keys = vec![
            SubjectKey::Pooled(PooledKey::Overall),
            SubjectKey::Participant("A002".to_string()),
            SubjectKey::Pooled(PooledKey::Cohort(Cohort::A)),
            SubjectKey::Participant("A001".to_string()),
        ];
        keys.sort();

        let rendered: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        assert_eq!(rendered, vec!["A001", "A002", "group_A", "overall"]);
    }

    #[test]
    fn test_series_csv_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("A001.csv");
        let series = sample_series();

        write_series_csv(&path, &series).unwrap();
        let read_back = read_series_csv(&path).unwrap();

        assert_eq!(read_back.variables, series.variables);
        assert_eq!(read_back.rows.len(), series.rows.len());
        for (original, round_tripped) in series.rows.iter().zip(read_back.rows.iter()) {
            assert_eq!(original.time, round_tripped.time);
            for (a, b) in original.values.iter().zip(round_tripped.values.iter()) {
                match (a, b) {
                    (Some(a), Some(b)) => assert!((a - b).abs() < 1e-9),
                    (None, None) => {}
                    other => panic!("values diverged: {other:?}"),
                }
            }
        }
    }

    #[test]
    fn test_summary_csv_includes_pooled_rows_and_exceedance_for_pm25() {
        let mut report = Report::new();

        let mut entry = ReportEntry::participant(Cohort::A, sample_series());
        entry.stats.insert(
            "pm25".to_string(),
            compute_stats(&[10.0, 15.0], "pm25", 12.0).unwrap(),
        );
        report
            .entries
            .insert(SubjectKey::Participant("A001".to_string()), entry);

        let mut pooled = ReportEntry::pooled();
        pooled.stats.insert(
            "pm25".to_string(),
            compute_stats(&[10.0, 15.0], "pm25", 12.0).unwrap(),
        );
        report
            .entries
            .insert(SubjectKey::Pooled(PooledKey::Overall), pooled);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary_stats_pm25.csv");
        report.write_summary_csv(&path, "pm25").unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let mut lines = content.lines();
        let header = lines.next().unwrap();
        assert!(header.starts_with("id,10th_percentile"));
        assert!(header.ends_with("percent_above_threshold"));

        let body: Vec<&str> = lines.collect();
        assert_eq!(body.len(), 2);
        assert!(body[0].starts_with("A001,"));
        assert!(body[1].starts_with("overall,"));
    }

    #[test]
    fn test_summary_csv_omits_exceedance_for_other_variables() {
        let mut report = Report::new();
        let mut entry = ReportEntry::participant(Cohort::B, sample_series());
        entry.stats.insert(
            "co2".to_string(),
            compute_stats(&[700.0, 750.0], "co2", 12.0).unwrap(),
        );
        report
            .entries
            .insert(SubjectKey::Participant("A002".to_string()), entry);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary_stats_co2.csv");
        report.write_summary_csv(&path, "co2").unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let header = content.lines().next().unwrap();
        assert!(!header.contains("percent_above_threshold"));
        assert!(header.ends_with("mean"));
    }
}
