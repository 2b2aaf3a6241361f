//! End-to-end pipeline tests against in-memory survey and device fixtures.

use aire_pipeline::device::{
    Device, DeviceDirectory, DeviceError, RawSampleSet, Resolution, SampleSource,
    ELIGIBLE_DEVICE_TYPE,
};
use aire_pipeline::pipeline::{self, Stage};
use aire_pipeline::report::SubjectKey;
use aire_pipeline::survey::{SurveyError, SurveyRow, SurveySource};
use aire_pipeline::{Cohort, Config, PooledKey};
use chrono::{NaiveDate, NaiveDateTime};
use serde_json::json;
use std::collections::BTreeMap;

struct FixtureSurvey {
    rows: Vec<SurveyRow>,
}

impl SurveySource for FixtureSurvey {
    fn fetch_rows(&self, _survey_id: &str) -> Result<Vec<SurveyRow>, SurveyError> {
        Ok(self.rows.clone())
    }
}

struct FixtureSamples {
    devices: Vec<Device>,
    samples: BTreeMap<String, RawSampleSet>,
}

impl SampleSource for FixtureSamples {
    fn device_directory(&self) -> Result<DeviceDirectory, DeviceError> {
        Ok(DeviceDirectory::from_devices(self.devices.clone()))
    }

    fn fetch_samples(
        &self,
        serial: &str,
        start_epoch: i64,
        end_epoch: i64,
        _resolution: Resolution,
    ) -> Result<RawSampleSet, DeviceError> {
        assert!(start_epoch < end_epoch, "collection range must be forward");
        self.samples
            .get(serial)
            .cloned()
            .ok_or_else(|| DeviceError::Api {
                status: 404,
                message: format!("no samples for serial {serial}"),
            })
    }
}

fn visit_rows(id: &str, cohort: &str, device: &str) -> Vec<SurveyRow> {
    let row = |visit: &str, date: &str| SurveyRow {
        participant_id: id.to_string(),
        visit: visit.to_string(),
        date: date.to_string(),
        time: "10:00".to_string(),
        cohort_code: Some(cohort.to_string()),
        device_id: Some(device.to_string()),
    };
    vec![
        row("1", "03-01-2023"),
        row("2", "03-08-2023"),
        row("3", "03-15-2023"),
    ]
}

/// Five hourly pm25 values, exactly one strictly above 12.
fn pm25_samples(values: [f64; 5]) -> RawSampleSet {
    let base: i64 = 1_677_664_800; // 2023-03-01 10:00:00 UTC
    RawSampleSet {
        time: (0..5).map(|i| base + i * 3600).collect(),
        columns: vec![(
            "pm25".to_string(),
            values.iter().map(|v| json!(v)).collect(),
        )],
    }
}

fn fixture_devices() -> Vec<Device> {
    ["A01", "A02", "A03"]
        .iter()
        .enumerate()
        .map(|(i, name)| Device {
            id: format!("29300000{i}"),
            device_type: ELIGIBLE_DEVICE_TYPE.to_string(),
            name: name.to_string(),
        })
        .collect()
}

fn fixture_samples() -> BTreeMap<String, RawSampleSet> {
    let mut samples = BTreeMap::new();
    samples.insert("293000000".to_string(), pm25_samples([5.0, 8.0, 10.0, 11.0, 13.0]));
    samples.insert("293000001".to_string(), pm25_samples([6.0, 7.0, 9.0, 14.0, 12.0]));
    samples.insert("293000002".to_string(), pm25_samples([4.0, 4.5, 20.0, 5.0, 6.0]));
    samples
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.survey.survey_id = "SV_3dDF6dhdbgb81Ho".to_string();
    config.survey.api_token = "token".to_string();
    config.survey.data_center = "sjc1".to_string();
    config.study.variables = vec!["pm25".to_string()];
    config
}

fn fixed_now() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2023, 4, 1)
        .unwrap()
        .and_hms_opt(12, 0, 0)
        .unwrap()
}

#[test]
fn test_full_run_assembles_participants_and_pooled_groups() {
    let survey = FixtureSurvey {
        rows: [
            visit_rows("A001", "1", "A01"),
            visit_rows("A002", "2", "A02"),
            visit_rows("A003", "3", "A03"),
        ]
        .concat(),
    };
    let samples = FixtureSamples {
        devices: fixture_devices(),
        samples: fixture_samples(),
    };

    let outcome = pipeline::run(&test_config(), &survey, &samples, fixed_now()).unwrap();
    assert!(outcome.failures.is_empty());

    // 3 participants + 3 cohort buckets + overall
    assert_eq!(outcome.report.entries.len(), 7);
    assert_eq!(outcome.report.participants().count(), 3);
    assert_eq!(outcome.report.pooled_groups().count(), 4);

    // Each participant has 1 of 5 values above the 12.0 threshold.
    for (key, entry) in outcome.report.participants() {
        let stats = entry.stats.get("pm25").unwrap_or_else(|| {
            panic!("missing pm25 stats for {key}");
        });
        assert_eq!(stats.percent_above_threshold, Some(20.0));
    }

    // Pooled overall: 3 of 15 values above threshold.
    let overall = &outcome.report.entries[&SubjectKey::Pooled(PooledKey::Overall)];
    let overall_stats = overall.stats.get("pm25").unwrap();
    assert_eq!(overall_stats.percent_above_threshold, Some(20.0));
    assert_eq!(overall.pooled_values["pm25"].len(), 15);
    assert_eq!(overall_stats.max, 20.0);
}

#[test]
fn test_unknown_device_excludes_only_that_participant() {
    let survey = FixtureSurvey {
        rows: [
            visit_rows("A001", "1", "A01"),
            visit_rows("A004", "1", "A99"),
        ]
        .concat(),
    };
    let samples = FixtureSamples {
        devices: fixture_devices(),
        samples: fixture_samples(),
    };

    let outcome = pipeline::run(&test_config(), &survey, &samples, fixed_now()).unwrap();

    assert_eq!(outcome.failures.len(), 1);
    let failure = &outcome.failures[0];
    assert_eq!(failure.id, "A004");
    assert_eq!(failure.stage, Stage::WindowResolved);
    assert!(failure.reason.contains("A99"));

    assert_eq!(outcome.report.participants().count(), 1);
    assert!(outcome
        .report
        .entries
        .contains_key(&SubjectKey::Participant("A001".to_string())));
}

#[test]
fn test_missing_required_visit_excludes_participant() {
    let mut rows = visit_rows("A001", "1", "A01");
    rows.remove(1); // drop visit 2

    let survey = FixtureSurvey { rows };
    let samples = FixtureSamples {
        devices: fixture_devices(),
        samples: fixture_samples(),
    };

    let outcome = pipeline::run(&test_config(), &survey, &samples, fixed_now()).unwrap();

    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].stage, Stage::Unresolved);
    assert!(outcome.failures[0].reason.contains("visit 2"));
    assert_eq!(outcome.report.participants().count(), 0);
}

#[test]
fn test_cohort_buckets_pool_only_their_members() {
    let survey = FixtureSurvey {
        rows: [
            visit_rows("A001", "1", "A01"),
            visit_rows("A002", "1", "A02"),
        ]
        .concat(),
    };
    let samples = FixtureSamples {
        devices: fixture_devices(),
        samples: fixture_samples(),
    };

    let outcome = pipeline::run(&test_config(), &survey, &samples, fixed_now()).unwrap();

    // Both participants are cohort A; no group_B or group_C entries appear.
    let pooled_keys: Vec<String> = outcome
        .report
        .pooled_groups()
        .map(|(key, _)| key.to_string())
        .collect();
    assert_eq!(pooled_keys, vec!["group_A", "overall"]);

    let group_a = &outcome.report.entries[&SubjectKey::Pooled(PooledKey::Cohort(Cohort::A))];
    assert_eq!(group_a.pooled_values["pm25"].len(), 10);
}

#[test]
fn test_run_artifacts_round_trip_through_csv() {
    let survey = FixtureSurvey {
        rows: visit_rows("A001", "1", "A01"),
    };
    let samples = FixtureSamples {
        devices: fixture_devices(),
        samples: fixture_samples(),
    };

    let outcome = pipeline::run(&test_config(), &survey, &samples, fixed_now()).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let written = outcome.report.write_series_csvs(dir.path()).unwrap();
    assert_eq!(written.len(), 1);
    assert!(written[0].ends_with("A001.csv"));

    let read_back = aire_pipeline::report::read_series_csv(&written[0]).unwrap();
    assert_eq!(read_back.variables, vec!["pm25"]);
    assert_eq!(read_back.column("pm25"), Some(vec![5.0, 8.0, 10.0, 11.0, 13.0]));

    let summary_path = dir.path().join("summary_stats_pm25.csv");
    outcome
        .report
        .write_summary_csv(&summary_path, "pm25")
        .unwrap();
    let content = std::fs::read_to_string(&summary_path).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert!(lines[0].ends_with("percent_above_threshold"));
    // A001 plus group_A and overall
    assert_eq!(lines.len(), 4);
}
