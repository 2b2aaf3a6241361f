//! Run orchestration.
//!
//! Participants are processed one at a time in sorted-identifier order
//! through a linear stage sequence; any per-participant failure is terminal
//! for that participant and invisible to the rest of the batch. Only
//! configuration problems and whole-export failures abort the run.

use crate::config::{Config, ConfigError};
use crate::core::cohort::Cohort;
use crate::core::session::{PooledKey, RunSession};
use crate::core::{align_samples, compute_stats, resolve_visits};
use crate::device::{DeviceError, Resolution, SampleSource};
use crate::report::{Report, ReportEntry, SubjectKey};
use crate::survey::{SurveyError, SurveyRow, SurveySource};
use chrono::NaiveDateTime;
use std::collections::BTreeMap;
use tracing::{error, info, warn};

/// Stages of the per-participant pipeline, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Unresolved,
    WindowResolved,
    CohortAssigned,
    SamplesAligned,
    StatsComputed,
    Assembled,
}

/// A participant excluded from the run, with the last stage they reached.
#[derive(Debug, Clone)]
pub struct ParticipantFailure {
    pub id: String,
    pub stage: Stage,
    pub reason: String,
}

/// Fatal pipeline errors. Per-participant problems never surface here.
#[derive(Debug)]
pub enum PipelineError {
    Config(ConfigError),
    Survey(SurveyError),
    Device(DeviceError),
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::Config(e) => write!(f, "{e}"),
            PipelineError::Survey(e) => write!(f, "{e}"),
            PipelineError::Device(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for PipelineError {}

impl From<ConfigError> for PipelineError {
    fn from(e: ConfigError) -> Self {
        PipelineError::Config(e)
    }
}

impl From<SurveyError> for PipelineError {
    fn from(e: SurveyError) -> Self {
        PipelineError::Survey(e)
    }
}

impl From<DeviceError> for PipelineError {
    fn from(e: DeviceError) -> Self {
        PipelineError::Device(e)
    }
}

/// The result of one run: the assembled report plus the exclusion list.
#[derive(Debug)]
pub struct RunOutcome {
    pub report: Report,
    pub failures: Vec<ParticipantFailure>,
}

/// Group survey rows by participant id. BTreeMap keys give the
/// deterministic sorted processing order.
fn group_rows(rows: Vec<SurveyRow>) -> BTreeMap<String, Vec<SurveyRow>> {
    let mut grouped: BTreeMap<String, Vec<SurveyRow>> = BTreeMap::new();
    for row in rows {
        grouped.entry(row.participant_id.clone()).or_default().push(row);
    }
    grouped
}

/// Execute a full analysis run.
///
/// `now` is the clock value used for synthesized end-of-collection
/// boundaries; passing it in keeps window resolution testable.
pub fn run(
    config: &Config,
    survey: &dyn SurveySource,
    samples: &dyn SampleSource,
    now: NaiveDateTime,
) -> Result<RunOutcome, PipelineError> {
    config.validate()?;

    let rows = survey.fetch_rows(&config.survey.survey_id)?;
    let grouped = group_rows(rows);
    info!(participants = grouped.len(), "survey rows grouped");

    let directory = samples.device_directory()?;

    let mut session = RunSession::new();
    let mut report = Report::new();
    let mut failures: Vec<ParticipantFailure> = Vec::new();
    let fail = |failures: &mut Vec<ParticipantFailure>, id: &str, stage: Stage, reason: String| {
        error!(participant = id, ?stage, "{reason}");
        failures.push(ParticipantFailure {
            id: id.to_string(),
            stage,
            reason,
        });
    };

    for (participant_id, participant_rows) in &grouped {
        // Unresolved -> WindowResolved
        let end_override = config.study.end_overrides.get(participant_id).copied();
        let resolved = match resolve_visits(participant_id, participant_rows, end_override, now) {
            Ok(resolved) => resolved,
            Err(e) => {
                fail(&mut failures, participant_id, Stage::Unresolved, e.to_string());
                continue;
            }
        };

        let device_id = match &resolved.device_id {
            Some(id) => id,
            None => {
                fail(
                    &mut failures,
                    participant_id,
                    Stage::WindowResolved,
                    "no device id recorded in survey rows".to_string(),
                );
                continue;
            }
        };
        let serial = match directory.resolve(device_id) {
            Ok(serial) => serial,
            Err(e) => {
                fail(&mut failures, participant_id, Stage::WindowResolved, e.to_string());
                continue;
            }
        };

        // WindowResolved -> CohortAssigned
        let cohort = resolved
            .cohort_code
            .as_deref()
            .map(Cohort::from_code)
            .unwrap_or(Cohort::Pooled);

        // CohortAssigned -> SamplesAligned. The device query carries the
        // closed collection interval; nothing is re-filtered afterwards.
        let (start_epoch, end_epoch) = resolved.windows.collection_range();
        let raw = match samples.fetch_samples(serial, start_epoch, end_epoch, Resolution::Hour) {
            Ok(raw) => raw,
            Err(e) => {
                fail(&mut failures, participant_id, Stage::CohortAssigned, e.to_string());
                continue;
            }
        };
        let series = align_samples(&raw, config.study.missing_policy);

        // SamplesAligned -> StatsComputed
        let mut entry = ReportEntry::participant(cohort, series.clone());
        for variable in &config.study.variables {
            let values = match series.column(variable) {
                Some(values) => values,
                None => {
                    warn!(
                        participant = participant_id.as_str(),
                        variable = variable.as_str(),
                        "variable not present in retrieved samples"
                    );
                    continue;
                }
            };

            match compute_stats(&values, variable, config.study.pm25_threshold) {
                Ok(stats) => {
                    session.absorb(cohort, variable, &values);
                    entry.stats.insert(variable.clone(), stats);
                }
                Err(e) => {
                    warn!(participant = participant_id.as_str(), "{e}");
                }
            }
        }

        // StatsComputed -> Assembled
        report
            .entries
            .insert(SubjectKey::Participant(participant_id.clone()), entry);
        info!(
            participant = participant_id.as_str(),
            cohort = %cohort,
            samples = series.len(),
            "participant assembled"
        );
    }

    // Pooled buckets get the same statistics procedure over the
    // concatenated raw values.
    for key in PooledKey::all() {
        let mut entry = ReportEntry::pooled();
        for variable in &config.study.variables {
            let values = session.values(key, variable);
            if values.is_empty() {
                continue;
            }
            match compute_stats(values, variable, config.study.pm25_threshold) {
                Ok(stats) => {
                    entry.pooled_values.insert(variable.clone(), values.to_vec());
                    entry.stats.insert(variable.clone(), stats);
                }
                Err(e) => warn!(bucket = %key, "{e}"),
            }
        }

        if !entry.stats.is_empty() {
            report.entries.insert(SubjectKey::Pooled(key), entry);
        }
    }

    info!(
        assembled = report.entries.len(),
        excluded = failures.len(),
        "run complete"
    );

    Ok(RunOutcome { report, failures })
}
