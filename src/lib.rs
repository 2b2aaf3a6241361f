//! AIRE pipeline - indoor-air-quality analysis for a visit-based study.
//!
//! This library pulls sensor readings for study participants from a cloud
//! device API, aligns them to the per-participant visit windows recorded in
//! a survey export, and computes one fixed summary-statistic set at three
//! granularities: per participant, per cohort, and for the whole population.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        AIRE Pipeline                         │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌──────────┐    ┌─────────────┐    ┌──────────┐             │
//! │  │  Survey  │───▶│    Visit    │───▶│  Sample  │             │
//! │  │  Export  │    │   Windows   │    │  Aligner │             │
//! │  └──────────┘    └─────────────┘    └──────────┘             │
//! │       │                                   │                  │
//! │       ▼                                   ▼                  │
//! │  ┌──────────┐    ┌─────────────┐    ┌──────────┐             │
//! │  │  Device  │    │   Grouped   │───▶│  Report  │             │
//! │  │  Cloud   │    │    Stats    │    │ Assembly │             │
//! │  └──────────┘    └─────────────┘    └──────────┘             │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Per-participant failures (unparseable visit dates, missing required
//! visits, unknown device ids, upstream API errors) exclude that participant
//! and leave the rest of the batch untouched; only configuration problems
//! abort a run.

pub mod config;
pub mod core;
pub mod device;
pub mod pipeline;
pub mod report;
pub mod survey;

// Re-export key types at crate root for convenience
pub use config::{Config, ConfigError, DeviceConfig, StudyConfig, SurveyConfig};
pub use core::{
    align_samples, compute_stats, resolve_visits, Cohort, MissingPolicy, PooledKey, RunSession,
    SampleSeries, StatsError, SummaryStats, VisitError, VisitWindowSet,
};
pub use device::{
    BlockingDeviceClient, DeviceDirectory, DeviceError, RawSampleSet, Resolution, SampleSource,
};
pub use pipeline::{ParticipantFailure, PipelineError, RunOutcome, Stage};
pub use report::{Report, ReportEntry, ReportError, SubjectKey};
pub use survey::{BlockingSurveyClient, SurveyError, SurveyRow, SurveySource};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
