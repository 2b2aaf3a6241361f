//! Core analysis logic for the pipeline.
//!
//! This module contains:
//! - Visit-window resolution from survey rows
//! - Cohort assignment and display colors
//! - Sample alignment and cleaning
//! - Summary statistics and pooled-sample accumulation

pub mod align;
pub mod cohort;
pub mod session;
pub mod stats;
pub mod visits;

// Re-export commonly used types
pub use align::{align_samples, MissingPolicy, SampleRow, SampleSeries};
pub use cohort::{Cohort, COHORT_PALETTE};
pub use session::{PooledKey, RunSession};
pub use stats::{compute_stats, StatsError, SummaryStats, DEFAULT_PM25_THRESHOLD, PM25_VARIABLE};
pub use visits::{
    parse_visit_datetime, resolve_visits, ResolvedVisits, VisitError, VisitWindowSet,
    VISIT_DATETIME_FORMATS,
};
