//! Per-run pooled-sample accumulation.
//!
//! Cohort and population statistics are computed over the union of raw
//! cleaned samples, so each participant's values are appended to the right
//! buckets as they are processed. The accumulator is an explicit value owned
//! by the run; merging two accumulators supports a map-reduce split if the
//! batch is ever parallelized.

use crate::core::cohort::Cohort;
use std::collections::BTreeMap;

/// Identity of a pooled bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PooledKey {
    Cohort(Cohort),
    Overall,
}

impl PooledKey {
    /// All buckets in output order: the three cohorts, then overall.
    pub fn all() -> [PooledKey; 4] {
        [
            PooledKey::Cohort(Cohort::A),
            PooledKey::Cohort(Cohort::B),
            PooledKey::Cohort(Cohort::C),
            PooledKey::Overall,
        ]
    }
}

impl std::fmt::Display for PooledKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PooledKey::Cohort(cohort) => write!(f, "group_{}", cohort.label()),
            PooledKey::Overall => write!(f, "overall"),
        }
    }
}

/// Append-only pooled collections for one run, keyed by bucket and variable.
#[derive(Debug, Default)]
pub struct RunSession {
    buckets: BTreeMap<PooledKey, BTreeMap<String, Vec<f64>>>,
}

impl RunSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Absorb one participant's cleaned values for one variable.
    ///
    /// Values are pooled into the overall bucket and, for assigned cohorts,
    /// the cohort bucket. Raw values are concatenated, never averaged.
    pub fn absorb(&mut self, cohort: Cohort, variable: &str, values: &[f64]) {
        self.extend(PooledKey::Overall, variable, values);
        if cohort != Cohort::Pooled {
            self.extend(PooledKey::Cohort(cohort), variable, values);
        }
    }

    /// Pooled values for one bucket and variable. Empty when nothing was
    /// absorbed.
    pub fn values(&self, key: PooledKey, variable: &str) -> &[f64] {
        self.buckets
            .get(&key)
            .and_then(|vars| vars.get(variable))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Merge another accumulator into this one.
    pub fn merge(&mut self, other: RunSession) {
        for (key, vars) in other.buckets {
            for (variable, values) in vars {
                self.extend(key, &variable, &values);
            }
        }
    }

    fn extend(&mut self, key: PooledKey, variable: &str, values: &[f64]) {
        self.buckets
            .entry(key)
            .or_default()
            .entry(variable.to_string())
            .or_default()
            .extend_from_slice(values);
    }
}
