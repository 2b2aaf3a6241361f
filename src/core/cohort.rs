//! Cohort assignment: raw group codes to canonical labels and display colors.
//!
//! The survey export records the educational group as a bare numeric code.
//! Everything downstream (grouping, pooled buckets, chart colors) works with
//! the canonical label instead.

use serde::{Deserialize, Serialize};

/// Canonical cohort label for a participant.
///
/// `Pooled` is the unassigned/overall bucket: it covers unknown group codes
/// as well as the synthetic pooled-group entries in the final report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Cohort {
    A,
    B,
    C,
    Pooled,
}

/// Fixed display palette, one slot per cohort plus one for the pooled bucket.
pub const COHORT_PALETTE: [&str; 4] = ["#a1c9f4", "#ffb482", "#8de5a1", "#d0bbff"];

impl Cohort {
    /// Map a raw group code from the survey export to a canonical label.
    ///
    /// Codes "1"/"2"/"3" map to A/B/C; anything else lands in the pooled
    /// bucket.
    pub fn from_code(code: &str) -> Self {
        match code.trim() {
            "1" => Cohort::A,
            "2" => Cohort::B,
            "3" => Cohort::C,
            _ => Cohort::Pooled,
        }
    }

    /// Canonical label string.
    pub fn label(&self) -> &'static str {
        match self {
            Cohort::A => "A",
            Cohort::B => "B",
            Cohort::C => "C",
            Cohort::Pooled => "overall",
        }
    }

    /// Deterministic display color for this cohort.
    pub fn color(&self) -> &'static str {
        match self {
            Cohort::A => COHORT_PALETTE[0],
            Cohort::B => COHORT_PALETTE[1],
            Cohort::C => COHORT_PALETTE[2],
            Cohort::Pooled => COHORT_PALETTE[3],
        }
    }

    /// The three real cohorts, in order.
    pub fn assigned() -> [Cohort; 3] {
        [Cohort::A, Cohort::B, Cohort::C]
    }
}

impl std::fmt::Display for Cohort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_mapping() {
        assert_eq!(Cohort::from_code("1"), Cohort::A);
        assert_eq!(Cohort::from_code("2"), Cohort::B);
        assert_eq!(Cohort::from_code("3"), Cohort::C);
        assert_eq!(Cohort::from_code("7"), Cohort::Pooled);
        assert_eq!(Cohort::from_code(""), Cohort::Pooled);
        assert_eq!(Cohort::from_code(" 2 "), Cohort::B);
    }

    #[test]
    fn test_colors_are_deterministic_and_distinct() {
        for cohort in [Cohort::A, Cohort::B, Cohort::C, Cohort::Pooled] {
            assert_eq!(cohort.color(), cohort.color());
        }

        let mut colors: Vec<&str> = COHORT_PALETTE.to_vec();
        colors.sort();
        colors.dedup();
        assert_eq!(colors.len(), 4);
    }
}
