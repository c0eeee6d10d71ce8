//! Score aggregation: mapping scores onto the status vocabulary and
//! combining per-criterion scores into an overall score.
//!
//! Everything here is pure. Status lists are validated once into a
//! [`StatusScale`], after which lookups cannot fail.

use std::collections::HashSet;
use thiserror::Error;

use crate::types::{ScoringMode, StatusOption};

/// Errors from status-option validation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScoringError {
    #[error("Status option list is empty")]
    EmptyScale,

    #[error("Status option list has no option with threshold 0")]
    MissingZeroThreshold,

    #[error("Status option '{id}' has threshold {value} outside 0..=100")]
    InvalidThreshold { id: String, value: f64 },

    #[error("Duplicate status option id: {0}")]
    DuplicateOption(String),

    #[error("Status option '{0}' has an empty label")]
    EmptyLabel(String),

    #[error("Status option '{id}' belongs to {found} mode, expected {expected}")]
    ModeMismatch {
        id: String,
        expected: ScoringMode,
        found: ScoringMode,
    },
}

/// Validate a status option list for one scoring mode.
///
/// Only active options are considered for the threshold-0 requirement.
pub fn validate_status_options(
    options: &[StatusOption],
    mode: ScoringMode,
) -> Result<(), ScoringError> {
    let mut seen = HashSet::new();

    for option in options {
        if option.mode != mode {
            return Err(ScoringError::ModeMismatch {
                id: option.id.clone(),
                expected: mode,
                found: option.mode,
            });
        }
        if !seen.insert(option.id.as_str()) {
            return Err(ScoringError::DuplicateOption(option.id.clone()));
        }
        if option.label.trim().is_empty() {
            return Err(ScoringError::EmptyLabel(option.id.clone()));
        }
        if !(0.0..=100.0).contains(&option.min_score) {
            return Err(ScoringError::InvalidThreshold {
                id: option.id.clone(),
                value: option.min_score,
            });
        }
    }

    let active: Vec<&StatusOption> = options.iter().filter(|o| o.active).collect();
    if active.is_empty() {
        return Err(ScoringError::EmptyScale);
    }
    if !active.iter().any(|o| o.min_score == 0.0) {
        return Err(ScoringError::MissingZeroThreshold);
    }

    Ok(())
}

/// Map a score onto an ordered status option list.
///
/// Options are ranked by threshold descending (stable, so earlier-configured
/// options win ties) and the first whose threshold is `<= score` is returned.
/// When the score is below every threshold the lowest-threshold option is
/// returned. `None` only for an empty list.
pub fn status_for_score(score: f64, options: &[StatusOption]) -> Option<&StatusOption> {
    let score = clamp_score(score);

    let mut ranked: Vec<&StatusOption> = options.iter().collect();
    ranked.sort_by(|a, b| b.min_score.total_cmp(&a.min_score));

    ranked
        .iter()
        .find(|o| o.min_score <= score)
        .or_else(|| ranked.last())
        .copied()
}

fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 100.0)
    }
}

/// A validated, ordered status vocabulary for one scoring mode.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusScale {
    mode: ScoringMode,
    options: Vec<StatusOption>,
}

impl StatusScale {
    /// Build a scale from the active options of a list.
    pub fn new(mode: ScoringMode, options: Vec<StatusOption>) -> Result<Self, ScoringError> {
        validate_status_options(&options, mode)?;
        let options = options.into_iter().filter(|o| o.active).collect();
        Ok(Self { mode, options })
    }

    pub fn mode(&self) -> ScoringMode {
        self.mode
    }

    /// Options in configured order.
    pub fn options(&self) -> &[StatusOption] {
        &self.options
    }

    /// Infallible lookup: a scale always holds a threshold-0 option.
    pub fn status_for_score(&self, score: f64) -> &StatusOption {
        // Non-empty by construction.
        status_for_score(score, &self.options).unwrap_or(&self.options[0])
    }

    /// Find the option a free-form selection refers to.
    pub fn find(&self, selection: &str) -> Option<&StatusOption> {
        self.options.iter().find(|o| o.matches(selection))
    }

    /// Find an option by id.
    pub fn by_id(&self, id: &str) -> Option<&StatusOption> {
        self.options.iter().find(|o| o.id == id)
    }
}

/// Input to overall-score aggregation for one criterion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredCriterion {
    /// `None` when the criterion is excluded (not applicable, not evaluated)
    pub score: Option<f64>,

    /// Criterion weight; ignored for unweighted sets
    pub weight: Option<f64>,
}

impl ScoredCriterion {
    pub fn new(score: Option<f64>, weight: Option<f64>) -> Self {
        Self { score, weight }
    }
}

/// Combine per-criterion scores into an overall score.
///
/// Weighted sets use the weighted mean, unweighted sets the plain mean.
/// Excluded criteria leave both numerator and denominator untouched.
/// Returns `None` when nothing is left to aggregate.
pub fn aggregate_overall_score(items: &[ScoredCriterion], weighted: bool) -> Option<f64> {
    let mut numerator = 0.0;
    let mut denominator = 0.0;

    for item in items {
        let Some(score) = item.score else { continue };
        let weight = if weighted {
            item.weight.filter(|w| *w > 0.0).unwrap_or(1.0)
        } else {
            1.0
        };
        numerator += clamp_score(score) * weight;
        denominator += weight;
    }

    if denominator > 0.0 {
        Some(numerator / denominator)
    } else {
        None
    }
}
