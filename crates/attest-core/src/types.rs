//! Shared identifiers and value types.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generate a fresh random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

id_type!(
    /// Organization that owns doc types, criteria and configuration.
    OrgId
);
id_type!(
    /// Workspace an evaluation belongs to.
    WorkspaceId
);
id_type!(
    /// Document held by the external document store.
    DocumentId
);
id_type!(DocTypeId);
id_type!(
    /// Lineage identifier shared by every version of a criteria set.
    CriteriaSetId
);
id_type!(CriterionItemId);
id_type!(EvaluationId);
id_type!(ResultId);

/// How criterion outcomes are expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringMode {
    /// Met / not met
    Boolean,
    /// A categorical grade picked from the status vocabulary
    Graded,
    /// A 0..=100 score mapped onto the status vocabulary
    Numeric,
}

impl ScoringMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScoringMode::Boolean => "boolean",
            ScoringMode::Graded => "graded",
            ScoringMode::Numeric => "numeric",
        }
    }
}

impl fmt::Display for ScoringMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A labeled, colored, threshold-bound categorical outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusOption {
    /// Stable key, unique within one list
    pub id: String,

    /// Display label (e.g., "Compliant")
    pub label: String,

    /// Display color (e.g., "#16a34a")
    pub color: String,

    /// Minimum score (0..=100) at which this option applies
    pub min_score: f64,

    /// Scoring mode this option belongs to
    pub mode: ScoringMode,

    /// Inactive options are kept for history but never resolved
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

impl StatusOption {
    pub fn new(
        id: impl Into<String>,
        label: impl Into<String>,
        color: impl Into<String>,
        min_score: f64,
        mode: ScoringMode,
    ) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            color: color.into(),
            min_score,
            mode,
            active: true,
        }
    }

    /// Whether a free-form selection names this option (by id or label).
    pub fn matches(&self, selection: &str) -> bool {
        let selection = selection.trim();
        self.id.eq_ignore_ascii_case(selection) || self.label.eq_ignore_ascii_case(selection)
    }
}

/// A ranked passage returned by the content retriever.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    /// Stable identifier usable as a citation target
    pub id: String,

    /// Document the passage was taken from
    pub document_id: DocumentId,

    /// Passage text
    pub text: String,

    /// Retriever relevance score (higher is better)
    #[serde(default)]
    pub relevance: f32,

    /// Human-readable location (page, section)
    #[serde(default)]
    pub location: Option<String>,
}

/// A pointer from a judgment claim into retrieved content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    /// What the citation supports
    pub claim: String,

    /// Passage the claim points into
    pub passage_id: String,

    /// Document holding the passage
    pub document_id: DocumentId,

    /// Quoted text, when the provider supplied one
    #[serde(default)]
    pub quote: Option<String>,

    /// Passage location, copied from the retriever
    #[serde(default)]
    pub location: Option<String>,
}

/// Categorical outcome of one criterion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CriterionStatus {
    /// One of the configured status options
    Rated { option: StatusOption },

    /// The criterion does not apply to the documents
    NotApplicable,

    /// The judgment could not be produced; needs human judgment
    UnableToEvaluate,
}

impl CriterionStatus {
    pub fn label(&self) -> &str {
        match self {
            CriterionStatus::Rated { option } => &option.label,
            CriterionStatus::NotApplicable => "Not applicable",
            CriterionStatus::UnableToEvaluate => "Unable to evaluate",
        }
    }

    pub fn option(&self) -> Option<&StatusOption> {
        match self {
            CriterionStatus::Rated { option } => Some(option),
            _ => None,
        }
    }
}

/// Annotation attached to a criterion result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "flag", rename_all = "snake_case")]
pub enum ResultFlag {
    /// A citation pointed at a passage that was not retrieved
    UnresolvedCitation { passage_id: String },

    /// A citation quote was not found in the referenced passage
    QuoteMismatch { passage_id: String },

    /// The judgment provider failed after all attempts
    JudgmentFailed { attempts: u32, reason: String },

    /// The job's wall-clock budget ran out before or during this criterion
    TimeBudgetExhausted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_option_matches_id_or_label() {
        let option = StatusOption::new("partial", "Partially Compliant", "#f59e0b", 50.0, ScoringMode::Graded);
        assert!(option.matches("partial"));
        assert!(option.matches(" partially compliant "));
        assert!(!option.matches("compliant"));
    }

    #[test]
    fn test_criterion_status_serialization() {
        let json = serde_json::to_value(CriterionStatus::UnableToEvaluate).unwrap();
        assert_eq!(json["kind"], "unable_to_evaluate");
        assert_eq!(CriterionStatus::NotApplicable.label(), "Not applicable");
    }

    #[test]
    fn test_ids_are_transparent_in_json() {
        let id = EvaluationId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id));
    }
}
