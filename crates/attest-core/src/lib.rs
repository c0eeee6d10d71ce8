//! # attest-core
//!
//! Deterministic domain logic for the Attest document evaluation pipeline.
//!
//! This crate answers, without any I/O:
//! - Which configuration is in force for an organization?
//! - Which criteria does a document type get evaluated against?
//! - What status does a score map to, and what is the overall score?
//! - Is an evaluation allowed to move to the next state?
//! - What does a reviewer currently see for a criterion result?
//!
//! ## Key Guarantees
//!
//! 1. **Pure**: resolution, scoring and projection functions never mutate
//!    their inputs
//! 2. **Auditable**: AI results are immutable; human edits are an ordered
//!    overlay
//! 3. **Never empty**: every validated status scale holds a threshold-0
//!    option, so score lookup cannot fail
//!
//! ## Example
//!
//! ```rust,ignore
//! use attest_core::{ConfigResolver, PlatformConfig, StatusScale};
//!
//! let platform = PlatformConfig::from_yaml_file("platform.yaml")?;
//! let snapshot = ConfigResolver::new(&platform, None).snapshot(org_id, Utc::now())?;
//! let scale = StatusScale::new(snapshot.config.scoring_mode, snapshot.status_options)?;
//! println!("{}", scale.status_for_score(66.7).label);
//! ```

pub mod catalog;
pub mod config;
pub mod evaluation;
pub mod judgment;
pub mod results;
pub mod scoring;
pub mod types;

// Re-export main types at crate root
pub use catalog::{
    CatalogError, CatalogWarning, CriteriaCatalog, CriteriaSet, CriteriaSetRef, CriteriaSetWrite,
    CriterionItem, DocType, ImportError, ImportProvenance, NewCriteriaSet, NewCriterionItem,
};
pub use config::{
    resolve_config, resolve_status_options, ConfigError, ConfigResolver, ConfigSnapshot,
    EffectiveConfig, JudgmentOverride, JudgmentSettings, OrgConfig, PlatformConfig, SettingSource,
};
pub use evaluation::{
    progress_percent, Evaluation, EvaluationDocumentLink, EvaluationStatus, NewEvaluation,
    OverallOutcome, TransitionError,
};
pub use judgment::{
    CitationClaim, JudgmentError, JudgmentPayload, JudgmentValidator, ResponseSchema, SchemaError,
    ValidatedJudgment,
};
pub use results::{
    aggregation_score, effective_view, history, next_edit_version, validate_edit, CriterionResult,
    EditRequest, EffectiveResult, ResultEdit, ResultError, ResultVersion, StatusSelection,
};
pub use scoring::{
    aggregate_overall_score, status_for_score, validate_status_options, ScoredCriterion,
    ScoringError, StatusScale,
};
pub use types::{
    Citation, CriteriaSetId, CriterionItemId, CriterionStatus, DocTypeId, DocumentId, EvaluationId,
    OrgId, Passage, ResultFlag, ResultId, ScoringMode, StatusOption, WorkspaceId,
};

use thiserror::Error;

/// Any error raised by the core crate.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Scoring error: {0}")]
    Scoring(#[from] ScoringError),

    #[error("Transition error: {0}")]
    Transition(#[from] TransitionError),

    #[error("Judgment error: {0}")]
    Judgment(#[from] JudgmentError),

    #[error("Result error: {0}")]
    Result(#[from] ResultError),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    const PLATFORM_YAML: &str = r#"
scoring_mode: numeric
show_numeric_score: true
judgment:
  provider: anthropic
  model: claude-sonnet-4-5
status_options:
  - { id: compliant, label: Compliant, color: green, min_score: 80, mode: numeric }
  - { id: partial, label: Partial, color: amber, min_score: 50, mode: numeric }
  - { id: non_compliant, label: Non-Compliant, color: red, min_score: 0, mode: numeric }
"#;

    #[test]
    fn test_unweighted_security_policy_scenario() {
        let platform = PlatformConfig::from_yaml(PLATFORM_YAML).unwrap();
        let org_id = OrgId::new();
        let snapshot = ConfigResolver::new(&platform, None)
            .snapshot(org_id, Utc::now())
            .unwrap();
        let scale = StatusScale::new(snapshot.config.scoring_mode, snapshot.status_options).unwrap();

        let mut catalog = CriteriaCatalog::new();
        let doc_type = catalog
            .create_doc_type(org_id, "Security Policy", None, Utc::now())
            .unwrap();
        let write = catalog
            .create_criteria_set(
                NewCriteriaSet {
                    doc_type_id: doc_type.id,
                    name: "Baseline".to_string(),
                    weighted: false,
                    items: vec![
                        NewCriterionItem::new("S-1", "Access is reviewed"),
                        NewCriterionItem::new("S-2", "Data is encrypted"),
                        NewCriterionItem::new("S-3", "Incidents are reported"),
                    ],
                },
                Utc::now(),
            )
            .unwrap();

        let scored: Vec<ScoredCriterion> = write
            .set
            .items
            .iter()
            .zip([90.0, 70.0, 40.0])
            .map(|(item, score)| ScoredCriterion::new(Some(score), item.weight))
            .collect();
        let overall = aggregate_overall_score(&scored, write.set.weighted).unwrap();
        assert!((overall - 66.7).abs() < 0.05);
        assert_eq!(scale.status_for_score(overall).label, "Partial");
    }

    #[test]
    fn test_core_error_conversion() {
        let err: CoreError = ConfigError::missing("judgment").into();
        assert!(err.to_string().contains("judgment"));
    }
}
