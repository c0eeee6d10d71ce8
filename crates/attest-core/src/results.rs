//! Immutable criterion results with an append-only edit overlay.
//!
//! A [`CriterionResult`] is the base fact written once by the pipeline.
//! Human corrections are [`ResultEdit`]s, versioned 1, 2, 3... per result.
//! What a reviewer sees is the projection [`effective_view`]; what an
//! auditor sees is [`history`]. Neither function mutates anything.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::catalog::CriterionItem;
use crate::scoring::StatusScale;
use crate::types::{
    Citation, CriterionItemId, CriterionStatus, EvaluationId, ResultFlag, ResultId, ScoringMode,
};

/// Errors from result recording and editing.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResultError {
    #[error("Result already recorded for criterion {criterion} in evaluation {evaluation}")]
    DuplicateResult {
        evaluation: EvaluationId,
        criterion: CriterionItemId,
    },

    #[error("Result not found: {0}")]
    NotFound(ResultId),

    #[error("Edit must change the narrative or the status")]
    EmptyEdit,

    #[error("Edit must name an editor")]
    MissingEditor,

    #[error("Unknown status option: {0}")]
    UnknownStatus(String),
}

/// The AI-produced outcome for one (evaluation, criterion) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionResult {
    pub id: ResultId,
    pub evaluation_id: EvaluationId,
    pub criterion_id: CriterionItemId,

    /// Stable external identifier of the criterion (e.g., "AC-1")
    pub external_id: String,

    /// Index of the criterion in its set
    pub position: u32,

    pub narrative: String,
    pub status: CriterionStatus,

    /// 0..=100; `None` when not applicable or not evaluated
    pub score: Option<f64>,

    /// 0.0..=1.0
    pub confidence: f64,

    pub citations: Vec<Citation>,
    pub flags: Vec<ResultFlag>,

    /// Raw validated judgment payload, kept for audit
    pub payload: JsonValue,

    pub created_at: DateTime<Utc>,
}

impl CriterionResult {
    /// A result that needs human judgment: status "unable to evaluate",
    /// zero confidence, and a narrative explaining why.
    pub fn degraded(
        evaluation_id: EvaluationId,
        criterion: &CriterionItem,
        position: u32,
        narrative: impl Into<String>,
        flag: ResultFlag,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ResultId::new(),
            evaluation_id,
            criterion_id: criterion.id,
            external_id: criterion.external_id.clone(),
            position,
            narrative: narrative.into(),
            status: CriterionStatus::UnableToEvaluate,
            score: None,
            confidence: 0.0,
            citations: Vec::new(),
            flags: vec![flag],
            payload: JsonValue::Null,
            created_at: now,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self.status, CriterionStatus::UnableToEvaluate)
    }
}

/// A versioned human correction. Only narrative and status are editable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEdit {
    pub result_id: ResultId,

    /// Strictly increasing per result, starting at 1
    pub version: u32,

    pub narrative: Option<String>,
    pub status: Option<CriterionStatus>,
    pub note: String,
    pub editor: String,
    pub created_at: DateTime<Utc>,
}

/// Status chosen by a reviewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum StatusSelection {
    /// Status option id or label
    Option(String),
    NotApplicable,
}

/// A reviewer's edit request, before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditRequest {
    #[serde(default)]
    pub narrative: Option<String>,
    #[serde(default)]
    pub status: Option<StatusSelection>,
    #[serde(default)]
    pub note: String,
    pub editor: String,
}

/// Validate an edit request against the status vocabulary in force for the
/// evaluation and turn it into an edit at `version`.
pub fn validate_edit(
    result_id: ResultId,
    version: u32,
    request: EditRequest,
    scale: &StatusScale,
    now: DateTime<Utc>,
) -> Result<ResultEdit, ResultError> {
    let narrative = request
        .narrative
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty());
    if narrative.is_none() && request.status.is_none() {
        return Err(ResultError::EmptyEdit);
    }
    let editor = request.editor.trim();
    if editor.is_empty() {
        return Err(ResultError::MissingEditor);
    }

    let status = match request.status {
        None => None,
        Some(StatusSelection::NotApplicable) => Some(CriterionStatus::NotApplicable),
        Some(StatusSelection::Option(selection)) => {
            let option = scale
                .find(&selection)
                .ok_or(ResultError::UnknownStatus(selection))?;
            Some(CriterionStatus::Rated {
                option: option.clone(),
            })
        }
    };

    Ok(ResultEdit {
        result_id,
        version,
        narrative,
        status,
        note: request.note.trim().to_string(),
        editor: editor.to_string(),
        created_at: now,
    })
}

/// `max(existing versions) + 1`, starting at 1.
pub fn next_edit_version(edits: &[ResultEdit]) -> u32 {
    edits.iter().map(|e| e.version).max().unwrap_or(0) + 1
}

/// The current view of a result: edits folded over the original.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectiveResult {
    pub result_id: ResultId,
    pub evaluation_id: EvaluationId,
    pub criterion_id: CriterionItemId,
    pub external_id: String,
    pub position: u32,
    pub narrative: String,
    pub status: CriterionStatus,
    pub score: Option<f64>,

    /// Always the AI's value
    pub confidence: f64,

    /// Always the AI's citations
    pub citations: Vec<Citation>,
    pub flags: Vec<ResultFlag>,

    /// 0 when unedited
    pub version: u32,
    pub edit_count: usize,
    pub edited_by: Option<String>,
    pub edited_at: Option<DateTime<Utc>>,
}

impl EffectiveResult {
    pub fn is_edited(&self) -> bool {
        self.version > 0
    }
}

/// One entry of the audit history. Version 0 is the original.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultVersion {
    pub version: u32,
    pub narrative: String,
    pub status: CriterionStatus,
    pub score: Option<f64>,
    pub note: Option<String>,
    pub editor: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// Fold edits over the original. Edits for other results are ignored;
/// order of `edits` does not matter.
pub fn effective_view(result: &CriterionResult, edits: &[ResultEdit]) -> EffectiveResult {
    let mut view = EffectiveResult {
        result_id: result.id,
        evaluation_id: result.evaluation_id,
        criterion_id: result.criterion_id,
        external_id: result.external_id.clone(),
        position: result.position,
        narrative: result.narrative.clone(),
        status: result.status.clone(),
        score: result.score,
        confidence: result.confidence,
        citations: result.citations.clone(),
        flags: result.flags.clone(),
        version: 0,
        edit_count: 0,
        edited_by: None,
        edited_at: None,
    };

    for edit in ordered_edits(result.id, edits) {
        if let Some(narrative) = &edit.narrative {
            view.narrative = narrative.clone();
        }
        if let Some(status) = &edit.status {
            view.score = score_for_edited_status(result, status);
            view.status = status.clone();
        }
        view.version = edit.version;
        view.edit_count += 1;
        view.edited_by = Some(edit.editor.clone());
        view.edited_at = Some(edit.created_at);
    }
    view
}

/// Full snapshots, original first, then one per edit in version order.
pub fn history(result: &CriterionResult, edits: &[ResultEdit]) -> Vec<ResultVersion> {
    let mut versions = vec![ResultVersion {
        version: 0,
        narrative: result.narrative.clone(),
        status: result.status.clone(),
        score: result.score,
        note: None,
        editor: None,
        recorded_at: result.created_at,
    }];

    let mut narrative = result.narrative.clone();
    let mut status = result.status.clone();
    let mut score = result.score;
    for edit in ordered_edits(result.id, edits) {
        if let Some(n) = &edit.narrative {
            narrative = n.clone();
        }
        if let Some(s) = &edit.status {
            score = score_for_edited_status(result, s);
            status = s.clone();
        }
        versions.push(ResultVersion {
            version: edit.version,
            narrative: narrative.clone(),
            status: status.clone(),
            score,
            note: Some(edit.note.clone()).filter(|n| !n.is_empty()),
            editor: Some(edit.editor.clone()),
            recorded_at: edit.created_at,
        });
    }
    versions
}

fn ordered_edits(result_id: ResultId, edits: &[ResultEdit]) -> Vec<&ResultEdit> {
    let mut ordered: Vec<&ResultEdit> = edits.iter().filter(|e| e.result_id == result_id).collect();
    ordered.sort_by_key(|e| e.version);
    ordered
}

/// A re-selected original option keeps the AI score; any other option
/// scores at its threshold.
fn score_for_edited_status(result: &CriterionResult, status: &CriterionStatus) -> Option<f64> {
    match (status, result.status.option()) {
        (CriterionStatus::Rated { option }, Some(original)) if original.id == option.id => result.score,
        (CriterionStatus::Rated { option }, _) => Some(option.min_score),
        _ => None,
    }
}

/// Score to aggregate for a result, `None` when the result is excluded.
pub fn aggregation_score(status: &CriterionStatus, score: Option<f64>, mode: ScoringMode) -> Option<f64> {
    match status {
        CriterionStatus::Rated { option } => match mode {
            ScoringMode::Numeric => score.or(Some(option.min_score)),
            ScoringMode::Boolean | ScoringMode::Graded => Some(option.min_score),
        },
        CriterionStatus::NotApplicable | CriterionStatus::UnableToEvaluate => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StatusOption;

    fn scale() -> StatusScale {
        StatusScale::new(
            ScoringMode::Graded,
            vec![
                StatusOption::new("compliant", "Compliant", "green", 80.0, ScoringMode::Graded),
                StatusOption::new("partial", "Partial", "amber", 50.0, ScoringMode::Graded),
                StatusOption::new("non", "Non-Compliant", "red", 0.0, ScoringMode::Graded),
            ],
        )
        .unwrap()
    }

    fn original() -> CriterionResult {
        let option = scale().find("partial").unwrap().clone();
        CriterionResult {
            id: ResultId::new(),
            evaluation_id: EvaluationId::new(),
            criterion_id: CriterionItemId::new(),
            external_id: "AC-1".to_string(),
            position: 0,
            narrative: "Policy partially covers access reviews.".to_string(),
            status: CriterionStatus::Rated { option },
            score: Some(50.0),
            confidence: 0.7,
            citations: vec![],
            flags: vec![],
            payload: JsonValue::Null,
            created_at: Utc::now(),
        }
    }

    fn request(narrative: Option<&str>, status: Option<StatusSelection>) -> EditRequest {
        EditRequest {
            narrative: narrative.map(str::to_string),
            status,
            note: "reviewed".to_string(),
            editor: "alice@example.com".to_string(),
        }
    }

    #[test]
    fn test_unedited_view_is_original() {
        let result = original();
        let view = effective_view(&result, &[]);
        assert_eq!(view.narrative, result.narrative);
        assert_eq!(view.version, 0);
        assert!(!view.is_edited());
    }

    #[test]
    fn test_edit_then_effective_and_history() {
        let result = original();
        let edit = validate_edit(
            result.id,
            next_edit_version(&[]),
            request(Some("Fully covered in section 4."), Some(StatusSelection::Option("Compliant".into()))),
            &scale(),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(edit.version, 1);

        let edits = vec![edit];
        let view = effective_view(&result, &edits);
        assert_eq!(view.narrative, "Fully covered in section 4.");
        assert_eq!(view.status.label(), "Compliant");
        assert_eq!(view.score, Some(80.0));
        assert_eq!(view.confidence, 0.7);
        assert_eq!(view.edited_by.as_deref(), Some("alice@example.com"));

        let versions = history(&result, &edits);
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].narrative, result.narrative);
        assert_eq!(versions[0].status, result.status);
        assert_eq!(versions[1].version, 1);
    }

    #[test]
    fn test_later_edits_win_and_partial_edits_inherit() {
        let result = original();
        let first = validate_edit(
            result.id,
            1,
            request(Some("First pass."), Some(StatusSelection::NotApplicable)),
            &scale(),
            Utc::now(),
        )
        .unwrap();
        let second = validate_edit(result.id, 2, request(Some("Second pass."), None), &scale(), Utc::now()).unwrap();

        // Out-of-order storage still folds by version
        let edits = vec![second, first];
        assert_eq!(next_edit_version(&edits), 3);

        let view = effective_view(&result, &edits);
        assert_eq!(view.narrative, "Second pass.");
        assert_eq!(view.status, CriterionStatus::NotApplicable);
        assert_eq!(view.score, None);
        assert_eq!(view.version, 2);
        assert_eq!(view.edit_count, 2);

        let versions = history(&result, &edits);
        assert_eq!(versions.iter().map(|v| v.version).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(versions[1].narrative, "First pass.");
        assert_eq!(versions[2].status, CriterionStatus::NotApplicable);
    }

    #[test]
    fn test_reselecting_original_status_keeps_score() {
        let mut result = original();
        result.score = Some(64.0);
        let edit = validate_edit(
            result.id,
            1,
            request(None, Some(StatusSelection::Option("partial".into()))),
            &scale(),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(effective_view(&result, &[edit]).score, Some(64.0));
    }

    #[test]
    fn test_edit_validation() {
        let id = ResultId::new();
        assert_eq!(
            validate_edit(id, 1, request(Some("  "), None), &scale(), Utc::now()),
            Err(ResultError::EmptyEdit)
        );

        let mut anonymous = request(Some("text"), None);
        anonymous.editor = " ".to_string();
        assert_eq!(
            validate_edit(id, 1, anonymous, &scale(), Utc::now()),
            Err(ResultError::MissingEditor)
        );

        assert_eq!(
            validate_edit(id, 1, request(None, Some(StatusSelection::Option("excellent".into()))), &scale(), Utc::now()),
            Err(ResultError::UnknownStatus("excellent".to_string()))
        );
    }

    #[test]
    fn test_degraded_result() {
        let item = CriterionItem {
            id: CriterionItemId::new(),
            external_id: "IR-2".to_string(),
            requirement: "Incidents are reported within 24h".to_string(),
            description: None,
            category: None,
            weight: None,
        };
        let result = CriterionResult::degraded(
            EvaluationId::new(),
            &item,
            3,
            "Judgment provider timed out",
            ResultFlag::JudgmentFailed {
                attempts: 2,
                reason: "timeout".to_string(),
            },
            Utc::now(),
        );
        assert!(result.is_degraded());
        assert_eq!(result.confidence, 0.0);
        assert_eq!(aggregation_score(&result.status, result.score, ScoringMode::Numeric), None);
    }

    #[test]
    fn test_aggregation_score_by_mode() {
        let option = StatusOption::new("met", "Met", "green", 100.0, ScoringMode::Boolean);
        let rated = CriterionStatus::Rated { option };
        assert_eq!(aggregation_score(&rated, None, ScoringMode::Boolean), Some(100.0));
        assert_eq!(aggregation_score(&rated, Some(73.0), ScoringMode::Numeric), Some(73.0));
        assert_eq!(aggregation_score(&CriterionStatus::NotApplicable, Some(10.0), ScoringMode::Numeric), None);
    }
}
