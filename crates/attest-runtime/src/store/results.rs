use std::collections::HashMap;

use attest_core::{
    effective_view, history, next_edit_version, validate_edit, CriterionItemId, CriterionResult,
    EditRequest, EffectiveResult, EvaluationId, ResultEdit, ResultError, ResultId, ResultVersion,
    StatusScale,
};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::StoreError;

#[derive(Debug, Default)]
struct ResultTables {
    results: HashMap<ResultId, CriterionResult>,
    by_pair: HashMap<(EvaluationId, CriterionItemId), ResultId>,
    by_evaluation: HashMap<EvaluationId, Vec<ResultId>>,
    edits: HashMap<ResultId, Vec<ResultEdit>>,
}

impl ResultTables {
    fn result(&self, id: ResultId) -> Result<&CriterionResult, StoreError> {
        self.results
            .get(&id)
            .ok_or(StoreError::Result(ResultError::NotFound(id)))
    }

    fn edits(&self, id: ResultId) -> &[ResultEdit] {
        self.edits.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    fn for_evaluation(&self, evaluation_id: EvaluationId) -> Vec<&CriterionResult> {
        let mut results: Vec<&CriterionResult> = self
            .by_evaluation
            .get(&evaluation_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.results.get(id))
            .collect();
        results.sort_by_key(|r| r.position);
        results
    }
}

/// Immutable criterion results plus their append-only edit overlay.
///
/// Results are written once per (evaluation, criterion) and never updated.
/// Edits are versioned 1, 2, 3... per result; the version is assigned under
/// the write lock so concurrent editors cannot collide.
#[derive(Debug, Default)]
pub struct ResultStore {
    tables: RwLock<ResultTables>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Persist an AI result. Rejects a second result for the same
    /// (evaluation, criterion) pair.
    pub fn record_result(&self, result: CriterionResult) -> Result<ResultId, StoreError> {
        let mut tables = self.tables.write();
        let pair = (result.evaluation_id, result.criterion_id);
        if tables.by_pair.contains_key(&pair) {
            return Err(ResultError::DuplicateResult {
                evaluation: result.evaluation_id,
                criterion: result.criterion_id,
            }
            .into());
        }

        let id = result.id;
        tables.by_pair.insert(pair, id);
        tables
            .by_evaluation
            .entry(result.evaluation_id)
            .or_default()
            .push(id);
        tables.results.insert(id, result);
        Ok(id)
    }

    /// Validate and append a human edit at the next version.
    pub fn apply_edit(
        &self,
        result_id: ResultId,
        request: EditRequest,
        scale: &StatusScale,
        now: DateTime<Utc>,
    ) -> Result<ResultEdit, StoreError> {
        let mut tables = self.tables.write();
        tables.result(result_id)?;

        let version = next_edit_version(tables.edits(result_id));
        let edit = validate_edit(result_id, version, request, scale, now)?;
        tables.edits.entry(result_id).or_default().push(edit.clone());

        tracing::info!(
            result_id = %result_id,
            version,
            editor = %edit.editor,
            status_changed = edit.status.is_some(),
            "Result edit recorded"
        );
        Ok(edit)
    }

    /// Latest edit folded over the original.
    pub fn get_effective(&self, result_id: ResultId) -> Result<EffectiveResult, StoreError> {
        let tables = self.tables.read();
        let result = tables.result(result_id)?;
        Ok(effective_view(result, tables.edits(result_id)))
    }

    /// Original result followed by every edit, oldest first.
    pub fn get_history(&self, result_id: ResultId) -> Result<Vec<ResultVersion>, StoreError> {
        let tables = self.tables.read();
        let result = tables.result(result_id)?;
        Ok(history(result, tables.edits(result_id)))
    }

    pub fn result(&self, result_id: ResultId) -> Result<CriterionResult, StoreError> {
        self.tables.read().result(result_id).cloned()
    }

    pub fn edits(&self, result_id: ResultId) -> Vec<ResultEdit> {
        self.tables.read().edits(result_id).to_vec()
    }

    /// Original results of an evaluation in criteria-set order.
    pub fn results_for(&self, evaluation_id: EvaluationId) -> Vec<CriterionResult> {
        self.tables
            .read()
            .for_evaluation(evaluation_id)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Effective results of an evaluation in criteria-set order.
    pub fn effective_for(&self, evaluation_id: EvaluationId) -> Vec<EffectiveResult> {
        let tables = self.tables.read();
        tables
            .for_evaluation(evaluation_id)
            .into_iter()
            .map(|result| effective_view(result, tables.edits(result.id)))
            .collect()
    }

    pub fn has_result(&self, evaluation_id: EvaluationId, criterion_id: CriterionItemId) -> bool {
        self.tables
            .read()
            .by_pair
            .contains_key(&(evaluation_id, criterion_id))
    }

    pub fn count_for(&self, evaluation_id: EvaluationId) -> u32 {
        self.tables
            .read()
            .by_evaluation
            .get(&evaluation_id)
            .map_or(0, |ids| ids.len() as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use attest_core::{CriterionStatus, ScoringMode, StatusOption, StatusSelection};
    use serde_json::json;

    fn scale() -> StatusScale {
        StatusScale::new(
            ScoringMode::Numeric,
            vec![
                StatusOption::new("compliant", "Compliant", "green", 80.0, ScoringMode::Numeric),
                StatusOption::new("partial", "Partial", "amber", 50.0, ScoringMode::Numeric),
                StatusOption::new("non_compliant", "Non-Compliant", "red", 0.0, ScoringMode::Numeric),
            ],
        )
        .unwrap()
    }

    fn result(evaluation_id: EvaluationId, position: u32) -> CriterionResult {
        let scale = scale();
        CriterionResult {
            id: ResultId::new(),
            evaluation_id,
            criterion_id: CriterionItemId::new(),
            external_id: format!("S-{}", position + 1),
            position,
            narrative: "Access reviews are documented [doc#1].".to_string(),
            status: CriterionStatus::Rated {
                option: scale.status_for_score(70.0).clone(),
            },
            score: Some(70.0),
            confidence: 0.8,
            citations: Vec::new(),
            flags: Vec::new(),
            payload: json!({"status": "partial"}),
            created_at: Utc::now(),
        }
    }

    fn edit(narrative: Option<&str>, status: Option<&str>) -> EditRequest {
        EditRequest {
            narrative: narrative.map(str::to_string),
            status: status.map(|s| StatusSelection::Option(s.to_string())),
            note: "reviewed".to_string(),
            editor: "auditor@example.com".to_string(),
        }
    }

    #[test]
    fn test_second_result_for_pair_is_rejected() {
        let store = ResultStore::new();
        let first = result(EvaluationId::new(), 0);
        let mut duplicate = first.clone();
        duplicate.id = ResultId::new();

        store.record_result(first.clone()).unwrap();
        let err = store.record_result(duplicate).unwrap_err();

        assert!(matches!(err, StoreError::Result(ResultError::DuplicateResult { .. })));
        assert_eq!(store.count_for(first.evaluation_id), 1);
        assert!(store.has_result(first.evaluation_id, first.criterion_id));
    }

    #[test]
    fn test_edit_round_trip_keeps_original_in_history() {
        let store = ResultStore::new();
        let original = result(EvaluationId::new(), 0);
        let id = store.record_result(original.clone()).unwrap();

        let first = store
            .apply_edit(id, edit(Some("Reviewed by hand."), Some("compliant")), &scale(), Utc::now())
            .unwrap();
        let second = store
            .apply_edit(id, edit(None, Some("Non-Compliant")), &scale(), Utc::now())
            .unwrap();
        assert_eq!((first.version, second.version), (1, 2));

        let effective = store.get_effective(id).unwrap();
        assert_eq!(effective.narrative, "Reviewed by hand.");
        assert_eq!(effective.status.label(), "Non-Compliant");
        assert_eq!(effective.confidence, original.confidence);
        assert_eq!(effective.version, 2);

        let history = store.get_history(id).unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].version, 0);
        assert_eq!(history[0].narrative, original.narrative);
        assert_eq!(store.result(id).unwrap(), original);
    }

    #[test]
    fn test_invalid_edits_are_not_stored() {
        let store = ResultStore::new();
        let id = store.record_result(result(EvaluationId::new(), 0)).unwrap();

        let err = store
            .apply_edit(id, edit(None, Some("excellent")), &scale(), Utc::now())
            .unwrap_err();
        assert_eq!(err, StoreError::Result(ResultError::UnknownStatus("excellent".to_string())));

        let err = store.apply_edit(id, edit(None, None), &scale(), Utc::now()).unwrap_err();
        assert_eq!(err, StoreError::Result(ResultError::EmptyEdit));
        assert!(store.edits(id).is_empty());

        let missing = ResultId::new();
        assert_eq!(
            store.get_effective(missing).unwrap_err(),
            StoreError::Result(ResultError::NotFound(missing))
        );
    }

    #[test]
    fn test_results_are_listed_in_criteria_order() {
        let store = ResultStore::new();
        let evaluation_id = EvaluationId::new();
        for position in [2, 0, 1] {
            store.record_result(result(evaluation_id, position)).unwrap();
        }
        store.record_result(result(EvaluationId::new(), 0)).unwrap();

        let positions: Vec<u32> = store.results_for(evaluation_id).iter().map(|r| r.position).collect();
        assert_eq!(positions, vec![0, 1, 2]);
        assert_eq!(store.effective_for(evaluation_id).len(), 3);
    }
}
