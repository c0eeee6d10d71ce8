//! Evaluation surface: create, poll, read results, edit, history, export.
//!
//! Export rendering is external; [`EvaluationService::export`] only
//! assembles the effective result set as serializable data.

use std::collections::HashMap;
use std::sync::Arc;

use attest_core::{
    aggregate_overall_score, aggregation_score, ConfigSnapshot, CriteriaSetRef, DocTypeId, EditRequest,
    EffectiveResult, Evaluation, EvaluationDocumentLink, EvaluationId, EvaluationStatus, NewEvaluation, OrgId,
    ResultEdit, ResultId, ResultVersion, ScoredCriterion, ScoringMode, StatusOption, StatusScale, WorkspaceId,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::orchestrator::EvaluationOrchestrator;
use crate::RuntimeError;

/// What a polling client sees.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationProgress {
    pub evaluation_id: EvaluationId,
    pub status: EvaluationStatus,
    pub processed: u32,
    pub total: u32,
    /// 0..=100
    pub progress: u8,
    pub error: Option<String>,
    pub overall_score: Option<f64>,
    pub overall_status: Option<StatusOption>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&Evaluation> for EvaluationProgress {
    fn from(evaluation: &Evaluation) -> Self {
        Self {
            evaluation_id: evaluation.id,
            status: evaluation.status,
            processed: evaluation.processed,
            total: evaluation.total,
            progress: evaluation.progress,
            error: evaluation.error.clone(),
            overall_score: evaluation.overall_score,
            overall_status: evaluation.overall_status.clone(),
            started_at: evaluation.started_at,
            completed_at: evaluation.completed_at,
        }
    }
}

/// Structured data handed to an external export renderer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationExport {
    pub evaluation_id: EvaluationId,
    pub org_id: OrgId,
    pub workspace_id: WorkspaceId,
    pub doc_type_id: DocTypeId,
    pub criteria_set: CriteriaSetRef,
    pub criteria_set_name: String,
    pub scoring_mode: ScoringMode,
    pub show_numeric_score: bool,
    pub documents: Vec<EvaluationDocumentLink>,
    pub document_summary: Option<String>,
    pub overall_summary: Option<String>,

    /// Overall outcome as computed from the AI results
    pub ai_overall_score: Option<f64>,
    pub ai_overall_status: Option<StatusOption>,

    /// Overall outcome recomputed from the effective (human-edited) results
    pub effective_overall_score: Option<f64>,
    pub effective_overall_status: Option<StatusOption>,

    pub results: Vec<EffectiveResult>,
    pub completed_at: Option<DateTime<Utc>>,
    pub exported_at: DateTime<Utc>,
}

/// The user-facing evaluation API.
#[derive(Debug, Clone)]
pub struct EvaluationService {
    orchestrator: Arc<EvaluationOrchestrator>,
}

impl EvaluationService {
    pub fn new(orchestrator: Arc<EvaluationOrchestrator>) -> Self {
        Self { orchestrator }
    }

    pub fn orchestrator(&self) -> &Arc<EvaluationOrchestrator> {
        &self.orchestrator
    }

    pub async fn create(&self, request: NewEvaluation) -> Result<Evaluation, RuntimeError> {
        self.orchestrator.create_evaluation(request).await
    }

    pub fn evaluation(&self, id: EvaluationId) -> Result<Evaluation, RuntimeError> {
        Ok(self.orchestrator.evaluations().get(id)?)
    }

    pub fn list(&self, workspace_id: WorkspaceId) -> Vec<Evaluation> {
        self.orchestrator.evaluations().list(workspace_id)
    }

    pub fn poll(&self, id: EvaluationId) -> Result<EvaluationProgress, RuntimeError> {
        Ok(EvaluationProgress::from(&self.evaluation(id)?))
    }

    /// Effective results with citations, in criteria-set order.
    pub fn results(&self, id: EvaluationId) -> Result<Vec<EffectiveResult>, RuntimeError> {
        self.evaluation(id)?;
        Ok(self.orchestrator.results().effective_for(id))
    }

    pub fn result(&self, result_id: ResultId) -> Result<EffectiveResult, RuntimeError> {
        Ok(self.orchestrator.results().get_effective(result_id)?)
    }

    /// Record a reviewer's edit. The status is validated against the
    /// vocabulary the evaluation ran with.
    pub async fn apply_edit(&self, result_id: ResultId, request: EditRequest) -> Result<ResultEdit, RuntimeError> {
        let results = self.orchestrator.results();
        let evaluation = self.evaluation(results.result(result_id)?.evaluation_id)?;
        let scale = self.scale_for(&evaluation).await?;
        Ok(results.apply_edit(result_id, request, &scale, Utc::now())?)
    }

    pub fn history(&self, result_id: ResultId) -> Result<Vec<ResultVersion>, RuntimeError> {
        Ok(self.orchestrator.results().get_history(result_id)?)
    }

    /// Assemble the export payload of a completed evaluation.
    pub async fn export(&self, id: EvaluationId) -> Result<EvaluationExport, RuntimeError> {
        let evaluation = self.evaluation(id)?;
        if evaluation.status != EvaluationStatus::Completed {
            return Err(RuntimeError::Validation(format!(
                "evaluation {} is {}; only completed evaluations can be exported",
                id, evaluation.status
            )));
        }

        let snapshot = self.snapshot_for(&evaluation).await?;
        let scale = StatusScale::new(snapshot.config.scoring_mode, snapshot.status_options.clone())?;
        let set = self
            .orchestrator
            .catalog()
            .read()
            .criteria_set(evaluation.criteria_set)?
            .clone();

        let mut results = self.orchestrator.results().effective_for(id);
        let weights: HashMap<_, _> = set.items.iter().map(|item| (item.id, item.weight)).collect();
        let scored: Vec<ScoredCriterion> = results
            .iter()
            .map(|r| {
                ScoredCriterion::new(
                    aggregation_score(&r.status, r.score, scale.mode()),
                    weights.get(&r.criterion_id).copied().flatten(),
                )
            })
            .collect();
        let mut effective_overall_score = aggregate_overall_score(&scored, set.weighted);
        let effective_overall_status = effective_overall_score.map(|s| scale.status_for_score(s).clone());

        let show_numeric_score = snapshot.config.show_numeric_score;
        let mut ai_overall_score = evaluation.overall_score;
        if !show_numeric_score {
            ai_overall_score = None;
            effective_overall_score = None;
            for result in &mut results {
                result.score = None;
            }
        }

        tracing::info!(evaluation_id = %id, results = results.len(), "Evaluation exported");
        Ok(EvaluationExport {
            evaluation_id: evaluation.id,
            org_id: evaluation.org_id,
            workspace_id: evaluation.workspace_id,
            doc_type_id: evaluation.doc_type_id,
            criteria_set: evaluation.criteria_set,
            criteria_set_name: set.name,
            scoring_mode: scale.mode(),
            show_numeric_score,
            documents: evaluation.documents,
            document_summary: evaluation.document_summary,
            overall_summary: evaluation.overall_summary,
            ai_overall_score,
            ai_overall_status: evaluation.overall_status,
            effective_overall_score,
            effective_overall_status,
            results,
            completed_at: evaluation.completed_at,
            exported_at: Utc::now(),
        })
    }

    /// Administrative force-fail of a running evaluation.
    pub fn force_fail(&self, id: EvaluationId, reason: &str) -> Result<Evaluation, RuntimeError> {
        self.orchestrator.force_fail(id, reason)
    }

    /// Administrative reset of a running evaluation to `pending`, and
    /// re-enqueue.
    pub async fn reset(&self, id: EvaluationId) -> Result<Evaluation, RuntimeError> {
        self.orchestrator.reset(id).await
    }

    /// The snapshot the evaluation ran with, or the organization's current
    /// configuration if it never started.
    async fn snapshot_for(&self, evaluation: &Evaluation) -> Result<ConfigSnapshot, RuntimeError> {
        match &evaluation.config {
            Some(snapshot) => Ok(snapshot.clone()),
            None => Ok(self
                .orchestrator
                .configs()
                .effective_config(evaluation.org_id)
                .await?),
        }
    }

    async fn scale_for(&self, evaluation: &Evaluation) -> Result<StatusScale, RuntimeError> {
        let snapshot = self.snapshot_for(evaluation).await?;
        Ok(StatusScale::new(snapshot.config.scoring_mode, snapshot.status_options)?)
    }
}
