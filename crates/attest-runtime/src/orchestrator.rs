//! Evaluation orchestrator.
//!
//! Owns the job lifecycle: creation and enqueue, then, per delivered job,
//! the three stages inside `running`:
//!
//! 1. Per-document summaries and a combined summary (progress 0-10%)
//! 2. One [`CriterionEvaluator`] call per criterion item, in set order
//!    (progress 10-90%)
//! 3. Overall score and narrative, then `completed` (100%)
//!
//! Progress lives on the [`Evaluation`] record, so a job picked up again
//! after a crash or redelivery resumes from the first criterion without a
//! result. Only job-level problems (configuration, unreadable documents)
//! fail the evaluation; a bad criterion becomes a degraded result.

use std::collections::HashMap;
use std::sync::Arc;

use attest_core::evaluation::SUMMARY_STAGE_PERCENT;
use attest_core::{
    aggregate_overall_score, aggregation_score, CatalogError, CriteriaSet, CriterionResult, CriterionStatus,
    DocumentId, Evaluation, EvaluationId, EvaluationStatus, NewEvaluation, OverallOutcome, ResultError,
    ScoredCriterion, ScoringMode, StatusOption, TransitionError,
};
use chrono::Utc;
use futures::future::join_all;

use crate::admin::{ConfigStore, SharedCatalog};
use crate::config::RuntimeConfig;
use crate::evaluator::{CriterionEvaluator, JudgmentContext};
use crate::prompts::{
    combined_summary_prompt, document_summary_prompt, overall_summary_prompt, ResultLine,
    SUMMARY_SYSTEM_PROMPT,
};
use crate::providers::{ChatMessage, ProviderRegistry};
use crate::queue::{InMemoryJobQueue, JobMessage, JobQueue};
use crate::resilience::{CircuitBreaker, JobBudget, LlmUsage};
use crate::retriever::{ContentRetriever, RetrieverError};
use crate::store::{EvaluationStore, ResultStore, StoreError};
use crate::RuntimeError;

/// What happened to one delivered job.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    /// Every criterion has a result and the evaluation completed
    Completed {
        overall_score: Option<f64>,
        usage: LlmUsage,
    },

    /// A job-level failure moved the evaluation to `failed`
    Failed { reason: String },

    /// The evaluation was already terminal; nothing was done
    Skipped { status: EvaluationStatus },

    /// An administrative operation changed the evaluation mid-run
    Interrupted { status: EvaluationStatus },

    /// The message names an evaluation that does not exist
    Missing,
}

/// Drives evaluations from creation to a terminal state.
pub struct EvaluationOrchestrator {
    catalog: SharedCatalog,
    configs: Arc<ConfigStore>,
    evaluations: Arc<EvaluationStore>,
    results: Arc<ResultStore>,
    queue: Arc<dyn JobQueue>,
    providers: Arc<ProviderRegistry>,
    circuit_breaker: Arc<CircuitBreaker>,
    evaluator: CriterionEvaluator,
    config: RuntimeConfig,
}

impl EvaluationOrchestrator {
    pub fn builder() -> EvaluationOrchestratorBuilder {
        EvaluationOrchestratorBuilder::new()
    }

    pub fn catalog(&self) -> &SharedCatalog {
        &self.catalog
    }

    pub fn configs(&self) -> &Arc<ConfigStore> {
        &self.configs
    }

    pub fn evaluations(&self) -> &Arc<EvaluationStore> {
        &self.evaluations
    }

    pub fn results(&self) -> &Arc<ResultStore> {
        &self.results
    }

    pub fn queue(&self) -> &Arc<dyn JobQueue> {
        &self.queue
    }

    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.circuit_breaker
    }

    pub fn runtime_config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Validate a submission, lock the criteria version it binds and
    /// enqueue the job.
    ///
    /// Rejected with a conflict while a pending or running evaluation
    /// exists for the same workspace, documents and criteria version.
    pub async fn create_evaluation(&self, request: NewEvaluation) -> Result<Evaluation, RuntimeError> {
        let mut seen = std::collections::HashSet::new();
        if let Some(duplicate) = request.documents.iter().find(|d| !seen.insert(**d)) {
            return Err(RuntimeError::Validation(format!(
                "document {} is listed more than once",
                duplicate
            )));
        }

        let evaluation = {
            let mut catalog = self.catalog.write();
            let doc_type = catalog.doc_type(request.doc_type_id)?;
            if doc_type.org_id != request.org_id {
                return Err(CatalogError::DocTypeNotFound(request.doc_type_id).into());
            }
            if !doc_type.active {
                return Err(CatalogError::DocTypeInactive(doc_type.id).into());
            }

            let set = catalog.criteria_set(request.criteria_set)?;
            if set.doc_type_id != request.doc_type_id {
                return Err(RuntimeError::Validation(format!(
                    "criteria set {} does not belong to document type {}",
                    set.id, request.doc_type_id
                )));
            }

            let evaluation = Evaluation::new(request, set.items.len() as u32, Utc::now())?;
            self.evaluations.insert_unless_active(evaluation.clone())?;
            catalog.lock_version(evaluation.criteria_set)?;
            evaluation
        };

        if let Err(err) = self.queue.enqueue(job_message(&evaluation)).await {
            self.evaluations.remove(evaluation.id);
            tracing::error!(evaluation_id = %evaluation.id, error = %err, "Failed to enqueue evaluation");
            return Err(err.into());
        }

        tracing::info!(
            evaluation_id = %evaluation.id,
            workspace_id = %evaluation.workspace_id,
            criteria_set = %evaluation.criteria_set.id,
            version = evaluation.criteria_set.version,
            documents = evaluation.documents.len(),
            total = evaluation.total,
            "Evaluation created"
        );
        Ok(evaluation)
    }

    /// Administrative force-fail of a running evaluation. The worker
    /// processing it stops at its next progress update.
    pub fn force_fail(&self, id: EvaluationId, reason: &str) -> Result<Evaluation, RuntimeError> {
        let evaluation = self.evaluations.update(id, |e| {
            e.fail(format!("Force-failed by administrator: {}", reason), Utc::now())?;
            Ok(e.clone())
        })?;
        tracing::warn!(evaluation_id = %id, reason, "Evaluation force-failed");
        Ok(evaluation)
    }

    /// Administrative reset of a running evaluation back to `pending`, and
    /// re-enqueue. Recorded results are kept and not re-evaluated;
    /// configuration is snapshotted again when it restarts. When the job
    /// cannot be enqueued the record is put back the way it was.
    pub async fn reset(&self, id: EvaluationId) -> Result<Evaluation, RuntimeError> {
        let (previous, evaluation) = self.evaluations.update(id, |e| {
            let previous = e.clone();
            e.reset()?;
            Ok((previous, e.clone()))
        })?;

        if let Err(err) = self.queue.enqueue(job_message(&evaluation)).await {
            let restored = self.evaluations.update(id, |e| {
                if e.status == EvaluationStatus::Pending {
                    *e = previous;
                }
                Ok(e.status)
            });
            tracing::error!(
                evaluation_id = %id,
                error = %err,
                restored = ?restored,
                "Failed to re-enqueue reset evaluation"
            );
            return Err(err.into());
        }

        tracing::warn!(
            evaluation_id = %id,
            processed = evaluation.processed,
            total = evaluation.total,
            "Evaluation reset and re-enqueued"
        );
        Ok(evaluation)
    }

    /// Process one delivered job. Never returns an error: every outcome is
    /// recorded on the evaluation, and the caller acks the message.
    pub async fn process(&self, message: &JobMessage) -> ProcessOutcome {
        let id = message.evaluation_id;
        let evaluation = match self.evaluations.get(id) {
            Ok(evaluation) => evaluation,
            Err(_) => {
                tracing::warn!(evaluation_id = %id, "Job references an unknown evaluation");
                return ProcessOutcome::Missing;
            }
        };

        if evaluation.status.is_terminal() {
            tracing::info!(evaluation_id = %id, status = %evaluation.status, "Evaluation already terminal, skipping");
            return ProcessOutcome::Skipped {
                status: evaluation.status,
            };
        }

        let evaluation = if evaluation.status == EvaluationStatus::Pending {
            match self.evaluations.update(id, |e| {
                e.start(Utc::now())?;
                Ok(e.clone())
            }) {
                Ok(evaluation) => {
                    tracing::info!(evaluation_id = %id, "Evaluation started");
                    evaluation
                }
                Err(err) => return self.interrupted(id, err),
            }
        } else {
            tracing::info!(
                evaluation_id = %id,
                processed = evaluation.processed,
                total = evaluation.total,
                "Resuming running evaluation"
            );
            evaluation
        };

        self.run(evaluation).await
    }

    async fn run(&self, evaluation: Evaluation) -> ProcessOutcome {
        let id = evaluation.id;
        let budget = JobBudget::new(self.config.job_budget);

        let snapshot = match evaluation.config.clone() {
            Some(snapshot) => snapshot,
            None => {
                let snapshot = match self.configs.snapshot(evaluation.org_id) {
                    Ok(snapshot) => snapshot,
                    Err(err) => {
                        return self.fail_job(id, format!("Configuration could not be resolved: {}", err));
                    }
                };
                if let Err(err) = self.evaluations.update(id, |e| e.attach_config(snapshot.clone())) {
                    return self.interrupted(id, err);
                }
                snapshot
            }
        };

        let set = match self.catalog.read().criteria_set(evaluation.criteria_set) {
            Ok(set) => set.clone(),
            Err(err) => return self.fail_job(id, format!("Criteria set unavailable: {}", err)),
        };

        let ctx = match JudgmentContext::prepare(
            id,
            evaluation.document_ids(),
            &snapshot,
            &self.providers,
            self.evaluator.provider_timeout(),
        ) {
            Ok(ctx) => ctx,
            Err(err) => return self.fail_job(id, format!("Judgment provider unavailable: {}", err)),
        };

        // Stage 1: document summaries.
        if evaluation.progress < SUMMARY_STAGE_PERCENT {
            let (summaries, combined) = match self.summarize_documents(&ctx, &budget).await {
                Ok(summaries) => summaries,
                Err(err) => {
                    return self.fail_job(id, format!("None of the bound documents could be retrieved: {}", err));
                }
            };
            if let Err(err) = self
                .evaluations
                .update(id, |e| e.record_document_summaries(summaries, combined))
            {
                return self.interrupted(id, err);
            }
        }

        let recorded = self.results.count_for(id);
        match self.evaluations.update(id, |e| e.reconcile_processed(recorded)) {
            Ok(progress) => tracing::debug!(evaluation_id = %id, recorded, progress, "Progress reconciled"),
            Err(err) => return self.interrupted(id, err),
        }

        // Stage 2: criteria, in set order.
        for (position, item) in set.items.iter().enumerate() {
            if self.results.has_result(id, item.id) {
                continue;
            }

            let result = self.evaluator.evaluate(&ctx, item, position as u32, &budget).await;
            let degraded = result.is_degraded();

            // A force-fail or reset while the criterion was in flight drops
            // the late result.
            match self.evaluations.get(id) {
                Ok(current) if current.status == EvaluationStatus::Running => {}
                Ok(current) => {
                    tracing::warn!(
                        evaluation_id = %id,
                        criterion = %item.external_id,
                        status = %current.status,
                        "Evaluation left running while criterion was in flight, dropping result"
                    );
                    return ProcessOutcome::Interrupted { status: current.status };
                }
                Err(_) => return ProcessOutcome::Missing,
            }

            match self.results.record_result(result) {
                Ok(_) => {}
                Err(StoreError::Result(ResultError::DuplicateResult { .. })) => {
                    tracing::debug!(evaluation_id = %id, criterion = %item.external_id, "Result already recorded");
                    continue;
                }
                Err(err) => return self.fail_job(id, format!("Result could not be stored: {}", err)),
            }

            match self.evaluations.update(id, |e| e.record_criterion_processed()) {
                Ok(progress) => tracing::debug!(
                    evaluation_id = %id,
                    criterion = %item.external_id,
                    degraded,
                    progress,
                    "Criterion processed"
                ),
                Err(err) => return self.interrupted(id, err),
            }
        }

        // Stage 3: overall score and narrative.
        let results = self.results.results_for(id);
        let overall_score = overall_score(&set, &results, ctx.scale().mode());
        let overall_status = overall_score.map(|score| ctx.scale().status_for_score(score).clone());
        let summary = self
            .overall_summary(&ctx, &set, overall_score, overall_status.as_ref(), &results, &budget)
            .await;

        let outcome = OverallOutcome {
            score: overall_score,
            status: overall_status,
            summary: Some(summary),
        };
        if let Err(err) = self.evaluations.update(id, |e| e.complete(outcome, Utc::now())) {
            return self.interrupted(id, err);
        }

        let usage = ctx.usage.snapshot();
        let degraded = results.iter().filter(|r| r.is_degraded()).count();
        tracing::info!(
            evaluation_id = %id,
            overall_score = ?overall_score,
            results = results.len(),
            degraded,
            llm_calls = usage.llm_calls,
            total_tokens = usage.total_tokens,
            estimated_cost = usage.estimated_cost,
            "Evaluation completed"
        );
        ProcessOutcome::Completed { overall_score, usage }
    }

    async fn summarize_documents(
        &self,
        ctx: &JudgmentContext,
        budget: &JobBudget,
    ) -> Result<(Vec<Option<String>>, Option<String>), RetrieverError> {
        // Documents are summarized concurrently; output keeps request order.
        let fetched = join_all(ctx.documents.iter().enumerate().map(|(position, document_id)| async move {
            let passages = match self.evaluator.document_passages(ctx.evaluation_id, *document_id).await {
                Ok(passages) => passages,
                Err(err) => {
                    tracing::warn!(
                        evaluation_id = %ctx.evaluation_id,
                        document = %document_id,
                        error = %err,
                        "Document could not be retrieved, no summary"
                    );
                    return Err(err);
                }
            };
            if passages.is_empty() || budget.is_exhausted() {
                return Ok(None);
            }
            Ok(self
                .summarize(ctx, document_summary_prompt(position, &passages), Some(*document_id))
                .await)
        }))
        .await;

        if !fetched.iter().any(Result::is_ok) {
            if let Some(Err(err)) = fetched.into_iter().next() {
                return Err(err);
            }
            return Ok((Vec::new(), None));
        }
        let summaries: Vec<Option<String>> = fetched.into_iter().map(|f| f.ok().flatten()).collect();

        let available: Vec<String> = summaries.iter().flatten().cloned().collect();
        let combined = match available.as_slice() {
            [] => None,
            [only] => Some(only.clone()),
            many => {
                let combined = if budget.is_exhausted() {
                    None
                } else {
                    self.summarize(ctx, combined_summary_prompt(many), None).await
                };
                combined.or_else(|| Some(many.join("\n\n")))
            }
        };
        Ok((summaries, combined))
    }

    /// A summary call. Failures are logged and yield no summary.
    async fn summarize(&self, ctx: &JudgmentContext, prompt: String, document: Option<DocumentId>) -> Option<String> {
        let messages = vec![ChatMessage::system(SUMMARY_SYSTEM_PROMPT), ChatMessage::user(prompt)];
        match self.evaluator.call(ctx, messages).await {
            Ok(text) => Some(text.trim().to_string()).filter(|t| !t.is_empty()),
            Err(err) => {
                tracing::warn!(
                    evaluation_id = %ctx.evaluation_id,
                    document = ?document,
                    provider = ctx.provider.name(),
                    error = %err,
                    "Summary call failed"
                );
                None
            }
        }
    }

    async fn overall_summary(
        &self,
        ctx: &JudgmentContext,
        set: &CriteriaSet,
        score: Option<f64>,
        status: Option<&StatusOption>,
        results: &[CriterionResult],
        budget: &JobBudget,
    ) -> String {
        let overall = score.zip(status.map(|s| s.label.as_str()));
        if !budget.is_exhausted() {
            let lines: Vec<ResultLine<'_>> = results
                .iter()
                .map(|r| ResultLine {
                    external_id: &r.external_id,
                    status: r.status.label(),
                    narrative: &r.narrative,
                })
                .collect();
            let prompt = overall_summary_prompt(&set.name, overall, &lines);
            if let Some(summary) = self.summarize(ctx, prompt, None).await {
                return summary;
            }
        }
        fallback_overall_summary(&set.name, overall, results)
    }

    fn fail_job(&self, id: EvaluationId, reason: String) -> ProcessOutcome {
        match self.evaluations.update(id, |e| e.fail(reason.clone(), Utc::now())) {
            Ok(()) => {
                tracing::error!(evaluation_id = %id, reason = %reason, "Evaluation failed");
                ProcessOutcome::Failed { reason }
            }
            Err(err) => self.interrupted(id, err),
        }
    }

    fn interrupted(&self, id: EvaluationId, err: StoreError) -> ProcessOutcome {
        let status = match &err {
            StoreError::Transition(TransitionError::NotRunning(status)) => *status,
            StoreError::Transition(TransitionError::InvalidTransition { from, .. }) => *from,
            StoreError::EvaluationNotFound(_) => return ProcessOutcome::Missing,
            _ => self
                .evaluations
                .get(id)
                .map(|e| e.status)
                .unwrap_or(EvaluationStatus::Failed),
        };
        tracing::warn!(evaluation_id = %id, status = %status, error = %err, "Evaluation changed underneath the worker, stopping");
        ProcessOutcome::Interrupted { status }
    }
}

impl std::fmt::Debug for EvaluationOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvaluationOrchestrator")
            .field("providers", &self.providers)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn job_message(evaluation: &Evaluation) -> JobMessage {
    JobMessage {
        evaluation_id: evaluation.id,
        document_ids: evaluation.document_ids(),
        criteria_set: evaluation.criteria_set,
    }
}

/// Overall score over the AI results. Not-applicable and degraded results
/// are excluded from both sides of the mean.
fn overall_score(set: &CriteriaSet, results: &[CriterionResult], mode: ScoringMode) -> Option<f64> {
    let weights: HashMap<_, _> = set.items.iter().map(|item| (item.id, item.weight)).collect();
    let scored: Vec<ScoredCriterion> = results
        .iter()
        .filter(|r| !r.is_degraded())
        .map(|r| {
            ScoredCriterion::new(
                aggregation_score(&r.status, r.score, mode),
                weights.get(&r.criterion_id).copied().flatten(),
            )
        })
        .collect();
    aggregate_overall_score(&scored, set.weighted)
}

fn fallback_overall_summary(set_name: &str, overall: Option<(f64, &str)>, results: &[CriterionResult]) -> String {
    let degraded = results.iter().filter(|r| r.is_degraded()).count();
    let not_applicable = results
        .iter()
        .filter(|r| matches!(r.status, CriterionStatus::NotApplicable))
        .count();
    let rated = results.len() - degraded - not_applicable;

    let mut summary = format!(
        "{} criteria of \"{}\" were evaluated: {} rated, {} not applicable, {} need human judgment.",
        results.len(),
        set_name,
        rated,
        not_applicable,
        degraded
    );
    match overall {
        Some((score, label)) => summary.push_str(&format!(" Overall: {} ({:.1}).", label, score)),
        None => summary.push_str(" No overall score could be computed."),
    }
    summary
}

/// Builder for [`EvaluationOrchestrator`].
pub struct EvaluationOrchestratorBuilder {
    config: RuntimeConfig,
    catalog: Option<SharedCatalog>,
    configs: Option<Arc<ConfigStore>>,
    retriever: Option<Arc<dyn ContentRetriever>>,
    providers: Option<ProviderRegistry>,
    queue: Option<Arc<dyn JobQueue>>,
    evaluations: Option<Arc<EvaluationStore>>,
    results: Option<Arc<ResultStore>>,
}

impl EvaluationOrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            config: RuntimeConfig::default(),
            catalog: None,
            configs: None,
            retriever: None,
            providers: None,
            queue: None,
            evaluations: None,
            results: None,
        }
    }

    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn catalog(mut self, catalog: SharedCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Required.
    pub fn configs(mut self, configs: Arc<ConfigStore>) -> Self {
        self.configs = Some(configs);
        self
    }

    /// Required.
    pub fn retriever(mut self, retriever: Arc<dyn ContentRetriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    /// Defaults to [`ProviderRegistry::with_defaults`].
    pub fn providers(mut self, providers: ProviderRegistry) -> Self {
        self.providers = Some(providers);
        self
    }

    /// Defaults to an [`InMemoryJobQueue`] sized by `queue_capacity`.
    pub fn queue(mut self, queue: Arc<dyn JobQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn evaluations(mut self, evaluations: Arc<EvaluationStore>) -> Self {
        self.evaluations = Some(evaluations);
        self
    }

    pub fn results(mut self, results: Arc<ResultStore>) -> Self {
        self.results = Some(results);
        self
    }

    pub fn build(self) -> Result<EvaluationOrchestrator, RuntimeError> {
        let configs = self.configs.ok_or(RuntimeError::NotConfigured("configuration store"))?;
        let retriever = self.retriever.ok_or(RuntimeError::NotConfigured("content retriever"))?;
        let config = self.config;

        let circuit_breaker = Arc::new(CircuitBreaker::new(config.circuit_breaker.clone()));
        let evaluator = CriterionEvaluator::new(
            retriever,
            Arc::clone(&circuit_breaker),
            config.retrieval_top_k,
            config.retry_delay,
            config.provider_timeout,
        );
        let queue = self
            .queue
            .unwrap_or_else(|| Arc::new(InMemoryJobQueue::new(config.queue_capacity)));

        Ok(EvaluationOrchestrator {
            catalog: self.catalog.unwrap_or_default(),
            configs,
            evaluations: self.evaluations.unwrap_or_default(),
            results: self.results.unwrap_or_default(),
            queue,
            providers: Arc::new(self.providers.unwrap_or_else(ProviderRegistry::with_defaults)),
            circuit_breaker,
            evaluator,
            config,
        })
    }
}

impl Default for EvaluationOrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use attest_core::{CriteriaSetId, CriterionItem, CriterionItemId, DocTypeId, ResultFlag, ResultId};
    use serde_json::Value as JsonValue;

    fn item(weight: Option<f64>) -> CriterionItem {
        CriterionItem {
            id: CriterionItemId::new(),
            external_id: "S-1".to_string(),
            requirement: "Access is reviewed".to_string(),
            description: None,
            category: None,
            weight,
        }
    }

    fn set(items: Vec<CriterionItem>, weighted: bool) -> CriteriaSet {
        CriteriaSet {
            id: CriteriaSetId::new(),
            version: 1,
            doc_type_id: DocTypeId::new(),
            name: "Baseline".to_string(),
            weighted,
            items,
            provenance: None,
            locked: true,
            created_at: Utc::now(),
        }
    }

    fn rated(item: &CriterionItem, score: f64) -> CriterionResult {
        CriterionResult {
            id: ResultId::new(),
            evaluation_id: EvaluationId::new(),
            criterion_id: item.id,
            external_id: item.external_id.clone(),
            position: 0,
            narrative: "ok".to_string(),
            status: CriterionStatus::Rated {
                option: StatusOption::new("x", "X", "grey", 0.0, ScoringMode::Numeric),
            },
            score: Some(score),
            confidence: 0.9,
            citations: Vec::new(),
            flags: Vec::new(),
            payload: JsonValue::Null,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_overall_score_weighted_and_excluding_degraded() {
        let items = vec![item(Some(3.0)), item(Some(1.0)), item(Some(1.0)), item(Some(5.0))];
        let mut results: Vec<CriterionResult> = items
            .iter()
            .zip([90.0, 70.0, 40.0])
            .map(|(item, score)| rated(item, score))
            .collect();
        results.push(CriterionResult::degraded(
            EvaluationId::new(),
            &items[3],
            3,
            "timed out",
            ResultFlag::TimeBudgetExhausted,
            Utc::now(),
        ));

        let score = overall_score(&set(items.clone(), true), &results, ScoringMode::Numeric).unwrap();
        assert!((score - 72.0).abs() < 1e-9);

        let score = overall_score(&set(items, false), &results, ScoringMode::Numeric).unwrap();
        assert!((score - 66.666).abs() < 0.01);
    }

    #[test]
    fn test_fallback_summary_counts() {
        let items = vec![item(None), item(None)];
        let results = vec![
            rated(&items[0], 90.0),
            CriterionResult::degraded(
                EvaluationId::new(),
                &items[1],
                1,
                "failed",
                ResultFlag::TimeBudgetExhausted,
                Utc::now(),
            ),
        ];
        let summary = fallback_overall_summary("Baseline", Some((90.0, "Compliant")), &results);
        assert!(summary.contains("1 rated, 0 not applicable, 1 need human judgment"));
        assert!(summary.contains("Overall: Compliant (90.0)."));
    }

    #[test]
    fn test_builder_requires_retriever_and_configs() {
        let err = EvaluationOrchestrator::builder().build().unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Configuration);
    }
}
