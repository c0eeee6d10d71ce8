//! Criterion evaluation: retrieve, judge, validate, retry once, degrade.
//!
//! `evaluate` never returns an error. Whatever goes wrong for one criterion
//! ends up as a degraded [`CriterionResult`] that a reviewer can see and
//! correct; only job-level problems are allowed to fail an evaluation.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use attest_core::{
    ConfigSnapshot, CriterionItem, CriterionResult, DocumentId, EvaluationId, JudgmentError,
    JudgmentValidator, Passage, ResultFlag, ResultId, StatusScale, ValidatedJudgment,
};
use backon::{ExponentialBuilder, Retryable};
use chrono::Utc;
use thiserror::Error;

use crate::prompts::{criterion_prompt, judgment_system_prompt};
use crate::providers::{ChatMessage, CompletionConfig, JudgmentProvider, ProviderError, ProviderRegistry};
use crate::resilience::{CircuitBreaker, JobBudget, UsageTracker};
use crate::retriever::{ContentRetriever, RetrievalQuery, RetrieverError};
use crate::RuntimeError;

/// Why a single judgment attempt failed. Every variant is retryable.
#[derive(Error, Debug)]
pub enum AttemptError {
    #[error("retrieval failed: {0}")]
    Retrieval(#[from] RetrieverError),

    #[error("provider failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("invalid judgment: {0}")]
    Judgment(#[from] JudgmentError),
}

/// Everything the evaluator needs from one evaluation run. Built once per
/// run from the frozen configuration snapshot.
pub struct JudgmentContext {
    pub evaluation_id: EvaluationId,
    pub documents: Vec<DocumentId>,
    pub provider: Arc<dyn JudgmentProvider>,
    pub completion: CompletionConfig,
    pub validator: JudgmentValidator,
    pub system_prompt: String,
    pub usage: Arc<UsageTracker>,
}

impl JudgmentContext {
    /// Build the provider, validator and system prompt for a run.
    ///
    /// Any failure here is a configuration problem and fails the job.
    pub fn prepare(
        evaluation_id: EvaluationId,
        documents: Vec<DocumentId>,
        snapshot: &ConfigSnapshot,
        registry: &ProviderRegistry,
        provider_timeout: Duration,
    ) -> Result<Self, RuntimeError> {
        let scale = StatusScale::new(snapshot.config.scoring_mode, snapshot.status_options.clone())?;
        let validator = JudgmentValidator::new(scale, snapshot.config.response_schema.as_ref())?;
        let system_prompt = judgment_system_prompt(validator.scale(), validator.schema().value()?);
        let provider = registry.create_for(&snapshot.config.judgment)?;

        Ok(Self {
            evaluation_id,
            documents,
            provider,
            completion: CompletionConfig::from_settings(&snapshot.config.judgment, provider_timeout),
            validator,
            system_prompt,
            usage: Arc::new(UsageTracker::new()),
        })
    }

    pub fn scale(&self) -> &StatusScale {
        self.validator.scale()
    }
}

/// Evaluates one criterion item at a time.
pub struct CriterionEvaluator {
    retriever: Arc<dyn ContentRetriever>,
    circuit_breaker: Arc<CircuitBreaker>,
    top_k: usize,
    retry_delay: Duration,
    provider_timeout: Duration,
}

impl CriterionEvaluator {
    pub fn new(
        retriever: Arc<dyn ContentRetriever>,
        circuit_breaker: Arc<CircuitBreaker>,
        top_k: usize,
        retry_delay: Duration,
        provider_timeout: Duration,
    ) -> Self {
        Self {
            retriever,
            circuit_breaker,
            top_k,
            retry_delay,
            provider_timeout,
        }
    }

    pub fn provider_timeout(&self) -> Duration {
        self.provider_timeout
    }

    /// Produce exactly one result for `item`.
    ///
    /// The first attempt is retried once with the same inputs. If the job
    /// budget runs out first, or while this criterion is in flight, the
    /// result is degraded with [`ResultFlag::TimeBudgetExhausted`].
    pub async fn evaluate(
        &self,
        ctx: &JudgmentContext,
        item: &CriterionItem,
        position: u32,
        budget: &JobBudget,
    ) -> CriterionResult {
        if budget.is_exhausted() {
            return budget_exhausted(ctx.evaluation_id, item, position);
        }

        let attempts = AtomicU32::new(0);
        let run = (|| self.attempt(ctx, item, &attempts))
            .retry(
                ExponentialBuilder::default()
                    .with_min_delay(self.retry_delay)
                    .with_max_times(1),
            )
            .sleep(tokio::time::sleep)
            .notify(|err: &AttemptError, delay: Duration| {
                tracing::warn!(
                    evaluation_id = %ctx.evaluation_id,
                    criterion = %item.external_id,
                    error = %err,
                    retry_in = ?delay,
                    "Judgment attempt failed, retrying"
                );
            });

        match tokio::time::timeout(budget.remaining(), run).await {
            Ok(Ok((judgment, passages))) => {
                tracing::debug!(
                    evaluation_id = %ctx.evaluation_id,
                    criterion = %item.external_id,
                    status = judgment.status.label(),
                    passages = passages.len(),
                    flags = judgment.flags.len(),
                    "Criterion judged"
                );
                judged(ctx.evaluation_id, item, position, judgment)
            }
            Ok(Err(err)) => {
                let attempts = attempts.load(Ordering::SeqCst);
                tracing::warn!(
                    evaluation_id = %ctx.evaluation_id,
                    criterion = %item.external_id,
                    attempts,
                    error = %err,
                    "Criterion degraded after failed attempts"
                );
                CriterionResult::degraded(
                    ctx.evaluation_id,
                    item,
                    position,
                    format!(
                        "The judgment could not be produced after {} attempt(s): {}. Human judgment is required.",
                        attempts, err
                    ),
                    ResultFlag::JudgmentFailed {
                        attempts,
                        reason: err.to_string(),
                    },
                    Utc::now(),
                )
            }
            Err(_) => {
                tracing::warn!(
                    evaluation_id = %ctx.evaluation_id,
                    criterion = %item.external_id,
                    "Job budget exhausted while criterion was in flight"
                );
                budget_exhausted(ctx.evaluation_id, item, position)
            }
        }
    }

    async fn attempt(
        &self,
        ctx: &JudgmentContext,
        item: &CriterionItem,
        attempts: &AtomicU32,
    ) -> Result<(ValidatedJudgment, Vec<Passage>), AttemptError> {
        attempts.fetch_add(1, Ordering::SeqCst);

        let query = match &item.description {
            Some(description) => format!("{} {}", item.requirement, description),
            None => item.requirement.clone(),
        };
        let passages = self
            .retriever
            .retrieve(&RetrievalQuery::new(ctx.documents.clone(), query, self.top_k))
            .await?;

        let messages = vec![
            ChatMessage::system(ctx.system_prompt.clone()),
            ChatMessage::user(criterion_prompt(item, &passages)),
        ];
        let content = self.call(ctx, messages).await?;
        let judgment = ctx.validator.validate(&content, &passages)?;
        Ok((judgment, passages))
    }

    /// One provider call through the circuit breaker and the per-attempt
    /// timeout. Usage is recorded on success.
    pub async fn call(&self, ctx: &JudgmentContext, messages: Vec<ChatMessage>) -> Result<String, ProviderError> {
        let provider = ctx.provider.name().to_string();
        if self.circuit_breaker.is_open(&provider) {
            return Err(ProviderError::CircuitOpen(provider));
        }

        match tokio::time::timeout(self.provider_timeout, ctx.provider.complete(messages, &ctx.completion)).await {
            Ok(Ok(response)) => {
                self.circuit_breaker.record_success(&provider);
                ctx.usage.record(&response.usage, &response.model);
                Ok(response.content)
            }
            Ok(Err(err)) => {
                self.circuit_breaker.record_failure(&provider);
                Err(err)
            }
            Err(_) => {
                self.circuit_breaker.record_failure(&provider);
                Err(ProviderError::Timeout(self.provider_timeout))
            }
        }
    }

    /// Leading passages of one document, for summaries. Retried once like
    /// a judgment attempt.
    pub async fn document_passages(
        &self,
        evaluation_id: EvaluationId,
        document_id: DocumentId,
    ) -> Result<Vec<Passage>, RetrieverError> {
        let query = RetrievalQuery::new(vec![document_id], "", self.top_k);
        (|| self.retriever.retrieve(&query))
            .retry(
                ExponentialBuilder::default()
                    .with_min_delay(self.retry_delay)
                    .with_max_times(1),
            )
            .sleep(tokio::time::sleep)
            .notify(|err: &RetrieverError, delay: Duration| {
                tracing::warn!(
                    evaluation_id = %evaluation_id,
                    document = %document_id,
                    error = %err,
                    retry_in = ?delay,
                    "Document retrieval failed, retrying"
                );
            })
            .await
    }
}

fn judged(
    evaluation_id: EvaluationId,
    item: &CriterionItem,
    position: u32,
    judgment: ValidatedJudgment,
) -> CriterionResult {
    CriterionResult {
        id: ResultId::new(),
        evaluation_id,
        criterion_id: item.id,
        external_id: item.external_id.clone(),
        position,
        narrative: judgment.narrative,
        status: judgment.status,
        score: judgment.score,
        confidence: judgment.confidence,
        citations: judgment.citations,
        flags: judgment.flags,
        payload: judgment.payload,
        created_at: Utc::now(),
    }
}

fn budget_exhausted(evaluation_id: EvaluationId, item: &CriterionItem, position: u32) -> CriterionResult {
    CriterionResult::degraded(
        evaluation_id,
        item,
        position,
        "The evaluation ran out of time before this criterion could be judged. Human judgment is required.",
        ResultFlag::TimeBudgetExhausted,
        Utc::now(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{CompletionResponse, TokenUsage};
    use crate::retriever::InMemoryRetriever;
    use async_trait::async_trait;
    use attest_core::{CriterionItemId, CriterionStatus, ScoringMode, StatusOption};
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Replays scripted responses in order; `None` is a provider error.
    struct ScriptedProvider {
        responses: Mutex<VecDeque<Option<String>>>,
        calls: AtomicU32,
    }

    impl ScriptedProvider {
        fn new(responses: Vec<Option<String>>) -> Self {
            Self {
                responses: Mutex::new(responses.into_iter().collect()),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl JudgmentProvider for ScriptedProvider {
        async fn complete(
            &self,
            _messages: Vec<ChatMessage>,
            config: &CompletionConfig,
        ) -> Result<CompletionResponse, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.responses.lock().pop_front().flatten() {
                Some(content) => Ok(CompletionResponse {
                    content,
                    usage: TokenUsage {
                        prompt_tokens: 100,
                        completion_tokens: 20,
                        ..Default::default()
                    },
                    model: config.model.clone(),
                    stop_reason: Some("end_turn".to_string()),
                }),
                None => Err(ProviderError::ApiError {
                    status: 529,
                    message: "overloaded".to_string(),
                }),
            }
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    struct Fixture {
        evaluator: CriterionEvaluator,
        ctx: JudgmentContext,
        provider: Arc<ScriptedProvider>,
        item: CriterionItem,
    }

    impl Fixture {
        fn script(&self, responses: Vec<Option<String>>) {
            self.provider.responses.lock().extend(responses);
        }

        fn document(&self) -> DocumentId {
            self.ctx.documents[0]
        }
    }

    fn fixture() -> Fixture {
        let document = DocumentId::new();
        let retriever = InMemoryRetriever::new();
        retriever.add_document(
            document,
            vec![("Backups are encrypted at rest.", Some("Section 4".to_string()))],
        );

        let scale = StatusScale::new(
            ScoringMode::Numeric,
            vec![
                StatusOption::new("compliant", "Compliant", "green", 80.0, ScoringMode::Numeric),
                StatusOption::new("partial", "Partial", "amber", 50.0, ScoringMode::Numeric),
                StatusOption::new("non", "Non-Compliant", "red", 0.0, ScoringMode::Numeric),
            ],
        )
        .unwrap();
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let ctx = JudgmentContext {
            evaluation_id: EvaluationId::new(),
            documents: vec![document],
            provider: provider.clone(),
            completion: CompletionConfig::default(),
            validator: JudgmentValidator::new(scale, None).unwrap(),
            system_prompt: "rules".to_string(),
            usage: Arc::new(UsageTracker::new()),
        };

        Fixture {
            evaluator: CriterionEvaluator::new(
                Arc::new(retriever),
                Arc::new(CircuitBreaker::default()),
                5,
                Duration::from_millis(1),
                Duration::from_secs(5),
            ),
            ctx,
            provider,
            item: CriterionItem {
                id: CriterionItemId::new(),
                external_id: "S-2".to_string(),
                requirement: "Backups are encrypted".to_string(),
                description: None,
                category: None,
                weight: None,
            },
        }
    }

    fn valid_response(document: DocumentId) -> String {
        serde_json::json!({
            "narrative": "Encryption at rest is documented.",
            "status": "Compliant",
            "score": 90,
            "confidence": 0.9,
            "citations": [{"passage_id": format!("{}#0", document), "claim": "Backups encrypted"}]
        })
        .to_string()
    }

    fn budget() -> JobBudget {
        JobBudget::new(Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_successful_judgment() {
        let f = fixture();
        f.script(vec![Some(valid_response(f.document()))]);

        let result = f.evaluator.evaluate(&f.ctx, &f.item, 1, &budget()).await;

        assert_eq!(result.status.label(), "Compliant");
        assert_eq!(result.score, Some(90.0));
        assert_eq!(result.position, 1);
        assert_eq!(result.citations.len(), 1);
        assert_eq!(result.citations[0].location.as_deref(), Some("Section 4"));
        assert!(result.flags.is_empty());
        assert_eq!(f.ctx.usage.snapshot().llm_calls, 1);
    }

    #[tokio::test]
    async fn test_schema_failure_is_retried_once() {
        let f = fixture();
        f.script(vec![Some("not json".to_string()), Some(valid_response(f.document()))]);

        let result = f.evaluator.evaluate(&f.ctx, &f.item, 0, &budget()).await;

        assert!(!result.is_degraded());
        assert_eq!(f.provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_double_failure_degrades() {
        let f = fixture();
        f.script(vec![None, None, Some(valid_response(f.document()))]);

        let result = f.evaluator.evaluate(&f.ctx, &f.item, 0, &budget()).await;

        assert_eq!(result.status, CriterionStatus::UnableToEvaluate);
        assert_eq!(result.confidence, 0.0);
        assert!(result.narrative.contains("Human judgment is required"));
        assert!(matches!(
            result.flags.as_slice(),
            [ResultFlag::JudgmentFailed { attempts: 2, .. }]
        ));
        assert_eq!(f.provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_exhausted_budget_skips_provider() {
        let f = fixture();

        let result = f
            .evaluator
            .evaluate(&f.ctx, &f.item, 0, &JobBudget::new(Duration::ZERO))
            .await;

        assert_eq!(result.flags, vec![ResultFlag::TimeBudgetExhausted]);
        assert_eq!(f.provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_open_circuit_degrades_without_calling_provider() {
        let f = fixture();
        for _ in 0..3 {
            f.evaluator.circuit_breaker.record_failure("scripted");
        }

        let result = f.evaluator.evaluate(&f.ctx, &f.item, 0, &budget()).await;

        assert!(result.is_degraded());
        assert!(result.narrative.contains("Circuit open"));
        assert_eq!(f.provider.calls.load(Ordering::SeqCst), 0);
    }
}
