//! The Evaluation aggregate and its lifecycle state machine.
//!
//! ```text
//! pending ──start──▶ running ──complete──▶ completed
//!    ▲                 │
//!    └─────reset───────┴──fail──▶ failed
//! ```
//!
//! `completed` and `failed` are terminal; a failed job is retried by
//! creating a new evaluation. Progress is persisted on the record so a crashed worker leaves a
//! resumable `running` evaluation behind.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::catalog::CriteriaSetRef;
use crate::config::ConfigSnapshot;
use crate::types::{DocTypeId, DocumentId, EvaluationId, OrgId, StatusOption, WorkspaceId};

/// Progress reserved for per-document summaries before criteria start.
pub const SUMMARY_STAGE_PERCENT: u8 = 10;

/// Progress share spread across criterion processing.
pub const CRITERIA_STAGE_PERCENT: u8 = 80;

/// Errors from lifecycle transitions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition {
        from: EvaluationStatus,
        to: EvaluationStatus,
    },

    #[error("Evaluation is not running (status: {0})")]
    NotRunning(EvaluationStatus),

    #[error("Processed count would exceed total ({total})")]
    ProgressOverflow { total: u32 },

    #[error("Evaluation has no documents")]
    NoDocuments,

    #[error("Evaluation has {expected} documents, got {actual} summaries")]
    SummaryCountMismatch { expected: usize, actual: usize },
}

/// Lifecycle status of an evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl EvaluationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, EvaluationStatus::Completed | EvaluationStatus::Failed)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, EvaluationStatus::Pending | EvaluationStatus::Running)
    }
}

impl fmt::Display for EvaluationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EvaluationStatus::Pending => "pending",
            EvaluationStatus::Running => "running",
            EvaluationStatus::Completed => "completed",
            EvaluationStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A document submitted to an evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationDocumentLink {
    pub document_id: DocumentId,

    /// Explicit ordering when documents are evaluated jointly
    pub position: u32,

    pub summary: Option<String>,
}

/// Input for creating an evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEvaluation {
    pub org_id: OrgId,
    pub workspace_id: WorkspaceId,
    pub doc_type_id: DocTypeId,
    pub criteria_set: CriteriaSetRef,

    /// Documents in evaluation order
    pub documents: Vec<DocumentId>,
}

/// Computed once all criteria have results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OverallOutcome {
    pub score: Option<f64>,
    pub status: Option<StatusOption>,
    pub summary: Option<String>,
}

/// The job / aggregate root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub id: EvaluationId,
    pub org_id: OrgId,
    pub workspace_id: WorkspaceId,
    pub doc_type_id: DocTypeId,
    pub criteria_set: CriteriaSetRef,
    pub documents: Vec<EvaluationDocumentLink>,
    pub status: EvaluationStatus,
    pub processed: u32,
    pub total: u32,

    /// 0..=100
    pub progress: u8,

    /// Combined summary of all submitted documents
    pub document_summary: Option<String>,

    /// Narrative summary of the criterion results
    pub overall_summary: Option<String>,
    pub overall_score: Option<f64>,
    pub overall_status: Option<StatusOption>,

    /// Job-level failure detail
    pub error: Option<String>,

    /// Frozen at `pending → running`
    pub config: Option<ConfigSnapshot>,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Evaluation {
    /// A new pending evaluation over `total` criteria.
    pub fn new(request: NewEvaluation, total: u32, now: DateTime<Utc>) -> Result<Self, TransitionError> {
        if request.documents.is_empty() {
            return Err(TransitionError::NoDocuments);
        }

        let documents = request
            .documents
            .into_iter()
            .enumerate()
            .map(|(position, document_id)| EvaluationDocumentLink {
                document_id,
                position: position as u32,
                summary: None,
            })
            .collect();

        Ok(Self {
            id: EvaluationId::new(),
            org_id: request.org_id,
            workspace_id: request.workspace_id,
            doc_type_id: request.doc_type_id,
            criteria_set: request.criteria_set,
            documents,
            status: EvaluationStatus::Pending,
            processed: 0,
            total,
            progress: 0,
            document_summary: None,
            overall_summary: None,
            overall_score: None,
            overall_status: None,
            error: None,
            config: None,
            created_at: now,
            started_at: None,
            completed_at: None,
        })
    }

    /// Document ids in evaluation order.
    pub fn document_ids(&self) -> Vec<DocumentId> {
        let mut links: Vec<&EvaluationDocumentLink> = self.documents.iter().collect();
        links.sort_by_key(|l| l.position);
        links.into_iter().map(|l| l.document_id).collect()
    }

    /// `pending → running`.
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.transition(EvaluationStatus::Running)?;
        self.started_at = Some(now);
        self.error = None;
        Ok(())
    }

    /// Freeze the configuration used for the rest of the run.
    pub fn attach_config(&mut self, snapshot: ConfigSnapshot) -> Result<(), TransitionError> {
        self.ensure_running()?;
        self.config = Some(snapshot);
        Ok(())
    }

    /// Record stage-one output. Summaries are positional, one per document.
    pub fn record_document_summaries(
        &mut self,
        summaries: Vec<Option<String>>,
        combined: Option<String>,
    ) -> Result<u8, TransitionError> {
        self.ensure_running()?;
        if summaries.len() != self.documents.len() {
            return Err(TransitionError::SummaryCountMismatch {
                expected: self.documents.len(),
                actual: summaries.len(),
            });
        }

        self.documents.sort_by_key(|l| l.position);
        for (link, summary) in self.documents.iter_mut().zip(summaries) {
            link.summary = summary;
        }
        self.document_summary = combined;
        self.progress = self.progress.max(progress_percent(self.processed, self.total));
        Ok(self.progress)
    }

    /// Count one more criterion as processed and return the new progress.
    pub fn record_criterion_processed(&mut self) -> Result<u8, TransitionError> {
        self.ensure_running()?;
        if self.processed >= self.total {
            return Err(TransitionError::ProgressOverflow { total: self.total });
        }
        self.processed += 1;
        self.progress = self.progress.max(progress_percent(self.processed, self.total));
        Ok(self.progress)
    }

    /// Align the processed count with results already recorded, for a run
    /// resumed after a crash or reset.
    pub fn reconcile_processed(&mut self, recorded: u32) -> Result<u8, TransitionError> {
        self.ensure_running()?;
        if recorded > self.total {
            return Err(TransitionError::ProgressOverflow { total: self.total });
        }
        self.processed = self.processed.max(recorded);
        self.progress = self.progress.max(progress_percent(self.processed, self.total));
        Ok(self.progress)
    }

    /// `running → completed`.
    pub fn complete(&mut self, outcome: OverallOutcome, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.ensure_running()?;
        self.transition(EvaluationStatus::Completed)?;
        self.overall_score = outcome.score;
        self.overall_status = outcome.status;
        self.overall_summary = outcome.summary;
        self.progress = 100;
        self.completed_at = Some(now);
        Ok(())
    }

    /// `running → failed`. Recorded results are kept.
    pub fn fail(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.transition(EvaluationStatus::Failed)?;
        self.error = Some(reason.into());
        self.completed_at = Some(now);
        Ok(())
    }

    /// Administrative reset: `running → pending`. Processed criteria are
    /// kept so the next run resumes after them.
    pub fn reset(&mut self) -> Result<(), TransitionError> {
        self.transition(EvaluationStatus::Pending)?;
        self.completed_at = None;
        self.config = None;
        Ok(())
    }

    fn ensure_running(&self) -> Result<(), TransitionError> {
        if self.status != EvaluationStatus::Running {
            return Err(TransitionError::NotRunning(self.status));
        }
        Ok(())
    }

    fn transition(&mut self, to: EvaluationStatus) -> Result<(), TransitionError> {
        use EvaluationStatus::*;

        let allowed = matches!(
            (self.status, to),
            (Pending, Running)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Pending)
        );
        if !allowed {
            return Err(TransitionError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        tracing::debug!(evaluation = %self.id, from = %self.status, to = %to, "Evaluation transition");
        self.status = to;
        Ok(())
    }
}

/// `10% + 80% * processed / total`, the remaining 10% is reserved for the
/// overall summary.
pub fn progress_percent(processed: u32, total: u32) -> u8 {
    if total == 0 {
        return SUMMARY_STAGE_PERCENT + CRITERIA_STAGE_PERCENT;
    }
    let processed = processed.min(total) as u64;
    let share = (CRITERIA_STAGE_PERCENT as u64 * processed) / total as u64;
    SUMMARY_STAGE_PERCENT + share as u8
}
