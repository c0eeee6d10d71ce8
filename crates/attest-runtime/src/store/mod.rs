//! In-memory persistence for evaluations and criterion results.
//!
//! Both stores are lock-protected tables. Every write that has to check
//! and insert (duplicate results, duplicate active evaluations, state
//! transitions) does so under a single write lock, so concurrent callers
//! observe it as one atomic step.

mod evaluations;
mod results;

pub use evaluations::{ConflictKey, EvaluationStore};
pub use results::ResultStore;

use attest_core::{EvaluationId, EvaluationStatus, ResultError, TransitionError};
use thiserror::Error;

/// Errors from the evaluation and result stores.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error(transparent)]
    Result(#[from] ResultError),

    #[error("Evaluation not found: {0}")]
    EvaluationNotFound(EvaluationId),

    #[error("Evaluation {existing} is already {status} for the same documents and criteria set")]
    Conflict {
        existing: EvaluationId,
        status: EvaluationStatus,
    },

    #[error(transparent)]
    Transition(#[from] TransitionError),
}
