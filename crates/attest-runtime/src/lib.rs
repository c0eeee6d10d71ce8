//! # attest-runtime
//!
//! Asynchronous evaluation pipeline for Attest.
//!
//! `attest-core` decides what is allowed and what a score means; this
//! crate does the waiting. It owns the job queue consumer, the worker
//! pool, the calls to the content retriever and the judgment provider,
//! and the stores that hold evaluations and their results.
//!
//! ## Pipeline
//!
//! 1. [`EvaluationService::create`] validates the request, locks the
//!    criteria version and enqueues a job
//! 2. A [`WorkerPool`] worker dequeues it; the [`EvaluationOrchestrator`]
//!    snapshots configuration and summarizes the documents (0-10%)
//! 3. Each criterion goes through the [`CriterionEvaluator`]: retrieve,
//!    judge, validate, retry once, degrade (10-90%)
//! 4. The overall score and narrative are computed and the evaluation
//!    completes (100%)
//!
//! ## Example
//!
//! ```rust,ignore
//! use attest_runtime::{EvaluationOrchestrator, RuntimeConfig, WorkerPool};
//!
//! let config = RuntimeConfig::from_env()?;
//! attest_runtime::telemetry::init(&config.telemetry)?;
//!
//! let orchestrator = EvaluationOrchestrator::builder()
//!     .config(config.clone())
//!     .retriever(retriever)
//!     .configs(configs)
//!     .build()?;
//! let pool = WorkerPool::spawn(Arc::new(orchestrator), config.workers);
//! ```

pub mod admin;
pub mod cache;
pub mod config;
pub mod evaluator;
pub mod orchestrator;
pub mod prompts;
pub mod providers;
pub mod queue;
pub mod resilience;
pub mod retriever;
pub mod service;
pub mod store;
pub mod telemetry;
pub mod worker;

pub use admin::{AdminService, ConfigStore, SharedCatalog};
pub use cache::ConfigCache;
pub use config::{ConfigLoadError, RuntimeConfig, TelemetryConfig};
pub use evaluator::{CriterionEvaluator, JudgmentContext};
pub use orchestrator::{EvaluationOrchestrator, EvaluationOrchestratorBuilder, ProcessOutcome};
pub use providers::{JudgmentProvider, ProviderError, ProviderRegistry};
pub use queue::{InMemoryJobQueue, JobMessage, JobQueue, QueueError};
pub use resilience::{CircuitBreaker, CircuitBreakerConfig, LlmUsage};
pub use retriever::{ContentRetriever, InMemoryRetriever, RetrievalQuery, RetrieverError};
pub use service::{EvaluationExport, EvaluationProgress, EvaluationService};
pub use store::{EvaluationStore, ResultStore, StoreError};
pub use worker::WorkerPool;

use attest_core::{
    CatalogError, ConfigError, ResultError, SchemaError, ScoringError, TransitionError,
};
use thiserror::Error;

/// Errors from the runtime.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Scoring(#[from] ScoringError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Retriever(#[from] RetrieverError),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Not configured: {0}")]
    NotConfigured(&'static str),
}

impl From<ResultError> for RuntimeError {
    fn from(err: ResultError) -> Self {
        RuntimeError::Store(err.into())
    }
}

impl From<TransitionError> for RuntimeError {
    fn from(err: TransitionError) -> Self {
        RuntimeError::Store(err.into())
    }
}

/// How a caller should treat an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input; rejected before anything is queued
    Validation,
    /// Server-side misconfiguration, not attributable to the request
    Configuration,
    /// Duplicate active job, locked version, invalid state for the operation
    Conflict,
    NotFound,
    Internal,
}

impl RuntimeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RuntimeError::Config(ConfigError::InvalidStatusOptions { .. }) => ErrorKind::Validation,
            RuntimeError::Config(_) | RuntimeError::Schema(_) | RuntimeError::NotConfigured(_) => {
                ErrorKind::Configuration
            }

            RuntimeError::Catalog(err) => match err {
                CatalogError::DocTypeNotFound(_) | CatalogError::CriteriaSetNotFound { .. } => {
                    ErrorKind::NotFound
                }
                CatalogError::DuplicateName(_)
                | CatalogError::DocTypeInUse(_)
                | CatalogError::VersionLocked { .. } => ErrorKind::Conflict,
                _ => ErrorKind::Validation,
            },

            RuntimeError::Scoring(_) | RuntimeError::Validation(_) => ErrorKind::Validation,

            RuntimeError::Store(err) => match err {
                StoreError::EvaluationNotFound(_) | StoreError::Result(ResultError::NotFound(_)) => {
                    ErrorKind::NotFound
                }
                StoreError::Result(ResultError::DuplicateResult { .. }) | StoreError::Conflict { .. } => {
                    ErrorKind::Conflict
                }
                StoreError::Result(_) | StoreError::Transition(TransitionError::NoDocuments) => {
                    ErrorKind::Validation
                }
                StoreError::Transition(_) => ErrorKind::Conflict,
            },

            RuntimeError::Provider(ProviderError::NotConfigured(_)) => ErrorKind::Configuration,
            RuntimeError::Retriever(RetrieverError::DocumentNotFound(_)) | RuntimeError::NotFound(_) => {
                ErrorKind::NotFound
            }
            RuntimeError::Queue(_) | RuntimeError::Provider(_) | RuntimeError::Retriever(_) => {
                ErrorKind::Internal
            }
        }
    }
}
