//! Resilience patterns for attest-runtime.
//!
//! This module provides:
//! - Circuit breaker per judgment provider
//! - Token usage and cost accounting per evaluation
//! - The per-job wall-clock budget

mod budget;
mod circuit_breaker;

pub use budget::{JobBudget, LlmUsage, UsageTracker};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
