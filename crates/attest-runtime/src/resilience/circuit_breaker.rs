//! Per-provider circuit breaker.
//!
//! A provider that keeps failing gets its circuit opened; judgment calls
//! then fail fast with [`ProviderError::CircuitOpen`] and the criterion
//! degrades without waiting on a provider that is down. After
//! `recovery_timeout` one probe is let through (half-open); enough
//! successes close the circuit, any failure opens it again.
//!
//! [`ProviderError::CircuitOpen`]: crate::providers::ProviderError::CircuitOpen

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open a closed circuit
    pub failure_threshold: u32,

    /// How long an open circuit rejects calls before probing
    pub recovery_timeout: Duration,

    /// Half-open successes that close the circuit
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(30),
            success_threshold: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CircuitState {
    Closed { failures: u32 },
    Open { opened_at: Instant },
    HalfOpen { successes: u32 },
}

impl CircuitState {
    const CLOSED: CircuitState = CircuitState::Closed { failures: 0 };

    fn on_success(&self, config: &CircuitBreakerConfig) -> CircuitState {
        match *self {
            CircuitState::HalfOpen { successes } if successes + 1 >= config.success_threshold => Self::CLOSED,
            CircuitState::HalfOpen { successes } => CircuitState::HalfOpen {
                successes: successes + 1,
            },
            CircuitState::Closed { .. } => Self::CLOSED,
            CircuitState::Open { opened_at } => CircuitState::Open { opened_at },
        }
    }

    fn on_failure(&self, config: &CircuitBreakerConfig) -> CircuitState {
        match *self {
            CircuitState::Closed { failures } if failures + 1 < config.failure_threshold => CircuitState::Closed {
                failures: failures + 1,
            },
            CircuitState::Open { opened_at } => CircuitState::Open { opened_at },
            CircuitState::Closed { .. } | CircuitState::HalfOpen { .. } => CircuitState::Open {
                opened_at: Instant::now(),
            },
        }
    }
}

/// Circuits keyed by provider name, so organizations on different
/// providers recover independently.
#[derive(Debug)]
pub struct CircuitBreaker {
    circuits: Mutex<HashMap<String, CircuitState>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            circuits: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Whether calls to `provider` should be rejected now. An open circuit
    /// past its recovery timeout turns half-open and admits the call.
    pub fn is_open(&self, provider: &str) -> bool {
        let mut circuits = self.circuits.lock();
        match circuits.get(provider) {
            Some(CircuitState::Open { opened_at }) if opened_at.elapsed() < self.config.recovery_timeout => true,
            Some(CircuitState::Open { .. }) => {
                circuits.insert(provider.to_string(), CircuitState::HalfOpen { successes: 0 });
                tracing::info!(provider, "Circuit half-open, probing provider");
                false
            }
            _ => false,
        }
    }

    pub fn record_success(&self, provider: &str) {
        self.apply(provider, CircuitState::on_success);
    }

    pub fn record_failure(&self, provider: &str) {
        self.apply(provider, CircuitState::on_failure);
    }

    fn apply(&self, provider: &str, step: fn(&CircuitState, &CircuitBreakerConfig) -> CircuitState) {
        let mut circuits = self.circuits.lock();
        let current = circuits.get(provider).cloned().unwrap_or(CircuitState::CLOSED);
        let next = step(&current, &self.config);

        match (&current, &next) {
            (CircuitState::Open { .. }, _) => {}
            (_, CircuitState::Open { .. }) => tracing::warn!(provider, from = ?current, "Circuit opened"),
            (CircuitState::HalfOpen { .. }, CircuitState::Closed { .. }) => {
                tracing::info!(provider, "Circuit closed after recovery")
            }
            _ => {}
        }

        if next == CircuitState::CLOSED {
            circuits.remove(provider);
        } else {
            circuits.insert(provider.to_string(), next);
        }
    }

    pub fn state(&self, provider: &str) -> CircuitState {
        self.circuits
            .lock()
            .get(provider)
            .cloned()
            .unwrap_or(CircuitState::CLOSED)
    }

    /// Close every circuit.
    pub fn reset(&self) {
        self.circuits.lock().clear();
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(failure_threshold: u32, recovery_timeout: Duration, success_threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold,
            recovery_timeout,
            success_threshold,
        })
    }

    #[test]
    fn test_opens_on_consecutive_failures_only() {
        let cb = breaker(2, Duration::from_secs(30), 1);
        assert_eq!(cb.state("anthropic"), CircuitState::Closed { failures: 0 });

        cb.record_failure("anthropic");
        cb.record_success("anthropic");
        cb.record_failure("anthropic");
        assert!(!cb.is_open("anthropic"));

        cb.record_failure("anthropic");
        assert!(cb.is_open("anthropic"));
        assert!(!cb.is_open("scripted"));
    }

    #[test]
    fn test_half_open_probe_closes_after_successes() {
        let cb = breaker(1, Duration::ZERO, 2);
        cb.record_failure("anthropic");

        assert!(!cb.is_open("anthropic"));
        assert_eq!(cb.state("anthropic"), CircuitState::HalfOpen { successes: 0 });

        cb.record_success("anthropic");
        assert_eq!(cb.state("anthropic"), CircuitState::HalfOpen { successes: 1 });
        cb.record_success("anthropic");
        assert_eq!(cb.state("anthropic"), CircuitState::Closed { failures: 0 });
    }

    #[test]
    fn test_failed_probe_reopens() {
        let cb = breaker(1, Duration::ZERO, 2);
        cb.record_failure("anthropic");
        cb.is_open("anthropic");

        cb.record_failure("anthropic");
        assert!(matches!(cb.state("anthropic"), CircuitState::Open { .. }));
    }

    #[test]
    fn test_reset_closes_everything() {
        let cb = breaker(1, Duration::from_secs(30), 1);
        cb.record_failure("anthropic");
        assert!(cb.is_open("anthropic"));

        cb.reset();
        assert!(!cb.is_open("anthropic"));
    }
}
