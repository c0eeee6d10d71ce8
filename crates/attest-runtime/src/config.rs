//! Runtime configuration.
//!
//! Platform and organization settings live in `attest_core::config`; this
//! module covers how the pipeline itself runs: worker count, budgets,
//! timeouts and caching. Every field has a default and can be overridden
//! through `ATTEST_*` environment variables. Durations use humantime
//! syntax (`90s`, `15m`, `1h 30m`).

use std::env;
use std::time::Duration;
use thiserror::Error;

use crate::resilience::CircuitBreakerConfig;

/// Errors from reading runtime configuration.
#[derive(Error, Debug)]
pub enum ConfigLoadError {
    #[error("{var} must be a duration like '90s' or '15m': {source}")]
    InvalidDuration {
        var: &'static str,
        #[source]
        source: humantime::DurationError,
    },

    #[error("{var} must be a positive integer, got '{value}'")]
    InvalidNumber { var: &'static str, value: String },
}

/// Tracing controls.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryConfig {
    /// Filter directive used when `RUST_LOG` is unset
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// How the evaluation pipeline runs.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    /// Concurrent workers consuming the job queue
    pub workers: usize,

    /// Maximum queued messages
    pub queue_capacity: usize,

    /// Wall-clock budget per job run
    pub job_budget: Duration,

    /// Timeout for a single provider attempt
    pub provider_timeout: Duration,

    /// Delay before the single judgment retry
    pub retry_delay: Duration,

    /// Passages retrieved per criterion
    pub retrieval_top_k: usize,

    /// Time-to-live for cached organization configuration
    pub config_cache_ttl: Duration,

    /// Organizations kept in the configuration cache
    pub config_cache_capacity: u64,

    /// Delay before requeueing a message whose evaluation is leased by
    /// another worker
    pub lease_retry_delay: Duration,

    pub circuit_breaker: CircuitBreakerConfig,

    pub telemetry: TelemetryConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 1024,
            job_budget: Duration::from_secs(15 * 60),
            provider_timeout: Duration::from_secs(60),
            retry_delay: Duration::from_secs(2),
            retrieval_top_k: 8,
            config_cache_ttl: Duration::from_secs(5 * 60),
            config_cache_capacity: 10_000,
            lease_retry_delay: Duration::from_secs(1),
            circuit_breaker: CircuitBreakerConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl RuntimeConfig {
    const ENV_WORKERS: &'static str = "ATTEST_WORKERS";
    const ENV_QUEUE_CAPACITY: &'static str = "ATTEST_QUEUE_CAPACITY";
    const ENV_JOB_BUDGET: &'static str = "ATTEST_JOB_BUDGET";
    const ENV_PROVIDER_TIMEOUT: &'static str = "ATTEST_PROVIDER_TIMEOUT";
    const ENV_RETRY_DELAY: &'static str = "ATTEST_RETRY_DELAY";
    const ENV_RETRIEVAL_TOP_K: &'static str = "ATTEST_RETRIEVAL_TOP_K";
    const ENV_CONFIG_CACHE_TTL: &'static str = "ATTEST_CONFIG_CACHE_TTL";
    const ENV_CONFIG_CACHE_CAPACITY: &'static str = "ATTEST_CONFIG_CACHE_CAPACITY";
    const ENV_LEASE_RETRY_DELAY: &'static str = "ATTEST_LEASE_RETRY_DELAY";
    const ENV_BREAKER_FAILURES: &'static str = "ATTEST_BREAKER_FAILURES";
    const ENV_BREAKER_RECOVERY: &'static str = "ATTEST_BREAKER_RECOVERY";
    const ENV_LOG_LEVEL: &'static str = "ATTEST_LOG_LEVEL";

    /// Loads config from environment variables (with defaults).
    pub fn from_env() -> Result<Self, ConfigLoadError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Loads config from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigLoadError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let duration = |var: &'static str, default: Duration| -> Result<Duration, ConfigLoadError> {
            match lookup(var) {
                Some(value) => humantime::parse_duration(value.trim())
                    .map_err(|source| ConfigLoadError::InvalidDuration { var, source }),
                None => Ok(default),
            }
        };
        let number = |var: &'static str, default: u64| -> Result<u64, ConfigLoadError> {
            match lookup(var) {
                Some(value) => match value.trim().parse::<u64>() {
                    Ok(n) if n > 0 => Ok(n),
                    _ => Err(ConfigLoadError::InvalidNumber { var, value }),
                },
                None => Ok(default),
            }
        };

        Ok(Self {
            workers: number(Self::ENV_WORKERS, defaults.workers as u64)? as usize,
            queue_capacity: number(Self::ENV_QUEUE_CAPACITY, defaults.queue_capacity as u64)? as usize,
            job_budget: duration(Self::ENV_JOB_BUDGET, defaults.job_budget)?,
            provider_timeout: duration(Self::ENV_PROVIDER_TIMEOUT, defaults.provider_timeout)?,
            retry_delay: duration(Self::ENV_RETRY_DELAY, defaults.retry_delay)?,
            retrieval_top_k: number(Self::ENV_RETRIEVAL_TOP_K, defaults.retrieval_top_k as u64)? as usize,
            config_cache_ttl: duration(Self::ENV_CONFIG_CACHE_TTL, defaults.config_cache_ttl)?,
            config_cache_capacity: number(Self::ENV_CONFIG_CACHE_CAPACITY, defaults.config_cache_capacity)?,
            lease_retry_delay: duration(Self::ENV_LEASE_RETRY_DELAY, defaults.lease_retry_delay)?,
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: number(
                    Self::ENV_BREAKER_FAILURES,
                    defaults.circuit_breaker.failure_threshold as u64,
                )? as u32,
                recovery_timeout: duration(
                    Self::ENV_BREAKER_RECOVERY,
                    defaults.circuit_breaker.recovery_timeout,
                )?,
                ..defaults.circuit_breaker
            },
            telemetry: TelemetryConfig {
                log_level: lookup(Self::ENV_LOG_LEVEL).unwrap_or(defaults.telemetry.log_level),
            },
        })
    }
}
