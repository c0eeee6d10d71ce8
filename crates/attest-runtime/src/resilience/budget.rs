//! Usage accounting and the per-job time budget.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

use crate::providers::TokenUsage;

/// Provider usage accumulated over one job run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmUsage {
    pub llm_calls: u32,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub cache_read_tokens: u32,
    pub cache_creation_tokens: u32,
    /// Calls that were served partly from the prompt cache
    pub cache_hits: u32,
    /// USD, from list prices
    pub estimated_cost: f64,
}

impl LlmUsage {
    pub fn add(&mut self, usage: &TokenUsage, model: &str) {
        self.llm_calls += 1;
        self.prompt_tokens += usage.prompt_tokens;
        self.completion_tokens += usage.completion_tokens;
        self.total_tokens += usage.total();
        self.cache_read_tokens += usage.cache_read_tokens;
        self.cache_creation_tokens += usage.cache_creation_tokens;
        self.cache_hits += u32::from(usage.cache_read_tokens > 0);
        self.estimated_cost += ModelRates::for_model(model).cost(usage);
    }
}

/// USD per million tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
struct ModelRates {
    input: f64,
    output: f64,
    cache_write: f64,
    cache_read: f64,
}

impl ModelRates {
    const SONNET: ModelRates = ModelRates {
        input: 3.0,
        output: 15.0,
        cache_write: 3.75,
        cache_read: 0.3,
    };
    const OPUS: ModelRates = ModelRates {
        input: 5.0,
        output: 25.0,
        cache_write: 6.25,
        cache_read: 0.5,
    };
    const HAIKU: ModelRates = ModelRates {
        input: 1.0,
        output: 5.0,
        cache_write: 1.25,
        cache_read: 0.1,
    };

    /// Unknown models are priced as Sonnet.
    fn for_model(model: &str) -> Self {
        if model.contains("opus") {
            Self::OPUS
        } else if model.contains("haiku") {
            Self::HAIKU
        } else {
            Self::SONNET
        }
    }

    fn cost(&self, usage: &TokenUsage) -> f64 {
        let tokens = [
            (usage.prompt_tokens, self.input),
            (usage.completion_tokens, self.output),
            (usage.cache_creation_tokens, self.cache_write),
            (usage.cache_read_tokens, self.cache_read),
        ];
        tokens
            .iter()
            .map(|(count, rate)| f64::from(*count) * rate / 1_000_000.0)
            .sum()
    }
}

/// Usage shared by every call of one job run.
#[derive(Debug, Default)]
pub struct UsageTracker {
    usage: Mutex<LlmUsage>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, usage: &TokenUsage, model: &str) {
        self.usage.lock().add(usage, model);
    }

    pub fn snapshot(&self) -> LlmUsage {
        self.usage.lock().clone()
    }
}

/// Wall-clock budget for one job run, on tokio's clock so paused-time
/// tests can drive it.
#[derive(Debug, Clone, Copy)]
pub struct JobBudget {
    deadline: Instant,
}

impl JobBudget {
    pub fn new(limit: Duration) -> Self {
        Self {
            deadline: Instant::now() + limit,
        }
    }

    /// Zero once exhausted.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining().is_zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(prompt: u32, completion: u32, cache_read: u32) -> TokenUsage {
        TokenUsage {
            prompt_tokens: prompt,
            completion_tokens: completion,
            cache_read_tokens: cache_read,
            cache_creation_tokens: 0,
        }
    }

    #[test]
    fn test_cost_by_model_family() {
        let mut sonnet = LlmUsage::default();
        sonnet.add(&tokens(1000, 500, 0), "claude-sonnet-4-5");
        // 1000 * 3 + 500 * 15 per million
        assert!((sonnet.estimated_cost - 0.0105).abs() < 1e-9);
        assert_eq!(sonnet.total_tokens, 1500);

        let mut haiku = LlmUsage::default();
        haiku.add(&tokens(1000, 500, 0), "claude-haiku-4-5");
        assert!(haiku.estimated_cost < sonnet.estimated_cost);

        let mut unknown = LlmUsage::default();
        unknown.add(&tokens(1000, 500, 0), "scripted-1");
        assert_eq!(unknown.estimated_cost, sonnet.estimated_cost);
    }

    #[test]
    fn test_tracker_counts_calls_and_cache_hits() {
        let tracker = UsageTracker::new();
        tracker.record(&tokens(10, 5, 900), "claude-haiku-4-5");
        tracker.record(&TokenUsage::default(), "claude-haiku-4-5");

        let usage = tracker.snapshot();
        assert_eq!(usage.llm_calls, 2);
        assert_eq!(usage.cache_hits, 1);
        assert_eq!(usage.cache_read_tokens, 900);
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_budget_runs_down() {
        let budget = JobBudget::new(Duration::from_secs(5));
        assert!(!budget.is_exhausted());

        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(budget.remaining(), Duration::from_secs(2));

        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(budget.is_exhausted());
    }
}
