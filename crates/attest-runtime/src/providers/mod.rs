//! Judgment providers.
//!
//! Every model call in the pipeline goes through [`JudgmentProvider`]:
//! criterion judgments, document summaries and the overall narrative.
//! Which provider serves an organization is decided by its resolved
//! judgment settings; the [`ProviderRegistry`] turns the provider name and
//! options into an instance.
//!
//! Credentials read from provider options are wrapped by [`secrets`].

use async_trait::async_trait;
use attest_core::JudgmentSettings;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

mod factory;
pub mod secrets;

#[cfg(feature = "anthropic")]
mod anthropic;

pub use factory::{ProviderFactory, ProviderRegistry};
pub use secrets::{ApiCredential, CredentialSource};

#[cfg(feature = "anthropic")]
pub use anthropic::{AnthropicProvider, AnthropicProviderFactory};

/// A failed provider call. Every variant counts as one failed attempt of
/// a criterion judgment.
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    HttpError(String),

    #[error("Rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Provider returned {status}: {message}")]
    ApiError { status: u16, message: String },

    #[error("Unreadable provider response: {0}")]
    ParseError(String),

    #[error("Provider rejected the credentials")]
    AuthError,

    #[error("No response within {0:?}")]
    Timeout(Duration),

    #[error("Circuit open for provider '{0}'")]
    CircuitOpen(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

/// Per-call settings derived from an evaluation's judgment settings.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionConfig {
    pub model: String,
    pub max_tokens: u32,
    /// 0.0 for repeatable judgments
    pub temperature: f32,
    /// Bound on a single attempt
    pub timeout: Duration,
    /// Mark system prompts cacheable where the provider supports it
    pub prompt_caching: bool,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self::from_settings(&JudgmentSettings::new("anthropic", "claude-sonnet-4-5"), Duration::from_secs(60))
    }
}

impl CompletionConfig {
    /// `options.prompt_caching` defaults to on.
    pub fn from_settings(settings: &JudgmentSettings, timeout: Duration) -> Self {
        Self {
            model: settings.model.clone(),
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
            timeout,
            prompt_caching: settings
                .options
                .get("prompt_caching")
                .and_then(|v| v.as_bool())
                .unwrap_or(true),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
    pub usage: TokenUsage,
    /// Model that actually answered, used for cost estimation
    pub model: String,
    pub stop_reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub cache_read_tokens: u32,
    pub cache_creation_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// The model boundary. Implementations do one call per `complete`; retry,
/// timeouts across attempts and circuit breaking live in the evaluator.
#[async_trait]
pub trait JudgmentProvider: Send + Sync {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError>;

    /// Circuit-breaker key and log field.
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roles_serialize_lowercase() {
        let message = ChatMessage::system("rules");
        assert_eq!(serde_json::to_value(&message).unwrap()["role"], "system");
        assert_eq!(ChatMessage::user("criterion").role.as_str(), "user");
    }

    #[test]
    fn test_completion_config_from_settings() {
        let mut settings = JudgmentSettings::new("anthropic", "claude-haiku-4-5");
        settings.max_tokens = 2048;
        settings.options = serde_json::json!({"prompt_caching": false});

        let config = CompletionConfig::from_settings(&settings, Duration::from_secs(20));
        assert_eq!(config.model, "claude-haiku-4-5");
        assert_eq!(config.max_tokens, 2048);
        assert_eq!(config.timeout, Duration::from_secs(20));
        assert!(!config.prompt_caching);

        assert!(CompletionConfig::from_settings(&JudgmentSettings::new("anthropic", "m"), config.timeout).prompt_caching);
    }
}
