//! Anthropic Messages API judgment provider.
//!
//! The judgment system prompt (rules, status vocabulary, response schema)
//! is the same for every criterion of an evaluation, so it goes out as a
//! cacheable system block when prompt caching is on.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::{
    factory::ProviderFactory,
    secrets::{ApiCredential, CredentialSource},
    ChatMessage, CompletionConfig, CompletionResponse, JudgmentProvider, ProviderError, Role, TokenUsage,
};

pub const ANTHROPIC_API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

const KEY_LABEL: &str = "Anthropic API key";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    credential: ApiCredential,
    base_url: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for AnthropicProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicProvider")
            .field("base_url", &self.base_url)
            .field("credential", &self.credential)
            .finish()
    }
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Self::build(
            ApiCredential::new(api_key, CredentialSource::Inline, KEY_LABEL),
            DEFAULT_BASE_URL,
        )
    }

    /// Build from the `options` of resolved judgment settings.
    /// Recognized keys: `api_key` (else `ANTHROPIC_API_KEY`), `base_url`.
    pub fn from_options(options: &JsonValue) -> Result<Self, ProviderError> {
        let credential = ApiCredential::resolve(options, "api_key", ANTHROPIC_API_KEY_ENV, KEY_LABEL)?;
        let base_url = match options.get("base_url").and_then(JsonValue::as_str) {
            Some(url) if !(url.starts_with("https://") || url.starts_with("http://")) => {
                return Err(ProviderError::NotConfigured(format!(
                    "base_url '{}' is not an http(s) URL",
                    url
                )));
            }
            Some(url) => url,
            None => DEFAULT_BASE_URL,
        };
        Self::build(credential, base_url)
    }

    fn build(credential: ApiCredential, base_url: &str) -> Result<Self, ProviderError> {
        // Timeouts are set per request from CompletionConfig.
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ProviderError::HttpError(format!("HTTP client could not be built: {}", e)))?;
        Ok(Self {
            credential,
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    system: Vec<TextBlock>,
    messages: Vec<TurnMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct TurnMessage {
    role: &'static str,
    content: Vec<TextBlock>,
}

#[derive(Debug, Serialize)]
struct TextBlock {
    #[serde(rename = "type")]
    kind: &'static str,
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache_control: Option<JsonValue>,
}

impl TextBlock {
    fn plain(text: String) -> Self {
        Self {
            kind: "text",
            text,
            cache_control: None,
        }
    }

    fn cached(text: String) -> Self {
        Self {
            cache_control: Some(serde_json::json!({"type": "ephemeral"})),
            ..Self::plain(text)
        }
    }
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ResponseBlock>,
    model: String,
    stop_reason: Option<String>,
    usage: ResponseUsage,
}

#[derive(Debug, Deserialize)]
struct ResponseBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseUsage {
    input_tokens: u32,
    output_tokens: u32,
    #[serde(default)]
    cache_creation_input_tokens: u32,
    #[serde(default)]
    cache_read_input_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

fn build_request(messages: Vec<ChatMessage>, config: &CompletionConfig) -> MessagesRequest {
    let (system, turns): (Vec<ChatMessage>, Vec<ChatMessage>) =
        messages.into_iter().partition(|m| m.role == Role::System);

    MessagesRequest {
        model: config.model.clone(),
        max_tokens: config.max_tokens,
        system: system
            .into_iter()
            .map(|m| {
                if config.prompt_caching {
                    TextBlock::cached(m.content)
                } else {
                    TextBlock::plain(m.content)
                }
            })
            .collect(),
        messages: turns
            .into_iter()
            .map(|m| TurnMessage {
                role: m.role.as_str(),
                content: vec![TextBlock::plain(m.content)],
            })
            .collect(),
        // Zero is left to the API default.
        temperature: (config.temperature != 0.0).then_some(config.temperature),
    }
}

/// Map a non-success status to a provider error.
fn status_error(status: reqwest::StatusCode, retry_after: Option<Duration>, message: Option<String>) -> ProviderError {
    match status.as_u16() {
        401 | 403 => ProviderError::AuthError,
        429 => ProviderError::RateLimited { retry_after },
        code => ProviderError::ApiError {
            status: code,
            message: message.unwrap_or_else(|| status.to_string()),
        },
    }
}

#[async_trait]
impl JudgmentProvider for AnthropicProvider {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError> {
        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", self.credential.expose())
            .header("anthropic-version", API_VERSION)
            .timeout(config.timeout)
            .json(&build_request(messages, config))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(config.timeout)
                } else {
                    ProviderError::HttpError(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            let message = response.json::<ErrorEnvelope>().await.ok().map(|e| e.error.message);
            return Err(status_error(status, retry_after, message));
        }

        let body: MessagesResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))?;

        Ok(CompletionResponse {
            content: body.content.into_iter().filter_map(|b| b.text).collect(),
            usage: TokenUsage {
                prompt_tokens: body.usage.input_tokens,
                completion_tokens: body.usage.output_tokens,
                cache_read_tokens: body.usage.cache_read_input_tokens,
                cache_creation_tokens: body.usage.cache_creation_input_tokens,
            },
            model: body.model,
            stop_reason: body.stop_reason,
        })
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}

/// Builds [`AnthropicProvider`]s for judgment settings with
/// `provider: anthropic`.
///
/// Options: `api_key`, `base_url`, `prompt_caching` (read by
/// [`CompletionConfig::from_settings`]).
pub struct AnthropicProviderFactory;

impl ProviderFactory for AnthropicProviderFactory {
    fn provider_type(&self) -> &'static str {
        "anthropic"
    }

    fn create(&self, options: &JsonValue) -> Result<Arc<dyn JudgmentProvider>, ProviderError> {
        Ok(Arc::new(AnthropicProvider::from_options(options)?))
    }
}
