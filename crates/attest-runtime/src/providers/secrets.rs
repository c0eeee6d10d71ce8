//! Credential handling for judgment providers.
//!
//! Provider options live in organization configuration and are copied into
//! every config snapshot, so a key found there must never reach a log line
//! or an error report. Keys are wrapped in [`ApiCredential`] as soon as they
//! are read.
//!
//! ```ignore
//! let key = ApiCredential::resolve(&options, "api_key", "ANTHROPIC_API_KEY", "Anthropic API key")?;
//! request.header("x-api-key", key.expose());
//! ```

use secrecy::{ExposeSecret, SecretString};
use serde_json::Value as JsonValue;
use std::fmt;

use super::ProviderError;

/// Where a credential came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    /// The provider options of the resolved judgment settings
    ProviderOptions,
    Environment,
    /// Handed to a constructor directly
    Inline,
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CredentialSource::ProviderOptions => "provider options",
            CredentialSource::Environment => "environment",
            CredentialSource::Inline => "inline",
        })
    }
}

/// An API key that prints as `[REDACTED]`.
pub struct ApiCredential {
    value: SecretString,
    source: CredentialSource,
    label: &'static str,
}

impl ApiCredential {
    pub fn new(value: impl Into<String>, source: CredentialSource, label: &'static str) -> Self {
        Self {
            value: SecretString::from(value.into()),
            source,
            label,
        }
    }

    /// Read `option_key` from the provider options, else `env_var` from
    /// the process environment.
    pub fn resolve(
        options: &JsonValue,
        option_key: &str,
        env_var: &str,
        label: &'static str,
    ) -> Result<Self, ProviderError> {
        Self::resolve_with(options, option_key, env_var, label, |name| std::env::var(name).ok())
    }

    /// [`resolve`](Self::resolve) against an arbitrary environment.
    pub fn resolve_with<F>(
        options: &JsonValue,
        option_key: &str,
        env_var: &str,
        label: &'static str,
        env: F,
    ) -> Result<Self, ProviderError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let from_options = options
            .get(option_key)
            .and_then(JsonValue::as_str)
            .filter(|v| !v.trim().is_empty())
            .map(|v| Self::new(v, CredentialSource::ProviderOptions, label));
        if let Some(credential) = from_options {
            return Ok(credential);
        }

        env(env_var)
            .filter(|v| !v.trim().is_empty())
            .map(|v| Self::new(v, CredentialSource::Environment, label))
            .ok_or_else(|| {
                ProviderError::NotConfigured(format!(
                    "{} missing: set '{}' in the provider options or the {} environment variable",
                    label, option_key, env_var
                ))
            })
    }

    /// Whether [`resolve`](Self::resolve) would find a key.
    pub fn is_resolvable(options: &JsonValue, option_key: &str, env_var: &str) -> bool {
        Self::resolve(options, option_key, env_var, "credential").is_ok()
    }

    /// The raw key. Only call this where the key is sent.
    pub fn expose(&self) -> &str {
        self.value.expose_secret()
    }

    pub fn source(&self) -> CredentialSource {
        self.source
    }

    pub fn label(&self) -> &'static str {
        self.label
    }
}

impl fmt::Debug for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCredential")
            .field("label", &self.label)
            .field("source", &self.source)
            .field("value", &"[REDACTED]")
            .finish()
    }
}

impl fmt::Display for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}) [REDACTED]", self.label, self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn env_with(key: &'static str, value: &'static str) -> impl Fn(&str) -> Option<String> {
        move |name| (name == key).then(|| value.to_string())
    }

    #[test]
    fn test_key_never_printed() {
        let key = "sk-attest-98765";
        let credential = ApiCredential::new(key, CredentialSource::ProviderOptions, "Judgment API key");

        let debug = format!("{:?}", credential);
        let display = credential.to_string();
        assert!(!debug.contains(key));
        assert!(!display.contains(key));
        assert_eq!(display, "Judgment API key (provider options) [REDACTED]");
        assert_eq!(credential.expose(), key);
    }

    #[test]
    fn test_provider_options_win_over_environment() {
        let options = json!({"api_key": "org-key"});
        let credential =
            ApiCredential::resolve_with(&options, "api_key", "JUDGE_KEY", "Key", env_with("JUDGE_KEY", "env-key"))
                .unwrap();
        assert_eq!(credential.expose(), "org-key");
        assert_eq!(credential.source(), CredentialSource::ProviderOptions);
    }

    #[test]
    fn test_blank_option_falls_back_to_environment() {
        let options = json!({"api_key": "  "});
        let credential =
            ApiCredential::resolve_with(&options, "api_key", "JUDGE_KEY", "Key", env_with("JUDGE_KEY", "env-key"))
                .unwrap();
        assert_eq!(credential.expose(), "env-key");
        assert_eq!(credential.source(), CredentialSource::Environment);
    }

    #[test]
    fn test_missing_key_names_both_places() {
        let err = ApiCredential::resolve_with(&json!({}), "api_key", "JUDGE_KEY", "Key", |_| None).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("'api_key'"));
        assert!(message.contains("JUDGE_KEY"));
    }
}
