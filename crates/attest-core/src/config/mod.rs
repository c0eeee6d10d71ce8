//! Two-layer configuration: platform defaults and organization overrides.
//!
//! Both layers are plain data. All reads go through [`ConfigResolver`],
//! which keeps the one asymmetric rule (judgment-provider settings are
//! gated by a platform-controlled delegation flag) in a single place.

mod resolver;

pub use resolver::{resolve_config, resolve_status_options, ConfigResolver};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::scoring::{validate_status_options, ScoringError};
use crate::types::{OrgId, ScoringMode, StatusOption};

/// Errors from configuration loading and resolution.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("No platform default configured for required field: {field}")]
    ConfigurationMissing { field: String },

    #[error("Invalid status options for {mode} mode: {source}")]
    InvalidStatusOptions {
        mode: ScoringMode,
        #[source]
        source: ScoringError,
    },

    #[error("Invalid judgment settings: {0}")]
    InvalidJudgmentSettings(String),

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl ConfigError {
    pub fn missing(field: impl Into<String>) -> Self {
        ConfigError::ConfigurationMissing {
            field: field.into(),
        }
    }
}

/// Judgment-provider selection and call parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgmentSettings {
    /// Registered provider type (e.g., "anthropic")
    pub provider: String,

    /// Model identifier passed to the provider
    pub model: String,

    /// Maximum tokens per call
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Temperature (0.0 for deterministic)
    #[serde(default)]
    pub temperature: f32,

    /// Provider-specific options (endpoint, credentials reference)
    #[serde(default)]
    pub options: JsonValue,
}

fn default_max_tokens() -> u32 {
    1024
}

impl JudgmentSettings {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            max_tokens: default_max_tokens(),
            temperature: 0.0,
            options: JsonValue::Null,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.provider.trim().is_empty() {
            return Err(ConfigError::InvalidJudgmentSettings(
                "provider must not be empty".to_string(),
            ));
        }
        if self.model.trim().is_empty() {
            return Err(ConfigError::InvalidJudgmentSettings(
                "model must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Organization-level judgment overrides. `None` means inherit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JudgmentOverride {
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub options: Option<JsonValue>,
}

impl JudgmentOverride {
    pub fn is_empty(&self) -> bool {
        self.provider.is_none()
            && self.model.is_none()
            && self.max_tokens.is_none()
            && self.temperature.is_none()
            && self.options.is_none()
    }
}

/// The platform layer. Stored as a single well-known record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlatformConfig {
    #[serde(default)]
    pub scoring_mode: Option<ScoringMode>,

    /// Whether the numeric score is shown next to the categorical label
    #[serde(default)]
    pub show_numeric_score: Option<bool>,

    #[serde(default)]
    pub judgment: Option<JudgmentSettings>,

    /// Custom JSON Schema for judgment responses; `None` uses the built-in one
    #[serde(default)]
    pub response_schema: Option<JsonValue>,

    /// Default status vocabulary, all modes, in configured order
    #[serde(default)]
    pub status_options: Vec<StatusOption>,

    /// Organizations allowed to override judgment-provider settings
    #[serde(default)]
    pub delegated_orgs: BTreeSet<OrgId>,
}

impl PlatformConfig {
    /// Parse platform defaults from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: PlatformConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse platform defaults from JSON.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: PlatformConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse platform defaults from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Startup check: every required field has a default and every status
    /// list is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mode = self
            .scoring_mode
            .ok_or_else(|| ConfigError::missing("scoring_mode"))?;
        if self.show_numeric_score.is_none() {
            return Err(ConfigError::missing("show_numeric_score"));
        }
        self.judgment
            .as_ref()
            .ok_or_else(|| ConfigError::missing("judgment"))?
            .validate()?;

        if !self.status_options.iter().any(|o| o.mode == mode) {
            return Err(ConfigError::missing(format!("status_options.{mode}")));
        }
        validate_layer_options(&self.status_options)
    }

    pub fn is_delegated(&self, org_id: OrgId) -> bool {
        self.delegated_orgs.contains(&org_id)
    }

    /// Active options for a mode, in configured order.
    pub fn options_for(&self, mode: ScoringMode) -> Vec<StatusOption> {
        active_for_mode(&self.status_options, mode)
    }
}

/// The organization layer. Every field is optional; `None` inherits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrgConfig {
    pub org_id: OrgId,

    #[serde(default)]
    pub scoring_mode: Option<ScoringMode>,

    #[serde(default)]
    pub show_numeric_score: Option<bool>,

    /// Only read when the platform delegates to this organization
    #[serde(default)]
    pub judgment: JudgmentOverride,

    #[serde(default)]
    pub response_schema: Option<JsonValue>,

    /// Organization vocabulary; replaces platform defaults per mode
    #[serde(default)]
    pub status_options: Vec<StatusOption>,
}

impl OrgConfig {
    pub fn new(org_id: OrgId) -> Self {
        Self {
            org_id,
            scoring_mode: None,
            show_numeric_score: None,
            judgment: JudgmentOverride::default(),
            response_schema: None,
            status_options: Vec::new(),
        }
    }

    pub fn options_for(&self, mode: ScoringMode) -> Vec<StatusOption> {
        active_for_mode(&self.status_options, mode)
    }

    /// Validate the organization's status lists.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_layer_options(&self.status_options)
    }
}

/// Where a resolved setting came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettingSource {
    Platform,
    Organization,
}

/// Configuration in force for one organization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectiveConfig {
    pub org_id: OrgId,
    pub scoring_mode: ScoringMode,
    pub show_numeric_score: bool,
    pub judgment: JudgmentSettings,
    pub judgment_source: SettingSource,
    pub response_schema: Option<JsonValue>,
}

/// Configuration frozen onto an evaluation when it starts running.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    pub config: EffectiveConfig,

    /// Status vocabulary for `config.scoring_mode`
    pub status_options: Vec<StatusOption>,

    pub resolved_at: DateTime<Utc>,
}

fn active_for_mode(options: &[StatusOption], mode: ScoringMode) -> Vec<StatusOption> {
    options
        .iter()
        .filter(|o| o.mode == mode && o.active)
        .cloned()
        .collect()
}

fn validate_layer_options(options: &[StatusOption]) -> Result<(), ConfigError> {
    for mode in [ScoringMode::Boolean, ScoringMode::Graded, ScoringMode::Numeric] {
        let for_mode: Vec<StatusOption> = options.iter().filter(|o| o.mode == mode).cloned().collect();
        if for_mode.is_empty() {
            continue;
        }
        validate_status_options(&for_mode, mode)
            .map_err(|source| ConfigError::InvalidStatusOptions { mode, source })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLATFORM_YAML: &str = r##"
scoring_mode: numeric
show_numeric_score: true
judgment:
  provider: anthropic
  model: claude-sonnet-4-5-20250514
status_options:
  - id: compliant
    label: Compliant
    color: "#16a34a"
    min_score: 80
    mode: numeric
  - id: partial
    label: Partial
    color: "#f59e0b"
    min_score: 50
    mode: numeric
  - id: non_compliant
    label: Non-Compliant
    color: "#dc2626"
    min_score: 0
    mode: numeric
"##;

    #[test]
    fn test_parse_platform_yaml() {
        let config = PlatformConfig::from_yaml(PLATFORM_YAML).unwrap();
        assert_eq!(config.scoring_mode, Some(ScoringMode::Numeric));
        assert_eq!(config.judgment.as_ref().unwrap().max_tokens, 1024);
        assert_eq!(config.options_for(ScoringMode::Numeric).len(), 3);
        assert!(config.options_for(ScoringMode::Graded).is_empty());
    }

    #[test]
    fn test_missing_judgment_is_configuration_missing() {
        let yaml = r#"
scoring_mode: numeric
show_numeric_score: false
"#;
        match PlatformConfig::from_yaml(yaml) {
            Err(ConfigError::ConfigurationMissing { field }) => assert_eq!(field, "judgment"),
            other => panic!("Expected ConfigurationMissing, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_status_options_for_default_mode() {
        let yaml = r#"
scoring_mode: graded
show_numeric_score: false
judgment:
  provider: anthropic
  model: m
"#;
        match PlatformConfig::from_yaml(yaml) {
            Err(ConfigError::ConfigurationMissing { field }) => {
                assert_eq!(field, "status_options.graded")
            }
            other => panic!("Expected ConfigurationMissing, got {:?}", other),
        }
    }

    #[test]
    fn test_status_list_without_zero_threshold_rejected() {
        let yaml = PLATFORM_YAML.replace("min_score: 0\n", "min_score: 10\n");
        assert!(matches!(
            PlatformConfig::from_yaml(&yaml),
            Err(ConfigError::InvalidStatusOptions { .. })
        ));
    }

    #[test]
    fn test_empty_provider_rejected() {
        let mut config = PlatformConfig::from_yaml(PLATFORM_YAML).unwrap();
        config.judgment = Some(JudgmentSettings::new("", "model"));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidJudgmentSettings(_))
        ));
    }
}
