//! Pure resolution over a platform snapshot and an optional organization
//! snapshot.
//!
//! Resolution rule: for each field the organization value wins when set,
//! otherwise the platform default applies. Judgment-provider settings are
//! the exception: the organization layer is only read when the platform
//! delegates to that organization. Stale overrides of a non-delegated
//! organization stay in storage but are never read.

use chrono::{DateTime, Utc};

use super::{
    ConfigError, ConfigSnapshot, EffectiveConfig, JudgmentSettings, OrgConfig, PlatformConfig,
    SettingSource,
};
use crate::types::{OrgId, ScoringMode, StatusOption};

/// Resolves effective configuration for one organization.
#[derive(Debug, Clone, Copy)]
pub struct ConfigResolver<'a> {
    platform: &'a PlatformConfig,
    org: Option<&'a OrgConfig>,
}

impl<'a> ConfigResolver<'a> {
    pub fn new(platform: &'a PlatformConfig, org: Option<&'a OrgConfig>) -> Self {
        Self { platform, org }
    }

    /// Effective configuration for `org_id`.
    pub fn resolve_config(&self, org_id: OrgId) -> Result<EffectiveConfig, ConfigError> {
        let org = self.org.filter(|o| o.org_id == org_id);

        let scoring_mode = org
            .and_then(|o| o.scoring_mode)
            .or(self.platform.scoring_mode)
            .ok_or_else(|| ConfigError::missing("scoring_mode"))?;

        let show_numeric_score = org
            .and_then(|o| o.show_numeric_score)
            .or(self.platform.show_numeric_score)
            .ok_or_else(|| ConfigError::missing("show_numeric_score"))?;

        let platform_judgment = self
            .platform
            .judgment
            .as_ref()
            .ok_or_else(|| ConfigError::missing("judgment"))?;

        let (judgment, judgment_source) = match org {
            Some(o) if self.platform.is_delegated(org_id) && !o.judgment.is_empty() => {
                (merge_judgment(platform_judgment, o), SettingSource::Organization)
            }
            _ => (platform_judgment.clone(), SettingSource::Platform),
        };

        let response_schema = org
            .and_then(|o| o.response_schema.clone())
            .or_else(|| self.platform.response_schema.clone());

        Ok(EffectiveConfig {
            org_id,
            scoring_mode,
            show_numeric_score,
            judgment,
            judgment_source,
            response_schema,
        })
    }

    /// Status vocabulary for a mode: the organization's active options when
    /// it has any for that mode (full replacement), else platform defaults.
    pub fn resolve_status_options(
        &self,
        org_id: OrgId,
        mode: ScoringMode,
    ) -> Result<Vec<StatusOption>, ConfigError> {
        if let Some(org) = self.org.filter(|o| o.org_id == org_id) {
            let options = org.options_for(mode);
            if !options.is_empty() {
                return Ok(options);
            }
        }

        let options = self.platform.options_for(mode);
        if options.is_empty() {
            return Err(ConfigError::missing(format!("status_options.{mode}")));
        }
        Ok(options)
    }

    /// Resolve everything a running evaluation needs, frozen at `now`.
    pub fn snapshot(&self, org_id: OrgId, now: DateTime<Utc>) -> Result<ConfigSnapshot, ConfigError> {
        let config = self.resolve_config(org_id)?;
        let status_options = self.resolve_status_options(org_id, config.scoring_mode)?;
        Ok(ConfigSnapshot {
            config,
            status_options,
            resolved_at: now,
        })
    }
}

fn merge_judgment(platform: &JudgmentSettings, org: &OrgConfig) -> JudgmentSettings {
    let o = &org.judgment;
    JudgmentSettings {
        provider: o.provider.clone().unwrap_or_else(|| platform.provider.clone()),
        model: o.model.clone().unwrap_or_else(|| platform.model.clone()),
        max_tokens: o.max_tokens.unwrap_or(platform.max_tokens),
        temperature: o.temperature.unwrap_or(platform.temperature),
        options: o.options.clone().unwrap_or_else(|| platform.options.clone()),
    }
}

/// Convenience wrapper around [`ConfigResolver::resolve_config`].
pub fn resolve_config(
    platform: &PlatformConfig,
    org: Option<&OrgConfig>,
    org_id: OrgId,
) -> Result<EffectiveConfig, ConfigError> {
    ConfigResolver::new(platform, org).resolve_config(org_id)
}

/// Convenience wrapper around [`ConfigResolver::resolve_status_options`].
pub fn resolve_status_options(
    platform: &PlatformConfig,
    org: Option<&OrgConfig>,
    org_id: OrgId,
    mode: ScoringMode,
) -> Result<Vec<StatusOption>, ConfigError> {
    ConfigResolver::new(platform, org).resolve_status_options(org_id, mode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JudgmentOverride;
    use proptest::prelude::*;

    fn platform() -> PlatformConfig {
        PlatformConfig {
            scoring_mode: Some(ScoringMode::Numeric),
            show_numeric_score: Some(false),
            judgment: Some(JudgmentSettings::new("anthropic", "claude-sonnet-4-5")),
            response_schema: None,
            status_options: vec![
                StatusOption::new("ok", "Compliant", "green", 80.0, ScoringMode::Numeric),
                StatusOption::new("no", "Non-Compliant", "red", 0.0, ScoringMode::Numeric),
                StatusOption::new("met", "Met", "green", 100.0, ScoringMode::Boolean),
                StatusOption::new("unmet", "Not Met", "red", 0.0, ScoringMode::Boolean),
            ],
            delegated_orgs: Default::default(),
        }
    }

    fn org_with_override(org_id: OrgId) -> OrgConfig {
        let mut org = OrgConfig::new(org_id);
        org.judgment = JudgmentOverride {
            provider: Some("local".to_string()),
            model: Some("llama-3".to_string()),
            ..Default::default()
        };
        org
    }

    #[test]
    fn test_org_values_win_when_set() {
        let org_id = OrgId::new();
        let mut org = OrgConfig::new(org_id);
        org.show_numeric_score = Some(true);

        let config = resolve_config(&platform(), Some(&org), org_id).unwrap();
        assert!(config.show_numeric_score);
        assert_eq!(config.scoring_mode, ScoringMode::Numeric);
    }

    #[test]
    fn test_judgment_override_ignored_without_delegation() {
        let org_id = OrgId::new();
        let org = org_with_override(org_id);

        let config = resolve_config(&platform(), Some(&org), org_id).unwrap();
        assert_eq!(config.judgment.provider, "anthropic");
        assert_eq!(config.judgment_source, SettingSource::Platform);
    }

    #[test]
    fn test_judgment_override_applied_with_delegation() {
        let org_id = OrgId::new();
        let org = org_with_override(org_id);
        let mut platform = platform();
        platform.delegated_orgs.insert(org_id);

        let config = resolve_config(&platform, Some(&org), org_id).unwrap();
        assert_eq!(config.judgment.provider, "local");
        assert_eq!(config.judgment.model, "llama-3");
        // Unset override fields still inherit
        assert_eq!(config.judgment.max_tokens, 1024);
        assert_eq!(config.judgment_source, SettingSource::Organization);
    }

    #[test]
    fn test_org_status_options_replace_platform_per_mode() {
        let org_id = OrgId::new();
        let mut org = OrgConfig::new(org_id);
        org.status_options = vec![
            StatusOption::new("great", "Great", "green", 90.0, ScoringMode::Numeric),
            StatusOption::new("poor", "Poor", "red", 0.0, ScoringMode::Numeric),
        ];

        let numeric = resolve_status_options(&platform(), Some(&org), org_id, ScoringMode::Numeric).unwrap();
        assert_eq!(
            numeric.iter().map(|o| o.id.as_str()).collect::<Vec<_>>(),
            vec!["great", "poor"]
        );

        // No org options for boolean: platform defaults apply
        let boolean = resolve_status_options(&platform(), Some(&org), org_id, ScoringMode::Boolean).unwrap();
        assert_eq!(boolean.len(), 2);
        assert_eq!(boolean[0].id, "met");
    }

    #[test]
    fn test_inactive_org_options_fall_back_to_platform() {
        let org_id = OrgId::new();
        let mut org = OrgConfig::new(org_id);
        let mut retired = StatusOption::new("old", "Old", "grey", 0.0, ScoringMode::Numeric);
        retired.active = false;
        org.status_options = vec![retired];

        let options = resolve_status_options(&platform(), Some(&org), org_id, ScoringMode::Numeric).unwrap();
        assert_eq!(options[0].id, "ok");
    }

    #[test]
    fn test_missing_mode_is_configuration_missing() {
        let org_id = OrgId::new();
        let result = resolve_status_options(&platform(), None, org_id, ScoringMode::Graded);
        assert!(matches!(result, Err(ConfigError::ConfigurationMissing { .. })));

        let mut platform = platform();
        platform.judgment = None;
        assert!(matches!(
            resolve_config(&platform, None, org_id),
            Err(ConfigError::ConfigurationMissing { .. })
        ));
    }

    #[test]
    fn test_record_for_other_org_is_ignored() {
        let org_id = OrgId::new();
        let mut foreign = OrgConfig::new(OrgId::new());
        foreign.show_numeric_score = Some(true);

        let config = resolve_config(&platform(), Some(&foreign), org_id).unwrap();
        assert!(!config.show_numeric_score);
    }

    #[test]
    fn test_snapshot_uses_resolved_mode() {
        let org_id = OrgId::new();
        let mut org = OrgConfig::new(org_id);
        org.scoring_mode = Some(ScoringMode::Boolean);

        let snapshot = ConfigResolver::new(&platform(), Some(&org))
            .snapshot(org_id, Utc::now())
            .unwrap();
        assert_eq!(snapshot.config.scoring_mode, ScoringMode::Boolean);
        assert!(snapshot.status_options.iter().all(|o| o.mode == ScoringMode::Boolean));
    }

    proptest! {
        #[test]
        fn prop_non_delegated_org_always_gets_platform_judgment(
            provider in prop::option::of("[a-z]{1,12}"),
            model in prop::option::of("[a-z0-9-]{1,16}"),
            max_tokens in prop::option::of(1u32..10_000),
            temperature in prop::option::of(0.0f32..1.0),
        ) {
            let org_id = OrgId::new();
            let mut org = OrgConfig::new(org_id);
            org.judgment = JudgmentOverride { provider, model, max_tokens, temperature, options: None };

            let platform = platform();
            let config = resolve_config(&platform, Some(&org), org_id).unwrap();
            prop_assert_eq!(Some(&config.judgment), platform.judgment.as_ref());
            prop_assert_eq!(config.judgment_source, SettingSource::Platform);
        }
    }
}
