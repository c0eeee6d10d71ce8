//! Provider lookup by name.
//!
//! Judgment settings name a provider (`judgment.provider`) and carry its
//! options; the registry maps the name to a factory and builds the
//! provider for each job run.
//!
//! ```ignore
//! let mut registry = ProviderRegistry::new();
//! registry.register(Arc::new(AnthropicProviderFactory));
//! let provider = registry.create_for(&snapshot.config.judgment)?;
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use attest_core::JudgmentSettings;
use serde_json::Value as JsonValue;

use super::{JudgmentProvider, ProviderError};

/// Builds one kind of provider from its options.
pub trait ProviderFactory: Send + Sync {
    /// The name judgment settings use, e.g. `"anthropic"`.
    fn provider_type(&self) -> &'static str;

    fn create(&self, options: &JsonValue) -> Result<Arc<dyn JudgmentProvider>, ProviderError>;
}

#[derive(Default)]
pub struct ProviderRegistry {
    factories: BTreeMap<&'static str, Arc<dyn ProviderFactory>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every provider compiled into this build.
    pub fn with_defaults() -> Self {
        #[allow(unused_mut)]
        let mut registry = Self::new();
        #[cfg(feature = "anthropic")]
        registry.register(Arc::new(super::AnthropicProviderFactory));
        registry
    }

    /// Later registrations replace earlier ones of the same type.
    pub fn register(&mut self, factory: Arc<dyn ProviderFactory>) {
        self.factories.insert(factory.provider_type(), factory);
    }

    pub fn create(&self, provider_type: &str, options: &JsonValue) -> Result<Arc<dyn JudgmentProvider>, ProviderError> {
        let factory = self.factories.get(provider_type).ok_or_else(|| {
            ProviderError::NotConfigured(format!(
                "no judgment provider named '{}' (registered: {})",
                provider_type,
                self.names().join(", ")
            ))
        })?;
        factory.create(options)
    }

    pub fn create_for(&self, settings: &JudgmentSettings) -> Result<Arc<dyn JudgmentProvider>, ProviderError> {
        self.create(&settings.provider, &settings.options)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry").field("providers", &self.names()).finish()
    }
}
