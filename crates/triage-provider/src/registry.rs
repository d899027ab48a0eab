//! Named registry of [`Provider`] instances and per-model limits.
//!
//! Switching which provider serves analysis requests is a configuration
//! value (the active provider's name), never a call-site change — every
//! caller goes through [`ProviderRegistry::active`].

use std::collections::HashMap;
use std::sync::Arc;

use crate::{Provider, ProviderError};

/// Per-model request limits (§4.D: max tokens, temperature, top-p).
#[derive(Debug, Clone)]
pub struct ModelLimits {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

impl Default for ModelLimits {
    fn default() -> Self {
        Self {
            max_tokens: 512,
            temperature: 0.2,
            top_p: 0.9,
        }
    }
}

/// Holds every registered provider and which one is currently active.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn Provider>>,
    active: String,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
            active: String::new(),
        }
    }

    /// Registers `provider` under its own [`Provider::name`]. The first
    /// provider registered becomes active by default.
    pub fn register(&mut self, provider: Arc<dyn Provider>) -> &mut Self {
        let name = provider.name().to_string();
        if self.active.is_empty() {
            self.active = name.clone();
        }
        self.providers.insert(name, provider);
        self
    }

    /// Sets the active provider by name. Errors if no provider with that
    /// name is registered, leaving the previous active provider in place.
    pub fn set_active(&mut self, name: &str) -> Result<(), ProviderError> {
        if !self.providers.contains_key(name) {
            return Err(ProviderError::UnknownProvider(name.to_string()));
        }
        self.active = name.to_string();
        Ok(())
    }

    pub fn active_name(&self) -> &str {
        &self.active
    }

    /// Returns the currently active provider.
    pub fn active(&self) -> Result<Arc<dyn Provider>, ProviderError> {
        self.providers
            .get(&self.active)
            .cloned()
            .ok_or_else(|| ProviderError::UnknownProvider(self.active.clone()))
    }

    /// Returns a specific provider by name, regardless of which is active.
    pub fn get(&self, name: &str) -> Result<Arc<dyn Provider>, ProviderError> {
        self.providers
            .get(name)
            .cloned()
            .ok_or_else(|| ProviderError::UnknownProvider(name.to_string()))
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use triage_core::Advice;

    struct StubProvider(&'static str);

    #[async_trait::async_trait]
    impl Provider for StubProvider {
        async fn analyze(&self, _prompt: &str) -> Option<Advice> {
            Some(Advice::Empty)
        }

        fn name(&self) -> &str {
            self.0
        }
    }

    #[test]
    fn first_registered_provider_is_active() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(StubProvider("openai")));
        registry.register(Arc::new(StubProvider("gemini")));
        assert_eq!(registry.active_name(), "openai");
    }

    #[test]
    fn set_active_switches_provider() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(StubProvider("openai")));
        registry.register(Arc::new(StubProvider("gemini")));
        registry.set_active("gemini").unwrap();
        assert_eq!(registry.active_name(), "gemini");
        assert_eq!(registry.active().unwrap().name(), "gemini");
    }

    #[test]
    fn set_active_rejects_unknown_provider() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(StubProvider("openai")));
        assert!(matches!(
            registry.set_active("anthropic"),
            Err(ProviderError::UnknownProvider(name)) if name == "anthropic"
        ));
    }

    #[test]
    fn active_on_empty_registry_errors() {
        let registry = ProviderRegistry::new();
        assert!(registry.active().is_err());
    }
}
