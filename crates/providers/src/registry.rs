//! Provider registry.
//!
//! Holds one adapter per backend, in registration order, and picks the one
//! a given endpoint should talk through.

use crate::anthropic::AnthropicAdapter;
use crate::google::GoogleAdapter;
use crate::openai_compat::OpenAiCompatAdapter;
use crate::traits::ProviderAdapter;
use ba_domain::trace::TraceEvent;
use std::sync::Arc;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ProviderRegistry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ProviderRegistry {
    adapters: Vec<Arc<dyn ProviderAdapter>>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl ProviderRegistry {
    pub fn empty() -> Self {
        Self {
            adapters: Vec::new(),
        }
    }

    /// Every built-in adapter. Anthropic is first and therefore the
    /// fallback for endpoints nothing else recognizes.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(AnthropicAdapter));
        registry.register(Arc::new(OpenAiCompatAdapter::openai()));
        registry.register(Arc::new(OpenAiCompatAdapter::azure()));
        registry.register(Arc::new(GoogleAdapter));
        registry
    }

    /// Append an adapter. An adapter whose name is already taken replaces
    /// the existing one in place.
    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        match self.adapters.iter_mut().find(|a| a.name() == adapter.name()) {
            Some(slot) => *slot = adapter,
            None => self.adapters.push(adapter),
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.iter().find(|a| a.name() == name).cloned()
    }

    /// Adapter names in registration order.
    pub fn names(&self) -> Vec<&'static str> {
        self.adapters.iter().map(|a| a.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    /// Pick the adapter for `endpoint`.
    ///
    /// An explicit name wins when it is registered. Otherwise the first
    /// adapter whose `matches()` accepts the URL is used, and if none does
    /// the first registered adapter is used with a warning, so compatible
    /// but unlisted endpoints keep working. `None` only when the registry
    /// is empty.
    pub fn select(
        &self,
        endpoint: &str,
        explicit: Option<&str>,
    ) -> Option<Arc<dyn ProviderAdapter>> {
        if let Some(name) = explicit.filter(|n| !n.trim().is_empty()) {
            if let Some(adapter) = self.get(name.trim()) {
                Self::record(&adapter, endpoint, true);
                return Some(adapter);
            }
            tracing::warn!(
                provider = %name,
                known = ?self.names(),
                "unknown provider name, selecting by endpoint instead"
            );
        }

        if let Some(adapter) = self.adapters.iter().find(|a| a.matches(endpoint)) {
            Self::record(adapter, endpoint, true);
            return Some(Arc::clone(adapter));
        }

        let fallback = self.adapters.first()?;
        tracing::warn!(
            endpoint = %endpoint,
            provider = fallback.name(),
            "no provider adapter matches endpoint, using default"
        );
        Self::record(fallback, endpoint, false);
        Some(Arc::clone(fallback))
    }

    fn record(adapter: &Arc<dyn ProviderAdapter>, endpoint: &str, matched: bool) {
        TraceEvent::ProviderSelected {
            provider: adapter.name().to_owned(),
            endpoint: endpoint.to_owned(),
            matched,
        }
        .emit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pick(endpoint: &str, explicit: Option<&str>) -> &'static str {
        ProviderRegistry::with_defaults()
            .select(endpoint, explicit)
            .unwrap()
            .name()
    }

    #[test]
    fn selects_by_url() {
        assert_eq!(pick("https://api.anthropic.com", None), "anthropic");
        assert_eq!(pick("https://api.openai.com/v1", None), "openai");
        assert_eq!(
            pick("https://myres.openai.azure.com/openai/deployments/gpt4o", None),
            "azure_openai"
        );
        assert_eq!(
            pick("https://generativelanguage.googleapis.com", None),
            "google"
        );
    }

    #[test]
    fn explicit_name_wins_over_url() {
        assert_eq!(pick("https://api.anthropic.com", Some("google")), "google");
    }

    #[test]
    fn unknown_name_falls_back_to_url_matching() {
        assert_eq!(pick("https://api.openai.com/v1", Some("nope")), "openai");
    }

    #[test]
    fn unmatched_endpoint_uses_first_adapter() {
        assert_eq!(pick("https://llm.internal.example", None), "anthropic");
    }

    #[test]
    fn empty_registry_selects_nothing() {
        assert!(ProviderRegistry::empty()
            .select("https://api.anthropic.com", None)
            .is_none());
    }

    #[test]
    fn register_replaces_same_name() {
        let mut reg = ProviderRegistry::with_defaults();
        let before = reg.len();
        reg.register(Arc::new(GoogleAdapter));
        assert_eq!(reg.len(), before);
        assert_eq!(reg.names(), vec!["anthropic", "openai", "azure_openai", "google"]);
    }
}
