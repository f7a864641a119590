//! Provider Registry
//!
//! Built once at process start and shared by reference (`Arc`) with the
//! coordinator. Holds one provider per registry key, the default priority
//! order and the ensemble subset. Lookups never hand out a provider whose
//! credentials are missing.

use crate::config::{Config, ProviderKind, ProviderSettings};
use crate::error::OrchestrationError;
use crate::llm::anthropic::AnthropicProvider;
use crate::llm::openai::OpenAiProvider;
use crate::llm::{KeyPool, Provider};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Registry keys used by the built-in variety table and default config
pub mod models {
    pub const CLAUDE: &str = "claude";
    pub const GPT: &str = "gpt";
    pub const GEMINI: &str = "gemini";
    pub const DEEPSEEK: &str = "deepseek";

    /// Default resolution order
    pub const DEFAULT_PRIORITY: &[&str] = &[CLAUDE, GPT, GEMINI, DEEPSEEK];

    /// Default ensemble subset
    pub const DEFAULT_GENERATION: &[&str] = &[CLAUDE, GPT, GEMINI];
}

/// One row of `ProviderRegistry::status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderStatus {
    pub name: String,
    pub model: String,
    pub configured: bool,
    pub in_priority: bool,
    pub in_ensemble: bool,
}

/// Named providers plus resolution order
#[derive(Debug, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn Provider>>,
    /// Registration order, used for listing and as the tail of the priority order
    order: Vec<String>,
    priority: Vec<String>,
    generation: Vec<String>,
}

/// Builder for [`ProviderRegistry`]
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    registry: ProviderRegistry,
}

impl RegistryBuilder {
    /// Register a provider under its `name()`; re-registering replaces it
    pub fn register(mut self, provider: Arc<dyn Provider>) -> Self {
        let name = provider.name().to_string();
        if self.registry.providers.insert(name.clone(), provider).is_none() {
            self.registry.order.push(name);
        }
        self
    }

    /// Default resolution order (unknown names are ignored at lookup time)
    pub fn priority<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.registry.priority = names.into_iter().map(Into::into).collect();
        self
    }

    /// Providers used by ensemble mode
    pub fn generation<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.registry.generation = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn build(self) -> ProviderRegistry {
        self.registry
    }
}

/// Instantiate the vendor client described by `settings`
///
/// Keys are read from the environment here; a missing variable yields an
/// unconfigured provider rather than an error.
pub fn provider_from_settings(settings: &ProviderSettings) -> Arc<dyn Provider> {
    let keys = KeyPool::from_env(&settings.api_key_env);
    let timeout = Duration::from_secs(settings.timeout_secs);

    match settings.kind {
        ProviderKind::OpenAi => {
            let mut p = OpenAiProvider::new(&settings.name, &settings.model, keys)
                .with_timeout(timeout)
                .with_max_tokens(settings.max_tokens);
            if let Some(url) = &settings.base_url {
                p = p.with_base_url(url);
            }
            if let Some(cost) = settings.cost_per_1k {
                p = p.with_cost(cost);
            }
            Arc::new(p)
        }
        ProviderKind::Anthropic => {
            let mut p = AnthropicProvider::new(&settings.name, &settings.model, keys)
                .with_timeout(timeout)
                .with_max_tokens(settings.max_tokens);
            if let Some(url) = &settings.base_url {
                p = p.with_base_url(url);
            }
            if let Some(cost) = settings.cost_per_1k {
                p = p.with_cost(cost);
            }
            Arc::new(p)
        }
    }
}

impl ProviderRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Build every provider in the config, reading keys from the environment
    pub fn from_config(config: &Config) -> Self {
        let registry = config
            .providers
            .iter()
            .fold(Self::builder(), |b, settings| b.register(provider_from_settings(settings)))
            .priority(config.priority.iter().cloned())
            .generation(config.generation_models.iter().cloned())
            .build();

        info!(
            registered = registry.order.len(),
            configured = registry.configured_count(),
            "Provider registry built"
        );
        registry
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Registered names in registration order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn configured_count(&self) -> usize {
        self.providers.values().filter(|p| p.is_configured()).count()
    }

    /// Provider registered as `name`, only if configured
    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers
            .get(name)
            .filter(|p| p.is_configured())
            .cloned()
    }

    /// Priority list followed by any other registered names, deduplicated
    fn priority_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::with_capacity(self.order.len());
        for name in self.priority.iter().chain(self.order.iter()) {
            if self.providers.contains_key(name) && !names.contains(&name.as_str()) {
                names.push(name);
            }
        }
        names
    }

    /// Configured providers in priority order
    pub fn priority_order(&self) -> Vec<Arc<dyn Provider>> {
        self.priority_names()
            .into_iter()
            .filter_map(|name| self.get(name))
            .collect()
    }

    /// The preferred provider if configured, else the first configured one
    /// in priority order
    pub fn resolve(
        &self,
        preferred: Option<&str>,
    ) -> Result<Arc<dyn Provider>, OrchestrationError> {
        if let Some(name) = preferred {
            if let Some(provider) = self.get(name) {
                return Ok(provider);
            }
            debug!(preferred = name, "Preferred provider unavailable, using priority order");
        }

        self.priority_order()
            .into_iter()
            .next()
            .ok_or_else(|| OrchestrationError::no_provider(self.priority_names()))
    }

    /// Configured members of the ensemble subset, in subset order
    pub fn generation_providers(&self) -> Vec<Arc<dyn Provider>> {
        self.generation
            .iter()
            .filter_map(|name| self.get(name))
            .collect()
    }

    /// `primary` followed by each configured fallback, without repeats
    pub fn chain<'a, I>(&self, primary: Arc<dyn Provider>, fallbacks: I) -> Vec<Arc<dyn Provider>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut chain = vec![primary];
        for name in fallbacks {
            if chain.iter().any(|p| p.name() == name) {
                continue;
            }
            if let Some(p) = self.get(name) {
                chain.push(p);
            }
        }
        chain
    }

    /// Every registered provider with its configuration state
    pub fn status(&self) -> Vec<ProviderStatus> {
        self.order
            .iter()
            .filter_map(|name| self.providers.get(name))
            .map(|p| ProviderStatus {
                name: p.name().to_string(),
                model: p.model_name().to_string(),
                configured: p.is_configured(),
                in_priority: self.priority.iter().any(|n| n == p.name()),
                in_ensemble: self.generation.iter().any(|n| n == p.name()),
            })
            .collect()
    }
}
