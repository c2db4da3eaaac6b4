//! Provider router: turns a model config into a live provider.
//!
//! Provider kinds are registered by name with a builder; the router looks
//! the kind up, resolves the API key from the environment and builds an
//! [`OpenAiCompatProvider`] pointed at the right endpoint.

use std::sync::Arc;

use cadre_config::ModelConfig;
use cadre_config::env::{EnvProvider, default_api_key_env};
use cadre_core::error::ProviderError;
use cadre_core::provider::Provider;
use cadre_core::registry::Registry;
use tracing::debug;

use crate::openai_compat::OpenAiCompatProvider;

/// Everything a builder needs to construct one provider.
pub struct ProviderSettings<'a> {
    pub model: &'a ModelConfig,
    pub api_key: Option<String>,
}

pub type ProviderBuilder =
    Arc<dyn Fn(ProviderSettings<'_>) -> Result<Arc<dyn Provider>, ProviderError> + Send + Sync>;

/// Routes model configs to the builder registered for their provider kind.
pub struct ProviderRouter {
    kinds: Registry<String, ProviderBuilder>,
}

impl Default for ProviderRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderRouter {
    /// A router with the built-in OpenAI-compatible kinds registered.
    pub fn new() -> Self {
        let router = Self::empty();
        router.register_compat("openai", Some("https://api.openai.com/v1"));
        router.register_compat("openrouter", Some("https://openrouter.ai/api/v1"));
        router.register_compat("anthropic", Some("https://api.anthropic.com/v1"));
        router.register_compat("ollama", Some("http://localhost:11434/v1"));
        router.register_compat("dmr", Some("http://localhost:12434/engines/v1"));
        router.register_compat("custom", None);
        router
    }

    pub fn empty() -> Self {
        Self {
            kinds: Registry::new(),
        }
    }

    /// Register (or replace) the builder for a provider kind.
    pub fn register(&self, kind: impl Into<String>, builder: ProviderBuilder) {
        self.kinds.register(kind.into(), builder);
    }

    /// Register an OpenAI-compatible kind. Without a default URL the
    /// model config must carry `base_url`.
    pub fn register_compat(&self, kind: &str, default_base_url: Option<&'static str>) {
        let name = kind.to_string();
        self.register(
            kind,
            Arc::new(move |settings: ProviderSettings<'_>| -> Result<Arc<dyn Provider>, ProviderError> {
                let base_url = settings
                    .model
                    .base_url
                    .clone()
                    .or_else(|| default_base_url.map(str::to_string))
                    .ok_or_else(|| {
                        ProviderError::NotConfigured(format!(
                            "provider '{name}' requires base_url"
                        ))
                    })?;
                let provider = OpenAiCompatProvider::new(
                    name.clone(),
                    settings.model.model.clone(),
                    base_url,
                    settings.api_key,
                )?
                .with_max_tokens(settings.model.max_tokens)
                .with_temperature(settings.model.temperature);
                Ok(Arc::new(provider))
            }),
        );
    }

    /// Registered provider kinds, sorted.
    pub fn kinds(&self) -> Vec<String> {
        self.kinds.keys()
    }

    /// Build the provider for one model config.
    pub fn build(
        &self,
        model: &ModelConfig,
        env: &dyn EnvProvider,
    ) -> Result<Arc<dyn Provider>, ProviderError> {
        let builder = self.kinds.get(model.provider.as_str()).ok_or_else(|| {
            ProviderError::NotConfigured(format!("unknown provider kind '{}'", model.provider))
        })?;

        let api_key = model
            .api_key_env
            .as_deref()
            .or_else(|| default_api_key_env(&model.provider))
            .and_then(|name| env.get(name));

        debug!(provider = %model.provider, model = %model.model, has_key = api_key.is_some(), "Building provider");
        builder(ProviderSettings { model, api_key })
    }
}

/// Build a provider with the default router.
pub fn create_provider(
    model: &ModelConfig,
    env: &dyn EnvProvider,
) -> Result<Arc<dyn Provider>, ProviderError> {
    ProviderRouter::new().build(model, env)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadre_config::env::MapEnv;

    #[test]
    fn builtin_kinds_are_registered() {
        assert_eq!(
            ProviderRouter::new().kinds(),
            vec!["anthropic", "custom", "dmr", "ollama", "openai", "openrouter"]
        );
    }

    #[test]
    fn builds_provider_with_model_id() {
        let env = MapEnv::new().with("OPENAI_API_KEY", "sk-test");
        let provider = create_provider(&ModelConfig::new("openai", "gpt-4o-mini"), &env).unwrap();
        assert_eq!(provider.id(), "openai/gpt-4o-mini");
    }

    #[test]
    fn unknown_kind_is_not_configured() {
        let err = create_provider(&ModelConfig::new("nope", "m"), &MapEnv::new())
            .err()
            .unwrap();
        assert!(matches!(err, ProviderError::NotConfigured(_)));
    }

    #[test]
    fn custom_requires_base_url() {
        let mut model = ModelConfig::new("custom", "local-model");
        assert!(create_provider(&model, &MapEnv::new()).is_err());

        model.base_url = Some("http://localhost:8080/v1".into());
        let provider = create_provider(&model, &MapEnv::new()).unwrap();
        assert_eq!(provider.provider_name(), "custom");
    }

    #[test]
    fn registered_builder_replaces_builtin() {
        let router = ProviderRouter::new();
        router.register(
            "openai",
            Arc::new(
                |_settings: ProviderSettings<'_>| -> Result<Arc<dyn Provider>, ProviderError> {
                    Err(ProviderError::NotConfigured("disabled".into()))
                },
            ),
        );
        let err = router
            .build(&ModelConfig::new("openai", "gpt-4o"), &MapEnv::new())
            .err()
            .unwrap();
        assert_eq!(err.to_string(), "Provider not configured: disabled");
    }
}
