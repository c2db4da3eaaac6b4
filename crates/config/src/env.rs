//! Environment access and the required-variable preflight.
//!
//! Missing API keys are reported all at once before any agent is built,
//! instead of failing on the first model call.

use std::collections::{BTreeSet, HashMap};

use crate::{ConfigError, TeamConfig};

/// Source of environment variables.
pub trait EnvProvider: Send + Sync {
    /// The variable's value; unset and empty are both `None`.
    fn get(&self, name: &str) -> Option<String>;
}

/// The process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsEnv;

impl EnvProvider for OsEnv {
    fn get(&self, name: &str) -> Option<String> {
        std::env::var(name).ok().filter(|v| !v.is_empty())
    }
}

/// A fixed map, for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct MapEnv(HashMap<String, String>);

impl MapEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }
}

impl EnvProvider for MapEnv {
    fn get(&self, name: &str) -> Option<String> {
        self.0.get(name).filter(|v| !v.is_empty()).cloned()
    }
}

/// The API key variable a provider kind reads by default.
pub fn default_api_key_env(provider: &str) -> Option<&'static str> {
    match provider {
        "openai" => Some("OPENAI_API_KEY"),
        "anthropic" => Some("ANTHROPIC_API_KEY"),
        "openrouter" => Some("OPENROUTER_API_KEY"),
        _ => None,
    }
}

/// Fail with every missing variable needed by the models agents use.
pub fn check_required_env_vars(
    config: &TeamConfig,
    env: &dyn EnvProvider,
) -> Result<(), ConfigError> {
    let mut missing = BTreeSet::new();

    for model_ref in config.referenced_models() {
        let Some(model) = config.models.get(model_ref) else {
            continue;
        };
        let required = model
            .api_key_env
            .as_deref()
            .or_else(|| default_api_key_env(&model.provider));
        if let Some(name) = required.filter(|name| env.get(name).is_none()) {
            missing.insert(name.to_string());
        }
    }

    if missing.is_empty() {
        return Ok(());
    }
    tracing::debug!(missing = ?missing, "Required environment variables are missing");
    Err(ConfigError::MissingEnv {
        missing: missing.into_iter().collect(),
    })
}
