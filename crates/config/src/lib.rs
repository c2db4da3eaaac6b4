//! Team configuration loading and validation for cadre.
//!
//! A team file (TOML) declares models, agents and each agent's toolsets.
//! Loading validates cross references, auto-registers inline
//! `provider/model` references, and model overrides from the command line
//! are applied on top before the team is built.

pub mod env;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use cadre_core::parse_model_id;

pub use env::{EnvProvider, MapEnv, OsEnv, check_required_env_vars, default_api_key_env};

/// Conversation messages kept per turn when an agent sets no bound.
pub const DEFAULT_MAX_HISTORY_ITEMS: usize = 100;

/// Agent used when the caller does not name one.
pub const DEFAULT_AGENT: &str = "root";

/// The root of a team file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TeamConfig {
    #[serde(default)]
    pub models: BTreeMap<String, ModelConfig>,

    #[serde(default)]
    pub agents: BTreeMap<String, AgentConfig>,
}

/// One named model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelConfig {
    /// Provider kind (openai, anthropic, openrouter, ollama, dmr, custom)
    pub provider: String,

    /// Model name at the provider
    pub model: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Environment variable holding the API key; overrides the kind's default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl ModelConfig {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            ..Self::default()
        }
    }
}

/// One agent definition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    /// A model name, an inline `provider/model`, or a comma separated list
    #[serde(default)]
    pub model: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub welcome_message: String,

    /// May contain `${...}` templates evaluated against the agent's tools
    #[serde(default)]
    pub instruction: String,

    #[serde(default)]
    pub sub_agents: Vec<String>,

    #[serde(default)]
    pub handoffs: Vec<String>,

    #[serde(default)]
    pub add_date: bool,

    #[serde(default)]
    pub add_environment_info: bool,

    /// Files (relative to the working directory) appended to the prompt
    #[serde(default)]
    pub add_prompt_files: Vec<String>,

    /// Model calls per run; 0 means unlimited
    #[serde(default)]
    pub max_iterations: u32,

    /// Conversation messages kept per turn; 0 means the runtime default
    #[serde(default)]
    pub num_history_items: usize,

    /// Expose the toolsets through a single scripting tool
    #[serde(default)]
    pub code_mode_tools: bool,

    /// Named macro instructions
    #[serde(default)]
    pub commands: BTreeMap<String, String>,

    #[serde(default)]
    pub toolsets: Vec<ToolsetConfig>,
}

impl AgentConfig {
    /// Model references listed in `model`, in order.
    pub fn model_refs(&self) -> Vec<&str> {
        self.model
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .collect()
    }
}

/// One toolset attached to an agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolsetConfig {
    /// Toolset type, resolved through the toolset registry
    #[serde(rename = "type")]
    pub kind: String,

    /// Only expose these tools; empty means all
    #[serde(default)]
    pub tools: Vec<String>,

    /// Overrides the toolset's own instructions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instruction: Option<String>,
}

/// Scripting sandbox resource limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Maximum iterations of any single loop
    pub loop_iteration_limit: u64,

    /// Maximum call depth
    pub recursion_limit: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            loop_iteration_limit: 1_000_000,
            recursion_limit: 512,
        }
    }
}

/// Settings the runtime needs that do not come from the team file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Directory tools and prompt files are resolved against
    pub working_dir: PathBuf,

    /// History bound for agents that set none
    pub max_history_items: usize,

    pub sandbox: SandboxConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            working_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            max_history_items: DEFAULT_MAX_HISTORY_ITEMS,
            sandbox: SandboxConfig::default(),
        }
    }
}

impl RuntimeConfig {
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    pub fn with_max_history_items(mut self, max: usize) -> Self {
        self.max_history_items = max;
        self
    }
}

impl TeamConfig {
    /// Load and validate a team file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let mut config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        tracing::debug!(
            path = %path.display(),
            agents = config.agents.len(),
            models = config.models.len(),
            "Loaded team config"
        );
        Ok(config)
    }

    /// Parse and validate a team from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: PathBuf::from("<inline>"),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross references and register inline `provider/model` models.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        if self.agents.is_empty() {
            return Err(ConfigError::ValidationError(
                "team defines no agents".into(),
            ));
        }

        for (agent_name, agent) in &self.agents {
            let refs = agent.model_refs();
            if refs.is_empty() {
                return Err(ConfigError::NoModel {
                    agent: agent_name.clone(),
                });
            }
            for model_ref in refs {
                if self.models.contains_key(model_ref) {
                    continue;
                }
                let Some((provider, model)) = parse_model_id(model_ref) else {
                    return Err(ConfigError::UnknownModel {
                        agent: agent_name.clone(),
                        model: model_ref.to_string(),
                    });
                };
                self.models
                    .insert(model_ref.to_string(), ModelConfig::new(provider, model));
            }

            for sub_agent in &agent.sub_agents {
                if !self.agents.contains_key(sub_agent) {
                    return Err(ConfigError::UnknownSubAgent {
                        agent: agent_name.clone(),
                        sub_agent: sub_agent.clone(),
                    });
                }
            }

            for handoff in &agent.handoffs {
                if !self.agents.contains_key(handoff) {
                    return Err(ConfigError::UnknownHandoff {
                        agent: agent_name.clone(),
                        handoff: handoff.clone(),
                    });
                }
            }
        }

        for (name, model) in &self.models {
            if model.temperature.is_some_and(|t| !(0.0..=2.0).contains(&t)) {
                return Err(ConfigError::ValidationError(format!(
                    "model '{name}': temperature must be between 0.0 and 2.0"
                )));
            }
        }

        Ok(())
    }

    /// Apply `[agent=]provider/model` overrides. Without an agent name the
    /// override applies to every agent.
    pub fn apply_model_overrides<S: AsRef<str>>(
        &mut self,
        overrides: &[S],
    ) -> Result<(), ConfigError> {
        for raw in overrides {
            let raw = raw.as_ref().trim();
            match raw.split_once('=') {
                Some((agent, model)) => {
                    let agent = agent.trim();
                    let Some(config) = self.agents.get_mut(agent) else {
                        return Err(ConfigError::UnknownAgentOverride {
                            agent: agent.to_string(),
                        });
                    };
                    config.model = model.trim().to_string();
                }
                None => {
                    for config in self.agents.values_mut() {
                        config.model = raw.to_string();
                    }
                }
            }
        }
        self.validate()
    }

    /// `root` when present, else the first agent by name.
    pub fn default_agent_name(&self) -> Option<&str> {
        if self.agents.contains_key(DEFAULT_AGENT) {
            return Some(DEFAULT_AGENT);
        }
        self.agents.keys().next().map(String::as_str)
    }

    /// Models referenced by at least one agent.
    pub fn referenced_models(&self) -> BTreeSet<&str> {
        self.agents
            .values()
            .flat_map(AgentConfig::model_refs)
            .collect()
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    #[error("agent '{agent}' has no model")]
    NoModel { agent: String },

    #[error("agent '{agent}' references non-existent model '{model}'")]
    UnknownModel { agent: String, model: String },

    #[error("agent '{agent}' references non-existent sub-agent '{sub_agent}'")]
    UnknownSubAgent { agent: String, sub_agent: String },

    #[error("agent '{agent}' references non-existent handoff '{handoff}'")]
    UnknownHandoff { agent: String, handoff: String },

    #[error("model override references unknown agent '{agent}'")]
    UnknownAgentOverride { agent: String },

    #[error("missing required environment variables: {}", missing.join(", "))]
    MissingEnv { missing: Vec<String> },
}
