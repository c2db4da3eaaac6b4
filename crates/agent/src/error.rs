//! Errors raised while building a team or running it.

use cadre_config::ConfigError;
use cadre_core::error::{ProviderError, ToolError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TeamError {
    #[error("unknown agent '{0}'")]
    UnknownAgent(String),

    #[error("agent '{agent}' references unknown {relation} '{target}'")]
    UnknownRelation {
        agent: String,
        relation: &'static str,
        target: String,
    },

    #[error("team has no agents")]
    Empty,

    #[error("duplicate agent name '{0}'")]
    DuplicateAgent(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("building model '{model}' for agent '{agent}': {source}")]
    Provider {
        agent: String,
        model: String,
        #[source]
        source: ProviderError,
    },

    #[error("stopping toolsets of agent '{agent}': {source}")]
    Stop {
        agent: String,
        #[source]
        source: ToolError,
    },
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Team(#[from] TeamError),

    #[error("agent '{0}' has no models configured")]
    NoModel(String),

    #[error("model call failed for agent '{agent}': {source}")]
    Provider {
        agent: String,
        #[source]
        source: ProviderError,
    },

    #[error("run cancelled")]
    Cancelled,
}
