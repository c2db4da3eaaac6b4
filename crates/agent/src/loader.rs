//! Team loader: turns a team file into live agents.
//!
//! Toolsets are built through a registry keyed by toolset `type`. A toolset
//! that cannot be built is skipped with a warning on its agent rather than
//! failing the whole team.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use cadre_config::env::{EnvProvider, OsEnv, check_required_env_vars};
use cadre_config::{AgentConfig, ConfigError, RuntimeConfig, TeamConfig, ToolsetConfig};
use cadre_core::error::ToolError;
use cadre_core::provider::Provider;
use cadre_core::registry::Registry;
use cadre_core::tool::ToolSet;
use cadre_providers::ProviderRouter;
use cadre_tools::{CodeModeToolSet, FilesystemToolSet, FilteredToolSet, ScriptEngine, ShellToolSet};
use tracing::{debug, info, warn};

use crate::agent::Agent;
use crate::error::TeamError;
use crate::expander::InstructionExpander;
use crate::team::Team;

/// What a toolset builder gets to work with.
pub struct ToolsetContext<'a> {
    pub working_dir: &'a Path,
    pub env: &'a dyn EnvProvider,
    pub runtime: &'a RuntimeConfig,
}

pub type ToolsetBuilder = Arc<
    dyn Fn(&ToolsetConfig, &ToolsetContext<'_>) -> Result<Arc<dyn ToolSet>, ToolError>
        + Send
        + Sync,
>;

/// Registry with the built-in `filesystem` and `shell` toolsets.
pub fn default_toolset_registry() -> Registry<String, ToolsetBuilder> {
    let registry: Registry<String, ToolsetBuilder> = Registry::new();
    registry.register(
        "filesystem".into(),
        Arc::new(
            |_config: &ToolsetConfig,
             ctx: &ToolsetContext<'_>|
             -> Result<Arc<dyn ToolSet>, ToolError> {
                Ok(Arc::new(FilesystemToolSet::new(ctx.working_dir)))
            },
        ),
    );
    registry.register(
        "shell".into(),
        Arc::new(
            |_config: &ToolsetConfig,
             ctx: &ToolsetContext<'_>|
             -> Result<Arc<dyn ToolSet>, ToolError> {
                Ok(Arc::new(ShellToolSet::new(ctx.working_dir)))
            },
        ),
    );
    registry
}

/// Build an agent's toolsets, collecting a warning for each one that could
/// not be built.
pub fn toolsets_for_agent(
    agent: &AgentConfig,
    ctx: &ToolsetContext<'_>,
    registry: &Registry<String, ToolsetBuilder>,
) -> (Vec<Arc<dyn ToolSet>>, Vec<String>) {
    let mut toolsets: Vec<Arc<dyn ToolSet>> = Vec::new();
    let mut warnings = Vec::new();

    for config in &agent.toolsets {
        let built = match registry.get(config.kind.as_str()) {
            Some(builder) => builder(config, ctx),
            None => Err(ToolError::NotFound(format!("unknown toolset type '{}'", config.kind))),
        };
        match built {
            Ok(toolset) => toolsets.push(Arc::new(
                FilteredToolSet::new(toolset, config.tools.clone())
                    .with_instructions(config.instruction.clone()),
            )),
            Err(e) => {
                warn!(toolset = %config.kind, error = %e, "Toolset creation failed; skipping");
                warnings.push(format!("toolset {} failed: {e}", config.kind));
            }
        }
    }

    if agent.code_mode_tools && !toolsets.is_empty() {
        let engine = ScriptEngine::new(ctx.runtime.sandbox);
        toolsets = vec![Arc::new(CodeModeToolSet::new(toolsets, engine)) as Arc<dyn ToolSet>];
    }

    (toolsets, warnings)
}

/// Loads a team file into a [`Team`].
pub struct TeamLoader {
    runtime: RuntimeConfig,
    env: Arc<dyn EnvProvider>,
    model_overrides: Vec<String>,
    toolsets: Registry<String, ToolsetBuilder>,
    providers: ProviderRouter,
}

impl TeamLoader {
    pub fn new(runtime: RuntimeConfig) -> Self {
        Self {
            runtime,
            env: Arc::new(OsEnv),
            model_overrides: Vec::new(),
            toolsets: default_toolset_registry(),
            providers: ProviderRouter::new(),
        }
    }

    pub fn with_env(mut self, env: Arc<dyn EnvProvider>) -> Self {
        self.env = env;
        self
    }

    /// `[agent=]provider/model` overrides applied before building.
    pub fn with_model_overrides(mut self, overrides: Vec<String>) -> Self {
        self.model_overrides = overrides;
        self
    }

    pub fn with_toolset_builder(self, kind: impl Into<String>, builder: ToolsetBuilder) -> Self {
        self.toolsets.register(kind.into(), builder);
        self
    }

    pub fn with_provider_router(mut self, providers: ProviderRouter) -> Self {
        self.providers = providers;
        self
    }

    pub fn runtime(&self) -> &RuntimeConfig {
        &self.runtime
    }

    pub fn load(&self, path: &Path) -> Result<Team, TeamError> {
        let config = TeamConfig::load(path)?;
        self.build(config)
    }

    pub fn build(&self, mut config: TeamConfig) -> Result<Team, TeamError> {
        if !self.model_overrides.is_empty() {
            config.apply_model_overrides(&self.model_overrides)?;
        }
        check_required_env_vars(&config, self.env.as_ref())?;

        let working_dir = self.working_dir();
        let ctx = ToolsetContext {
            working_dir: &working_dir,
            env: self.env.as_ref(),
            runtime: &self.runtime,
        };
        let expander = InstructionExpander::new(ScriptEngine::new(self.runtime.sandbox));

        let mut agents = Vec::with_capacity(config.agents.len());
        for (name, agent_config) in &config.agents {
            let models = self.models_for_agent(&config, name, agent_config)?;
            let (toolsets, warnings) = toolsets_for_agent(agent_config, &ctx, &self.toolsets);

            let mut agent = Agent::new(name.clone(), agent_config.instruction.clone())
                .with_description(agent_config.description.clone())
                .with_welcome_message(agent_config.welcome_message.clone())
                .with_models(models)
                .with_sub_agents(agent_config.sub_agents.clone())
                .with_handoffs(agent_config.handoffs.clone())
                .with_add_date(agent_config.add_date)
                .with_add_environment_info(agent_config.add_environment_info)
                .with_prompt_files(agent_config.add_prompt_files.clone())
                .with_max_iterations(agent_config.max_iterations)
                .with_num_history_items(agent_config.num_history_items)
                .with_commands(agent_config.commands.clone())
                .with_expander(expander);
            for toolset in toolsets {
                agent = agent.with_toolset(toolset);
            }
            for warning in warnings {
                agent.add_warning(warning);
            }
            debug!(agent = %name, toolsets = agent.toolsets().len(), models = agent.models().len(), "Built agent");
            agents.push(agent);
        }

        let team = Team::new(agents)?;
        info!(agents = team.len(), "Team loaded");
        Ok(team)
    }

    fn working_dir(&self) -> PathBuf {
        std::path::absolute(&self.runtime.working_dir)
            .unwrap_or_else(|_| self.runtime.working_dir.clone())
    }

    fn models_for_agent(
        &self,
        config: &TeamConfig,
        agent: &str,
        agent_config: &AgentConfig,
    ) -> Result<Vec<Arc<dyn Provider>>, TeamError> {
        agent_config
            .model_refs()
            .into_iter()
            .map(|model_ref| {
                let model = config.models.get(model_ref).ok_or_else(|| ConfigError::UnknownModel {
                    agent: agent.to_string(),
                    model: model_ref.to_string(),
                })?;
                self.providers
                    .build(model, self.env.as_ref())
                    .map_err(|source| TeamError::Provider {
                        agent: agent.to_string(),
                        model: model_ref.to_string(),
                        source,
                    })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadre_config::env::MapEnv;

    const TEAM: &str = r#"
        [models.local]
        provider = "dmr"
        model = "ai/qwen3"

        [agents.root]
        model = "local"
        instruction = "Coordinate."
        sub_agents = ["helper"]

        [agents.helper]
        model = "openai/gpt-4o-mini"
        instruction = "Help."

        [[agents.helper.toolsets]]
        type = "filesystem"
        tools = ["list_directory"]
        instruction = "Dummy fetch tool instruction"
    "#;

    fn loader(env: MapEnv) -> TeamLoader {
        TeamLoader::new(RuntimeConfig::default().with_working_dir(std::env::temp_dir()))
            .with_env(Arc::new(env))
    }

    fn openai_env() -> MapEnv {
        MapEnv::new().with("OPENAI_API_KEY", "sk-test")
    }

    #[test]
    fn unknown_toolset_type_becomes_warning() {
        let agent: AgentConfig = toml::from_str(
            r#"
            model = "dmr/x"
            instruction = "test"
            [[toolsets]]
            type = "does-not-exist"
            "#,
        )
        .unwrap();
        let runtime = RuntimeConfig::default();
        let ctx = ToolsetContext {
            working_dir: Path::new("."),
            env: &MapEnv::new(),
            runtime: &runtime,
        };

        let (toolsets, warnings) = toolsets_for_agent(&agent, &ctx, &default_toolset_registry());
        assert!(toolsets.is_empty());
        assert!(warnings[0].contains("toolset does-not-exist failed"));
    }

    #[test]
    fn code_mode_wraps_all_toolsets() {
        let agent: AgentConfig = toml::from_str(
            r#"
            model = "dmr/x"
            code_mode_tools = true
            [[toolsets]]
            type = "filesystem"
            [[toolsets]]
            type = "shell"
            "#,
        )
        .unwrap();
        let runtime = RuntimeConfig::default();
        let ctx = ToolsetContext {
            working_dir: Path::new("."),
            env: &MapEnv::new(),
            runtime: &runtime,
        };

        let (toolsets, _) = toolsets_for_agent(&agent, &ctx, &default_toolset_registry());
        assert_eq!(toolsets.len(), 1);
        assert_eq!(toolsets[0].name(), "code_mode");
    }

    #[test]
    fn builds_team_with_relations_and_toolset_instructions() {
        let config = TeamConfig::from_toml_str(TEAM).unwrap();
        let team = loader(openai_env()).build(config).unwrap();

        let helper = team.agent("helper").unwrap();
        assert_eq!(helper.parents(), ["root"]);
        assert_eq!(helper.toolsets().len(), 1);
        assert_eq!(helper.toolset_instructions(), vec!["Dummy fetch tool instruction"]);
        assert_eq!(helper.model().unwrap().id(), "openai/gpt-4o-mini");
        assert_eq!(team.agent("root").unwrap().model().unwrap().id(), "dmr/ai/qwen3");
    }

    #[test]
    fn missing_api_keys_fail_before_building() {
        let config = TeamConfig::from_toml_str(TEAM).unwrap();
        let err = loader(MapEnv::new()).build(config).err().unwrap();
        assert_eq!(
            err.to_string(),
            "missing required environment variables: OPENAI_API_KEY"
        );
    }

    #[test]
    fn model_overrides() {
        let env = openai_env().with("ANTHROPIC_API_KEY", "sk-ant");

        let team = loader(env.clone())
            .with_model_overrides(vec!["anthropic/claude-sonnet-4-0".into()])
            .build(TeamConfig::from_toml_str(TEAM).unwrap())
            .unwrap();
        assert_eq!(team.agent("root").unwrap().model().unwrap().id(), "anthropic/claude-sonnet-4-0");

        let team = loader(env.clone())
            .with_model_overrides(vec!["root=anthropic/claude-sonnet-4-0".into()])
            .build(TeamConfig::from_toml_str(TEAM).unwrap())
            .unwrap();
        assert_eq!(team.agent("root").unwrap().model().unwrap().id(), "anthropic/claude-sonnet-4-0");
        assert_eq!(team.agent("helper").unwrap().model().unwrap().id(), "openai/gpt-4o-mini");

        let err = loader(env)
            .with_model_overrides(vec!["missing=anthropic/claude-sonnet-4-0".into()])
            .build(TeamConfig::from_toml_str(TEAM).unwrap())
            .err()
            .unwrap();
        assert!(err.to_string().contains("unknown agent 'missing'"));
    }

    #[test]
    fn custom_toolset_builder_is_used() {
        let config = TeamConfig::from_toml_str(
            r#"
            [agents.root]
            model = "dmr/x"
            [[agents.root.toolsets]]
            type = "broken"
            "#,
        )
        .unwrap();
        let team = loader(MapEnv::new())
            .with_toolset_builder(
                "broken",
                Arc::new(
                    |_: &ToolsetConfig, _: &ToolsetContext<'_>| -> Result<Arc<dyn ToolSet>, ToolError> {
                        Err(ToolError::failed("broken", "no backend"))
                    },
                ),
            )
            .build(config)
            .unwrap();

        let warnings = team.agent("root").unwrap().drain_warnings();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].starts_with("toolset broken failed"));
    }
}
