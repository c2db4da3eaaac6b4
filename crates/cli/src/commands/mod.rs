//! Command implementations and the team options they share.

pub mod check;
pub mod exec;
pub mod run;

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Context;
use cadre_agent::{LocalRuntime, Runtime, Team, TeamLoader};
use cadre_config::RuntimeConfig;
use cadre_core::CancellationToken;
use clap::Args;
use tracing::warn;

#[derive(Debug, Args)]
pub struct TeamArgs {
    /// Team file (TOML)
    pub file: PathBuf,

    /// Agent to talk to first (default: root)
    #[arg(short, long)]
    pub agent: Option<String>,

    /// Override models as [AGENT=]PROVIDER/MODEL (repeatable)
    #[arg(long = "model", value_name = "[AGENT=]PROVIDER/MODEL")]
    pub models: Vec<String>,

    /// Directory tools and prompt files work in (default: current directory)
    #[arg(long, env = "CADRE_WORKING_DIR")]
    pub working_dir: Option<PathBuf>,
}

/// A loaded team plus what it was loaded with.
pub struct Loaded {
    pub team: Arc<Team>,
    pub config: RuntimeConfig,
    pub filename: String,
}

impl TeamArgs {
    pub fn runtime_config(&self) -> RuntimeConfig {
        match &self.working_dir {
            Some(dir) => RuntimeConfig::default().with_working_dir(dir.clone()),
            None => RuntimeConfig::default(),
        }
    }

    pub fn load(&self) -> anyhow::Result<Loaded> {
        let config = self.runtime_config();
        let team = TeamLoader::new(config.clone())
            .with_model_overrides(self.models.clone())
            .load(&self.file)
            .with_context(|| format!("Failed to load team from {}", self.file.display()))?;
        Ok(Loaded {
            team: Arc::new(team),
            config,
            filename: self.file.display().to_string(),
        })
    }

    /// A runtime positioned on `--agent` when given.
    pub fn runtime(&self, loaded: &Loaded) -> anyhow::Result<LocalRuntime> {
        let runtime = LocalRuntime::new(Arc::clone(&loaded.team))
            .with_config(&loaded.config)
            .with_agent_filename(loaded.filename.clone());
        if let Some(agent) = &self.agent {
            runtime.set_current_agent(agent)?;
        }
        Ok(runtime)
    }
}

/// Ctrl-C cancels whatever token is current; each turn installs a fresh one.
#[derive(Clone)]
pub struct Interrupt {
    current: Arc<Mutex<CancellationToken>>,
}

impl Interrupt {
    pub fn install() -> Self {
        let interrupt = Self {
            current: Arc::new(Mutex::new(CancellationToken::new())),
        };
        let handle = interrupt.clone();
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted; cancelling the current turn");
                handle.current().cancel();
            }
        });
        interrupt
    }

    pub fn current(&self) -> CancellationToken {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Start a new turn with an uncancelled token.
    pub fn next_turn(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = token.clone();
        token
    }
}

/// Stop every toolset, logging rather than failing.
pub async fn shutdown(team: &Team) {
    if let Err(e) = team.stop_toolsets().await {
        warn!(error = %e, "Stopping toolsets failed");
    }
}
