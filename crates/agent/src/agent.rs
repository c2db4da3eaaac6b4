//! Agents: instruction, model pool, toolsets and relations to other agents.
//!
//! Toolsets start lazily on first use and instruction templates are expanded
//! at most once. Neither failure is fatal: both are logged and queued as
//! warnings for the surface layer to drain.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use cadre_core::CancellationToken;
use cadre_core::error::ToolError;
use cadre_core::provider::Provider;
use cadre_core::tool::{Tool, ToolSet};
use cadre_tools::ScriptError;
use rand::Rng;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::expander::InstructionExpander;

/// A toolset plus its started flag. Only a successful start sets the flag,
/// so a failed start is retried on the next access.
pub struct StartableToolSet {
    inner: Arc<dyn ToolSet>,
    started: AtomicBool,
    lifecycle: tokio::sync::Mutex<()>,
}

impl StartableToolSet {
    pub fn new(inner: Arc<dyn ToolSet>) -> Self {
        Self {
            inner,
            started: AtomicBool::new(false),
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn inner(&self) -> &Arc<dyn ToolSet> {
        &self.inner
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub async fn ensure_started(&self) -> Result<(), ToolError> {
        if self.is_started() {
            return Ok(());
        }
        let _lifecycle = self.lifecycle.lock().await;
        if self.is_started() {
            return Ok(());
        }
        self.inner.start().await?;
        self.started.store(true, Ordering::Release);
        Ok(())
    }

    /// No-op unless started. The flag stays set if stopping fails.
    pub async fn stop(&self) -> Result<(), ToolError> {
        let _lifecycle = self.lifecycle.lock().await;
        if !self.is_started() {
            return Ok(());
        }
        self.inner.stop().await?;
        self.started.store(false, Ordering::Release);
        Ok(())
    }
}

/// A named conversational persona. Agents are owned by a
/// [`Team`](crate::team::Team); relations are agent names.
pub struct Agent {
    name: String,
    description: String,
    welcome_message: String,
    instruction: String,
    models: Vec<Arc<dyn Provider>>,
    toolsets: Vec<StartableToolSet>,
    tools: Vec<Arc<dyn Tool>>,
    pub(crate) sub_agents: Vec<String>,
    pub(crate) handoffs: Vec<String>,
    pub(crate) parents: Vec<String>,
    add_date: bool,
    add_environment_info: bool,
    add_prompt_files: Vec<String>,
    max_iterations: u32,
    num_history_items: usize,
    commands: BTreeMap<String, String>,
    expander: InstructionExpander,
    expanded_instruction: OnceCell<String>,
    expansion_error: Mutex<Option<String>>,
    pending_warnings: Mutex<Vec<String>>,
}

impl Agent {
    pub fn new(name: impl Into<String>, instruction: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            welcome_message: String::new(),
            instruction: instruction.into(),
            models: Vec::new(),
            toolsets: Vec::new(),
            tools: Vec::new(),
            sub_agents: Vec::new(),
            handoffs: Vec::new(),
            parents: Vec::new(),
            add_date: false,
            add_environment_info: false,
            add_prompt_files: Vec::new(),
            max_iterations: 0,
            num_history_items: 0,
            commands: BTreeMap::new(),
            expander: InstructionExpander::default(),
            expanded_instruction: OnceCell::new(),
            expansion_error: Mutex::new(None),
            pending_warnings: Mutex::new(Vec::new()),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_welcome_message(mut self, message: impl Into<String>) -> Self {
        self.welcome_message = message.into();
        self
    }

    pub fn with_model(mut self, model: Arc<dyn Provider>) -> Self {
        self.models.push(model);
        self
    }

    pub fn with_models(mut self, models: Vec<Arc<dyn Provider>>) -> Self {
        self.models = models;
        self
    }

    pub fn with_toolset(mut self, toolset: Arc<dyn ToolSet>) -> Self {
        self.toolsets.push(StartableToolSet::new(toolset));
        self
    }

    /// Tools that are always available, without a toolset lifecycle.
    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn with_sub_agents(mut self, names: Vec<String>) -> Self {
        self.sub_agents = names;
        self
    }

    pub fn with_handoffs(mut self, names: Vec<String>) -> Self {
        self.handoffs = names;
        self
    }

    pub fn with_add_date(mut self, enabled: bool) -> Self {
        self.add_date = enabled;
        self
    }

    pub fn with_add_environment_info(mut self, enabled: bool) -> Self {
        self.add_environment_info = enabled;
        self
    }

    pub fn with_prompt_files(mut self, files: Vec<String>) -> Self {
        self.add_prompt_files = files;
        self
    }

    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_num_history_items(mut self, n: usize) -> Self {
        self.num_history_items = n;
        self
    }

    pub fn with_commands(mut self, commands: BTreeMap<String, String>) -> Self {
        self.commands = commands;
        self
    }

    pub fn with_expander(mut self, expander: InstructionExpander) -> Self {
        self.expander = expander;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn welcome_message(&self) -> &str {
        &self.welcome_message
    }

    /// The instruction as configured, before template expansion.
    pub fn raw_instruction(&self) -> &str {
        &self.instruction
    }

    pub fn sub_agents(&self) -> &[String] {
        &self.sub_agents
    }

    pub fn handoffs(&self) -> &[String] {
        &self.handoffs
    }

    pub fn parents(&self) -> &[String] {
        &self.parents
    }

    pub fn has_sub_agents(&self) -> bool {
        !self.sub_agents.is_empty()
    }

    pub fn add_date(&self) -> bool {
        self.add_date
    }

    pub fn add_environment_info(&self) -> bool {
        self.add_environment_info
    }

    pub fn add_prompt_files(&self) -> &[String] {
        &self.add_prompt_files
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    pub fn num_history_items(&self) -> usize {
        self.num_history_items
    }

    pub fn commands(&self) -> &BTreeMap<String, String> {
        &self.commands
    }

    pub fn models(&self) -> &[Arc<dyn Provider>] {
        &self.models
    }

    pub fn toolsets(&self) -> &[StartableToolSet] {
        &self.toolsets
    }

    /// The last instruction expansion failure, if any.
    pub fn expansion_error(&self) -> Option<String> {
        self.expansion_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Pick one of the agent's models uniformly at random.
    pub fn model(&self) -> Option<Arc<dyn Provider>> {
        if self.models.is_empty() {
            return None;
        }
        let index = rand::rng().random_range(0..self.models.len());
        Some(Arc::clone(&self.models[index]))
    }

    /// The instruction with templates expanded, computed once.
    ///
    /// An expansion failure is not an error: the raw instruction is used and
    /// a warning is queued. A cancelled expansion is not cached.
    pub async fn instruction(&self, cancel: &CancellationToken) -> String {
        if !InstructionExpander::needs_expansion(&self.instruction) {
            return self.instruction.clone();
        }
        match self
            .expanded_instruction
            .get_or_try_init(|| self.expand_instruction(cancel))
            .await
        {
            Ok(expanded) => expanded.clone(),
            Err(_) => self.instruction.clone(),
        }
    }

    async fn expand_instruction(&self, cancel: &CancellationToken) -> Result<String, ScriptError> {
        self.ensure_toolsets_started().await;
        let toolsets: Vec<Arc<dyn ToolSet>> = self
            .toolsets
            .iter()
            .filter(|t| t.is_started())
            .map(|t| Arc::clone(t.inner()))
            .collect();

        match self.expander.expand(&self.instruction, &toolsets, cancel).await {
            Ok(expanded) => Ok(expanded),
            Err(ScriptError::Cancelled) => Err(ScriptError::Cancelled),
            Err(e) => {
                warn!(agent = %self.name, error = %e, "Failed to expand instruction");
                *self
                    .expansion_error
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(e.to_string());
                self.add_warning(format!("instruction expansion failed: {e}"));
                Ok(self.instruction.clone())
            }
        }
    }

    /// Every started toolset's tools followed by the agent's own tools.
    ///
    /// A toolset that fails to start or list contributes nothing and leaves
    /// a warning behind.
    pub async fn tools(&self) -> Vec<Arc<dyn Tool>> {
        self.ensure_toolsets_started().await;

        let mut tools = Vec::new();
        for toolset in &self.toolsets {
            if !toolset.is_started() {
                continue;
            }
            match toolset.inner().tools().await {
                Ok(listed) => tools.extend(listed),
                Err(e) => {
                    warn!(agent = %self.name, toolset = toolset.name(), error = %e, "Toolset listing failed; skipping");
                    self.add_warning(format!("{} list failed: {e}", toolset.name()));
                }
            }
        }
        tools.extend(self.tools.iter().cloned());
        tools
    }

    /// Static instructions declared by the agent's toolsets.
    pub fn toolset_instructions(&self) -> Vec<String> {
        self.toolsets
            .iter()
            .map(|t| t.inner().instructions())
            .filter(|i| !i.is_empty())
            .collect()
    }

    async fn ensure_toolsets_started(&self) {
        for toolset in &self.toolsets {
            if toolset.is_started() {
                continue;
            }
            match toolset.ensure_started().await {
                Ok(()) => debug!(agent = %self.name, toolset = toolset.name(), "Toolset started"),
                Err(e) => {
                    warn!(agent = %self.name, toolset = toolset.name(), error = %e, "Toolset start failed; skipping");
                    self.add_warning(format!("{} start failed: {e}", toolset.name()));
                }
            }
        }
    }

    /// Stop every started toolset; the first failure aborts.
    pub async fn stop_toolsets(&self) -> Result<(), ToolError> {
        for toolset in &self.toolsets {
            toolset.stop().await?;
        }
        Ok(())
    }

    pub(crate) fn add_warning(&self, message: String) {
        if message.is_empty() {
            return;
        }
        self.pending_warnings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message);
    }

    /// Pending warnings, cleared on return.
    pub fn drain_warnings(&self) -> Vec<String> {
        std::mem::take(
            &mut *self
                .pending_warnings
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }
}
