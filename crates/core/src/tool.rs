//! Tool and ToolSet traits: the abstraction over agent capabilities.
//!
//! A [`Tool`] is a single capability exposed to a model (name, JSON-schema
//! parameters, async handler). A [`ToolSet`] groups tools behind a shared
//! lifecycle (`start`/`stop`), e.g. a connection to an external capability
//! provider. Agents own toolsets; the runtime dispatches calls through a
//! [`ToolRegistry`] built from an agent's live tool list.

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::ToolError;
use crate::provider::ToolDefinition;

/// A request to execute a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call ID (matches the model's tool_call.id)
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Arguments as a JSON value
    pub arguments: serde_json::Value,
}

/// The result of a tool execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether the tool considers the call successful
    pub success: bool,

    /// The output content handed back to the model
    pub output: String,

    /// Optional structured data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ToolResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            data: None,
        }
    }

    /// A soft failure: the handler ran but the operation did not succeed.
    pub fn error(output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
            data: None,
        }
    }
}

/// The core Tool trait.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "read_file").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given arguments.
    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the model.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// Names listed under `required` in a JSON-schema object.
pub fn required_parameters(schema: &serde_json::Value) -> Vec<String> {
    schema["required"]
        .as_array()
        .map(|names| {
            names
                .iter()
                .filter_map(|n| n.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default()
}

/// A question a toolset asks the user through the surface layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElicitationRequest {
    pub message: String,
    #[serde(default)]
    pub schema: serde_json::Value,
}

/// How the user answered an [`ElicitationRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ElicitationResponse {
    Accept { content: serde_json::Value },
    Decline,
    Cancel,
}

pub type ElicitationHandler = Arc<
    dyn Fn(ElicitationRequest) -> BoxFuture<'static, Result<ElicitationResponse, ToolError>>
        + Send
        + Sync,
>;

pub type OAuthSuccessHandler = Arc<dyn Fn() + Send + Sync>;

/// A lifecycle-managed group of tools.
///
/// `tools()` must only be called after a successful `start()`; the agent's
/// startable wrapper enforces that ordering.
#[async_trait]
pub trait ToolSet: Send + Sync {
    /// Short identifier used in logs and warnings (e.g. "filesystem").
    fn name(&self) -> &str;

    /// The live tool list.
    async fn tools(&self) -> Result<Vec<Arc<dyn Tool>>, ToolError>;

    /// Static instructions appended to the system prompt. Empty means none.
    fn instructions(&self) -> String {
        String::new()
    }

    async fn start(&self) -> Result<(), ToolError> {
        Ok(())
    }

    async fn stop(&self) -> Result<(), ToolError> {
        Ok(())
    }

    fn set_elicitation_handler(&self, _handler: ElicitationHandler) {}

    fn set_oauth_success_handler(&self, _handler: OAuthSuccessHandler) {}
}

/// A toolset over a fixed list of tools with no lifecycle of its own.
pub struct StaticToolSet {
    name: String,
    tools: Vec<Arc<dyn Tool>>,
    instructions: String,
}

impl StaticToolSet {
    pub fn new(name: impl Into<String>, tools: Vec<Arc<dyn Tool>>) -> Self {
        Self {
            name: name.into(),
            tools,
            instructions: String::new(),
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }
}

#[async_trait]
impl ToolSet for StaticToolSet {
    fn name(&self) -> &str {
        &self.name
    }

    async fn tools(&self) -> Result<Vec<Arc<dyn Tool>>, ToolError> {
        Ok(self.tools.clone())
    }

    fn instructions(&self) -> String {
        self.instructions.clone()
    }
}

/// A registry of available tools, keyed by name.
///
/// The runtime uses this to:
/// 1. Get tool definitions to send to the model
/// 2. Look up and execute tools when the model requests them
///
/// Definitions come back in registration order.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from a tool list; later tools shadow earlier ones.
    pub fn from_tools(tools: impl IntoIterator<Item = Arc<dyn Tool>>) -> Self {
        let mut registry = Self::new();
        for tool in tools {
            registry.register(tool);
        }
        registry
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        match self.index.get(&name) {
            Some(&slot) => self.tools[slot] = tool,
            None => {
                self.index.insert(name, self.tools.len());
                self.tools.push(tool);
            }
        }
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.index.get(name).map(|&slot| Arc::clone(&self.tools[slot]))
    }

    /// Get all tool definitions (for sending to the model).
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.to_definition()).collect()
    }

    /// Execute a tool call.
    pub async fn execute(&self, call: &ToolCall) -> Result<ToolResult, ToolError> {
        let tool = self
            .get(&call.name)
            .ok_or_else(|| ToolError::NotFound(call.name.clone()))?;
        tool.execute(call.arguments.clone()).await
    }

    /// List all registered tool names.
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
