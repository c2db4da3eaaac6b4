//! Closure-backed tools and toolsets for tests.

use std::sync::Arc;

use async_trait::async_trait;
use cadre_core::error::ToolError;
use cadre_core::tool::{StaticToolSet, Tool, ToolResult, ToolSet};

type Handler = Arc<dyn Fn(serde_json::Value) -> Result<ToolResult, ToolError> + Send + Sync>;

pub struct FnTool {
    name: String,
    schema: serde_json::Value,
    handler: Handler,
}

impl FnTool {
    pub fn new(
        name: &str,
        handler: impl Fn(serde_json::Value) -> Result<ToolResult, ToolError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.to_string(),
            schema: serde_json::json!({"type": "object", "properties": {}}),
            handler: Arc::new(handler),
        }
    }

    pub fn with_schema(mut self, schema: serde_json::Value) -> Self {
        self.schema = schema;
        self
    }
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "test tool"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        self.schema.clone()
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        (self.handler)(arguments)
    }
}

pub fn toolset(name: &str, tools: Vec<FnTool>) -> Arc<dyn ToolSet> {
    let tools = tools
        .into_iter()
        .map(|t| Arc::new(t) as Arc<dyn Tool>)
        .collect();
    Arc::new(StaticToolSet::new(name, tools))
}

/// A toolset whose listing always fails.
pub struct FailingToolSet {
    name: String,
}

impl FailingToolSet {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl ToolSet for FailingToolSet {
    fn name(&self) -> &str {
        &self.name
    }

    async fn tools(&self) -> Result<Vec<Arc<dyn Tool>>, ToolError> {
        Err(ToolError::Unavailable {
            toolset: self.name.clone(),
            reason: "listing failed".into(),
        })
    }
}
