//! Code mode: expose a group of toolsets through one scripting tool.
//!
//! Instead of one round trip per tool call, the model submits a script that
//! calls the wrapped tools as functions. Script failures come back as the
//! result value so the model can correct itself on the next turn.

use std::sync::Arc;

use async_trait::async_trait;
use cadre_core::error::ToolError;
use cadre_core::tool::{ElicitationHandler, OAuthSuccessHandler, Tool, ToolResult, ToolSet};
use cadre_core::CancellationToken;
use tracing::debug;

use crate::script::{ScriptEngine, ScriptError};

pub const RUN_TOOLS_WITH_JAVASCRIPT: &str = "run_tools_with_javascript";

pub struct CodeModeToolSet {
    toolsets: Vec<Arc<dyn ToolSet>>,
    engine: ScriptEngine,
    cancel: CancellationToken,
}

impl CodeModeToolSet {
    pub fn new(toolsets: Vec<Arc<dyn ToolSet>>, engine: ScriptEngine) -> Self {
        Self {
            toolsets,
            engine,
            cancel: CancellationToken::new(),
        }
    }

    /// Scripts started by this toolset stop when `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Describe every wrapped tool as a function signature.
    async fn describe(&self) -> Result<String, ToolError> {
        let mut description = String::from(
            "Run a JavaScript script that orchestrates several tool calls in one step. \
             Each tool below is a synchronous global function taking one object argument \
             and returning the tool's text output. Use `return` to produce the result; \
             console.log output is returned as stdout.\n\nAvailable functions:\n",
        );
        for toolset in &self.toolsets {
            for tool in toolset.tools().await? {
                description.push_str(&format!(
                    "- {}(args): {} Parameters: {}\n",
                    tool.name(),
                    tool.description(),
                    tool.parameters_schema()
                ));
            }
        }
        Ok(description)
    }
}

#[async_trait]
impl ToolSet for CodeModeToolSet {
    fn name(&self) -> &str {
        "code_mode"
    }

    async fn tools(&self) -> Result<Vec<Arc<dyn Tool>>, ToolError> {
        let tool = RunToolsWithJavascript {
            description: self.describe().await?,
            toolsets: self.toolsets.clone(),
            engine: self.engine,
            cancel: self.cancel.clone(),
        };
        Ok(vec![Arc::new(tool)])
    }

    fn instructions(&self) -> String {
        self.toolsets
            .iter()
            .map(|t| t.instructions())
            .filter(|i| !i.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    async fn start(&self) -> Result<(), ToolError> {
        for toolset in &self.toolsets {
            toolset.start().await?;
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), ToolError> {
        for toolset in &self.toolsets {
            toolset.stop().await?;
        }
        Ok(())
    }

    fn set_elicitation_handler(&self, handler: ElicitationHandler) {
        for toolset in &self.toolsets {
            toolset.set_elicitation_handler(Arc::clone(&handler));
        }
    }

    fn set_oauth_success_handler(&self, handler: OAuthSuccessHandler) {
        for toolset in &self.toolsets {
            toolset.set_oauth_success_handler(Arc::clone(&handler));
        }
    }
}

struct RunToolsWithJavascript {
    description: String,
    toolsets: Vec<Arc<dyn ToolSet>>,
    engine: ScriptEngine,
    cancel: CancellationToken,
}

#[async_trait]
impl Tool for RunToolsWithJavascript {
    fn name(&self) -> &str {
        RUN_TOOLS_WITH_JAVASCRIPT
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "script": {
                    "type": "string",
                    "description": "JavaScript body to run; may use top-level return"
                }
            },
            "required": ["script"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let script = arguments["script"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'script' argument".into()))?;

        // Cancel in-flight bridge calls if this call is dropped.
        let cancel = self.cancel.child_token();
        let _guard = cancel.clone().drop_guard();

        debug!(bytes = script.len(), "Running code mode script");
        let output = match self.engine.run(script, &self.toolsets, &cancel).await {
            Ok(output) => output,
            Err(ScriptError::Cancelled) => {
                return Err(ToolError::Cancelled(RUN_TOOLS_WITH_JAVASCRIPT.into()));
            }
            Err(e) => return Err(ToolError::failed(RUN_TOOLS_WITH_JAVASCRIPT, e)),
        };

        let data = serde_json::to_value(&output)
            .map_err(|e| ToolError::failed(RUN_TOOLS_WITH_JAVASCRIPT, e))?;
        Ok(ToolResult {
            success: true,
            output: data.to_string(),
            data: Some(data),
        })
    }
}
