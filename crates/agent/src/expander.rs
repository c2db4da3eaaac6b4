//! Instruction templates: `${...}` spans evaluated against an agent's tools.

use std::sync::Arc;

use cadre_core::CancellationToken;
use cadre_core::tool::ToolSet;
use cadre_tools::{ScriptEngine, ScriptError};
use tracing::debug;

const TEMPLATE_MARKER: &str = "${";

/// Expands instruction templates in a fresh sandbox per call.
#[derive(Debug, Clone, Copy, Default)]
pub struct InstructionExpander {
    engine: ScriptEngine,
}

impl InstructionExpander {
    pub fn new(engine: ScriptEngine) -> Self {
        Self { engine }
    }

    pub fn needs_expansion(instruction: &str) -> bool {
        instruction.contains(TEMPLATE_MARKER)
    }

    /// Text without a template marker comes back unchanged and never touches
    /// the sandbox or the toolsets.
    pub async fn expand(
        &self,
        instruction: &str,
        toolsets: &[Arc<dyn ToolSet>],
        cancel: &CancellationToken,
    ) -> Result<String, ScriptError> {
        if !Self::needs_expansion(instruction) {
            return Ok(instruction.to_string());
        }
        debug!(toolsets = toolsets.len(), "Expanding instruction template");
        self.engine.expand_template(instruction, toolsets, cancel).await
    }
}
