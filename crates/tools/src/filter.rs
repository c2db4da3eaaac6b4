//! Toolset wrapper applying per-agent configuration: a tool allowlist and
//! an instructions override.

use std::sync::Arc;

use async_trait::async_trait;
use cadre_core::error::ToolError;
use cadre_core::tool::{ElicitationHandler, OAuthSuccessHandler, Tool, ToolSet};

pub struct FilteredToolSet {
    inner: Arc<dyn ToolSet>,
    allowed: Vec<String>,
    instructions: Option<String>,
}

impl FilteredToolSet {
    /// An empty allowlist keeps every tool.
    pub fn new(inner: Arc<dyn ToolSet>, allowed: Vec<String>) -> Self {
        Self {
            inner,
            allowed,
            instructions: None,
        }
    }

    pub fn with_instructions(mut self, instructions: Option<String>) -> Self {
        self.instructions = instructions;
        self
    }
}

#[async_trait]
impl ToolSet for FilteredToolSet {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn tools(&self) -> Result<Vec<Arc<dyn Tool>>, ToolError> {
        let tools = self.inner.tools().await?;
        if self.allowed.is_empty() {
            return Ok(tools);
        }
        Ok(tools
            .into_iter()
            .filter(|t| self.allowed.iter().any(|a| a == t.name()))
            .collect())
    }

    fn instructions(&self) -> String {
        match &self.instructions {
            Some(instructions) => instructions.clone(),
            None => self.inner.instructions(),
        }
    }

    async fn start(&self) -> Result<(), ToolError> {
        self.inner.start().await
    }

    async fn stop(&self) -> Result<(), ToolError> {
        self.inner.stop().await
    }

    fn set_elicitation_handler(&self, handler: ElicitationHandler) {
        self.inner.set_elicitation_handler(handler);
    }

    fn set_oauth_success_handler(&self, handler: OAuthSuccessHandler) {
        self.inner.set_oauth_success_handler(handler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{FnTool, toolset};
    use cadre_core::ToolResult;

    fn inner() -> Arc<dyn ToolSet> {
        toolset(
            "inner",
            vec![
                FnTool::new("keep", |_| Ok(ToolResult::ok("k"))),
                FnTool::new("drop", |_| Ok(ToolResult::ok("d"))),
            ],
        )
    }

    #[tokio::test]
    async fn allowlist_filters_tools() {
        let set = FilteredToolSet::new(inner(), vec!["keep".into()]);
        let names: Vec<_> = set
            .tools()
            .await
            .unwrap()
            .iter()
            .map(|t| t.name().to_string())
            .collect();
        assert_eq!(names, vec!["keep"]);
        assert_eq!(set.name(), "inner");
    }

    #[tokio::test]
    async fn instructions_override() {
        let set = FilteredToolSet::new(inner(), vec![])
            .with_instructions(Some("Dummy fetch tool instruction".into()));
        assert_eq!(set.tools().await.unwrap().len(), 2);
        assert_eq!(set.instructions(), "Dummy fetch tool instruction");
    }
}
