//! Shared test helpers: scripted providers, counting tools, mock toolsets.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cadre_core::error::{ProviderError, ToolError};
use cadre_core::message::{Message, MessageToolCall};
use cadre_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use cadre_core::tool::{StaticToolSet, Tool, ToolResult, ToolSet};

type Handler = Arc<dyn Fn(&serde_json::Value) -> String + Send + Sync>;

/// A tool that records how often it ran.
#[derive(Clone)]
pub struct CountingTool {
    name: String,
    description: String,
    handler: Handler,
    calls: Arc<AtomicUsize>,
}

impl CountingTool {
    pub fn new(
        name: &str,
        handler: impl Fn(&serde_json::Value) -> String + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.to_string(),
            description: format!("{name} tool"),
            handler: Arc::new(handler),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Tool for CountingTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ToolResult::ok((self.handler)(&arguments)))
    }
}

pub fn toolset(name: &str, tools: Vec<CountingTool>) -> Arc<dyn ToolSet> {
    let tools = tools
        .into_iter()
        .map(|t| Arc::new(t) as Arc<dyn Tool>)
        .collect();
    Arc::new(StaticToolSet::new(name, tools))
}

/// A toolset whose listing always fails.
pub fn failing_toolset(name: &str) -> Arc<dyn ToolSet> {
    Arc::new(MockToolSet::new(name).fail_list())
}

/// A toolset with configurable lifecycle failures and call counters.
#[derive(Default)]
pub struct MockToolSet {
    name: String,
    tools: Vec<Arc<dyn Tool>>,
    instructions: String,
    fail_start: bool,
    fail_list: bool,
    fail_stop: bool,
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
}

impl MockToolSet {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_tool(mut self, tool: CountingTool) -> Self {
        self.tools.push(Arc::new(tool));
        self
    }

    pub fn with_instructions(mut self, instructions: &str) -> Self {
        self.instructions = instructions.to_string();
        self
    }

    pub fn fail_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    pub fn fail_list(mut self) -> Self {
        self.fail_list = true;
        self
    }

    pub fn fail_stop(mut self) -> Self {
        self.fail_stop = true;
        self
    }

    fn unavailable(&self, reason: &str) -> ToolError {
        ToolError::Unavailable {
            toolset: self.name.clone(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl ToolSet for MockToolSet {
    fn name(&self) -> &str {
        &self.name
    }

    async fn tools(&self) -> Result<Vec<Arc<dyn Tool>>, ToolError> {
        if self.fail_list {
            return Err(self.unavailable("listing failed"));
        }
        Ok(self.tools.clone())
    }

    fn instructions(&self) -> String {
        self.instructions.clone()
    }

    async fn start(&self) -> Result<(), ToolError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail_start {
            return Err(self.unavailable("start failed"));
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), ToolError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        if self.fail_stop {
            return Err(self.unavailable("stop failed"));
        }
        Ok(())
    }
}

/// A provider that returns scripted responses in order and records every
/// request it saw.
pub struct ScriptedProvider {
    model: String,
    responses: Mutex<VecDeque<ProviderResponse>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<ProviderResponse>) -> Self {
        Self::with_model("mock-model", responses)
    }

    pub fn with_model(model: &str, responses: Vec<ProviderResponse>) -> Self {
        Self {
            model: model.to_string(),
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn provider_name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.requests.lock().unwrap().push(request);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ProviderError::ApiError {
                status_code: 500,
                message: "no more scripted responses".into(),
            })
    }
}

pub fn usage() -> Usage {
    Usage {
        input_tokens: 10,
        output_tokens: 5,
        cost: 0.25,
    }
}

pub fn text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(text),
        usage: Some(usage()),
        model: "mock-model".into(),
    }
}

pub fn tool_call_response(calls: Vec<MessageToolCall>) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant_with_tool_calls("", calls),
        usage: Some(usage()),
        model: "mock-model".into(),
    }
}

pub fn tool_call(id: &str, name: &str, args: serde_json::Value) -> MessageToolCall {
    MessageToolCall {
        id: id.to_string(),
        name: name.to_string(),
        arguments: args.to_string(),
    }
}
