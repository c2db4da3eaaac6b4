//! Runtime events: what the agent loop tells the outside world.
//!
//! Events are published on a [`Hub<RuntimeEvent>`](crate::pubsub::Hub) so
//! surface layers (CLI rendering, logs) can react without coupling to the
//! loop itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::provider::Usage;

/// All events emitted by a runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuntimeEvent {
    /// A user message was appended to the session
    UserMessage {
        session_id: String,
        content: String,
    },

    /// The loop started working on a user message
    StreamStarted {
        session_id: String,
        agent: String,
        timestamp: DateTime<Utc>,
    },

    /// The active agent produced assistant text
    AgentChoice { agent: String, content: String },

    /// The model requested a tool call
    ToolCall {
        agent: String,
        tool_call_id: String,
        tool_name: String,
        arguments: String,
    },

    /// A tool call finished
    ToolCallResponse {
        agent: String,
        tool_call_id: String,
        tool_name: String,
        output: String,
        is_error: bool,
    },

    /// Control moved to another agent for the rest of the run
    Handoff { from: String, to: String },

    /// A task was delegated to a sub-agent
    TransferTask {
        from: String,
        to: String,
        task: String,
    },

    /// Token usage for one model call plus the session totals
    TokenUsage {
        session_id: String,
        agent: String,
        usage: Usage,
        session_input_tokens: u64,
        session_output_tokens: u64,
        session_cost: f64,
    },

    /// A non-fatal issue drained from an agent
    Warning { agent: String, message: String },

    /// A fatal-to-turn error
    Error { agent: String, message: String },

    /// The iteration cap stopped the loop
    MaxIterationsReached { agent: String, max_iterations: u32 },

    /// A summary checkpoint was added to the session
    SessionSummary { session_id: String, summary: String },

    /// The loop finished
    StreamStopped {
        session_id: String,
        agent: String,
        timestamp: DateTime<Utc>,
    },
}

impl RuntimeEvent {
    /// The serialized tag, used as a dispatch key by renderers.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UserMessage { .. } => "user_message",
            Self::StreamStarted { .. } => "stream_started",
            Self::AgentChoice { .. } => "agent_choice",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolCallResponse { .. } => "tool_call_response",
            Self::Handoff { .. } => "handoff",
            Self::TransferTask { .. } => "transfer_task",
            Self::TokenUsage { .. } => "token_usage",
            Self::Warning { .. } => "warning",
            Self::Error { .. } => "error",
            Self::MaxIterationsReached { .. } => "max_iterations_reached",
            Self::SessionSummary { .. } => "session_summary",
            Self::StreamStopped { .. } => "stream_stopped",
        }
    }
}
