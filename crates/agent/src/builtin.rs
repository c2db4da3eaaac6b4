//! Tools the runtime handles itself: delegating a task and handing off.
//!
//! Only their definitions are sent to the model; calls are intercepted by
//! name in the runtime loop.

use std::sync::Arc;

use cadre_core::provider::ToolDefinition;
use serde::Deserialize;

use crate::agent::Agent;

pub const TRANSFER_TASK: &str = "transfer_task";
pub const HANDOFF: &str = "handoff";

pub fn is_builtin(name: &str) -> bool {
    name == TRANSFER_TASK || name == HANDOFF
}

#[derive(Debug, Deserialize)]
pub struct TransferTaskArgs {
    pub agent: String,
    pub task: String,
    #[serde(default)]
    pub expected_output: String,
}

#[derive(Debug, Deserialize)]
pub struct HandoffArgs {
    pub agent: String,
}

fn roster(agents: &[Arc<Agent>]) -> String {
    agents
        .iter()
        .map(|a| {
            if a.description().is_empty() {
                format!("- {}", a.name())
            } else {
                format!("- {}: {}", a.name(), a.description())
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn transfer_task_definition(sub_agents: &[Arc<Agent>]) -> ToolDefinition {
    ToolDefinition {
        name: TRANSFER_TASK.into(),
        description: format!(
            "Delegate a self-contained task to a sub-agent and get its final answer back. \
             Available sub-agents:\n{}",
            roster(sub_agents)
        ),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "agent": {"type": "string", "description": "Name of the sub-agent"},
                "task": {"type": "string", "description": "What the sub-agent should do"},
                "expected_output": {"type": "string", "description": "What the answer should contain"}
            },
            "required": ["agent", "task"]
        }),
    }
}

pub fn handoff_definition(targets: &[Arc<Agent>]) -> ToolDefinition {
    ToolDefinition {
        name: HANDOFF.into(),
        description: format!(
            "Hand the conversation over to another agent of the team. \
             Valid agents:\n{}",
            roster(targets)
        ),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "agent": {"type": "string", "description": "ID of the agent to hand off to"}
            },
            "required": ["agent"]
        }),
    }
}

/// First message of a delegated sub-session.
pub fn transfer_prompt(args: &TransferTaskArgs) -> String {
    let mut prompt = format!(
        "You are a member of a team of agents. Your goal is to complete the following task:\n\n<task>\n{}\n</task>",
        args.task
    );
    if !args.expected_output.is_empty() {
        prompt.push_str(&format!(
            "\n\n<expected_output>\n{}\n</expected_output>",
            args.expected_output
        ));
    }
    prompt
}
