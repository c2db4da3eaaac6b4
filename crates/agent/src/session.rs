//! Sessions: conversation history as a tree of messages, sub-sessions and
//! summary checkpoints, and the per-turn message list built from it.
//!
//! Building the turn context never fails. A prompt file that cannot be read
//! or a peer whose tools cannot be listed is logged and left out.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use cadre_core::CancellationToken;
use cadre_core::message::{Message, MessagePart, Role};
use cadre_core::provider::Usage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::agent::Agent;
use crate::team::Team;

const SUMMARY_PREFIX: &str = "Session Summary: ";

/// One history entry. Exactly one of message, sub-session or summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Item {
    Message(SessionMessage),
    /// A complete nested session from a task transfer
    SubSession(Session),
    /// Compaction checkpoint: everything before it is replaced by this text
    Summary(String),
}

impl Item {
    pub fn is_message(&self) -> bool {
        matches!(self, Item::Message(_))
    }

    pub fn is_sub_session(&self) -> bool {
        matches!(self, Item::SubSession(_))
    }

    pub fn as_message(&self) -> Option<&SessionMessage> {
        match self {
            Item::Message(message) => Some(message),
            _ => None,
        }
    }

    pub fn summary(&self) -> Option<&str> {
        match self {
            Item::Summary(summary) if !summary.is_empty() => Some(summary),
            _ => None,
        }
    }
}

fn is_false(value: &bool) -> bool {
    !value
}

/// A chat message plus the agent that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMessage {
    #[serde(default)]
    pub agent_filename: String,

    #[serde(default)]
    pub agent_name: String,

    pub message: Message,

    /// Synthetic messages that are never shown to the user
    #[serde(default, skip_serializing_if = "is_false")]
    pub implicit: bool,
}

impl SessionMessage {
    pub fn user_message(agent_filename: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            agent_filename: agent_filename.into(),
            agent_name: String::new(),
            message: Message::user(content),
            implicit: false,
        }
    }

    /// A multi-part user message; falls back to plain text when `parts` is empty.
    pub fn user_message_with_parts(
        agent_filename: impl Into<String>,
        content: impl Into<String>,
        parts: Vec<MessagePart>,
    ) -> Self {
        let message = if parts.is_empty() {
            Message::user(content)
        } else {
            Message::user_parts(parts)
        };
        Self {
            agent_filename: agent_filename.into(),
            agent_name: String::new(),
            message,
            implicit: false,
        }
    }

    pub fn implicit_user_message(
        agent_filename: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            implicit: true,
            ..Self::user_message(agent_filename, content)
        }
    }

    pub fn agent_message(agent: &Agent, message: Message) -> Self {
        Self {
            agent_filename: String::new(),
            agent_name: agent.name().to_string(),
            message,
            implicit: false,
        }
    }

    pub fn system_message(content: impl Into<String>) -> Self {
        Self {
            agent_filename: String::new(),
            agent_name: String::new(),
            message: Message::system(content),
            implicit: false,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Conversation state for one run, appended to by the runtime loop only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,

    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub messages: Vec<Item>,

    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub tools_approved: bool,

    /// Base directory for filesystem-aware tools
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,

    #[serde(default = "default_true")]
    pub send_user_message: bool,

    /// Model calls allowed per run; 0 means no limit
    #[serde(default)]
    pub max_iterations: u32,

    #[serde(default)]
    pub input_tokens: u64,

    #[serde(default)]
    pub output_tokens: u64,

    #[serde(default)]
    pub cost: f64,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        debug!(session_id = %id, "Creating new session");
        Self {
            id,
            title: String::new(),
            messages: Vec::new(),
            created_at: Utc::now(),
            tools_approved: false,
            working_dir: None,
            send_user_message: true,
            max_iterations: 0,
            input_tokens: 0,
            output_tokens: 0,
            cost: 0.0,
        }
    }

    pub fn with_user_message(
        mut self,
        agent_filename: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        self.add_message(SessionMessage::user_message(agent_filename, content));
        self
    }

    pub fn with_implicit_user_message(
        mut self,
        agent_filename: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        self.add_message(SessionMessage::implicit_user_message(agent_filename, content));
        self
    }

    pub fn with_system_message(mut self, content: impl Into<String>) -> Self {
        self.add_message(SessionMessage::system_message(content));
        self
    }

    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_tools_approved(mut self, approved: bool) -> Self {
        self.tools_approved = approved;
        self
    }

    pub fn with_send_user_message(mut self, send: bool) -> Self {
        self.send_user_message = send;
        self
    }

    pub fn add_message(&mut self, message: SessionMessage) {
        self.messages.push(Item::Message(message));
    }

    pub fn add_sub_session(&mut self, sub_session: Session) {
        self.messages.push(Item::SubSession(sub_session));
    }

    pub fn add_summary(&mut self, summary: impl Into<String>) {
        self.messages.push(Item::Summary(summary.into()));
    }

    pub fn add_usage(&mut self, usage: &Usage) {
        self.input_tokens += usage.input_tokens;
        self.output_tokens += usage.output_tokens;
        self.cost += usage.cost;
    }

    /// Directories tools may treat as safe.
    pub fn allowed_directories(&self) -> Vec<PathBuf> {
        self.working_dir.iter().cloned().collect()
    }

    /// Every non-system message, with sub-sessions flattened in place.
    pub fn all_messages(&self) -> Vec<SessionMessage> {
        let mut messages = Vec::new();
        for item in &self.messages {
            match item {
                Item::Message(m) if m.message.role != Role::System => messages.push(m.clone()),
                Item::SubSession(sub) => messages.extend(sub.all_messages()),
                _ => {}
            }
        }
        messages
    }

    pub fn last_assistant_message_content(&self) -> String {
        self.all_messages()
            .iter()
            .rev()
            .find(|m| m.message.role == Role::Assistant)
            .map(|m| m.message.content.trim().to_string())
            .unwrap_or_default()
    }

    /// The agent file of the most recent message that names one, searching
    /// sub-sessions too.
    pub fn most_recent_agent_filename(&self) -> Option<&str> {
        self.messages.iter().rev().find_map(|item| match item {
            Item::Message(m) if !m.agent_filename.is_empty() => Some(m.agent_filename.as_str()),
            Item::SubSession(sub) => sub.most_recent_agent_filename(),
            _ => None,
        })
    }

    /// Build the bounded message list `agent` sees on this turn.
    ///
    /// `default_max_items` applies when the agent sets no history bound.
    pub async fn get_messages(
        &self,
        team: &Team,
        agent: &Agent,
        default_max_items: usize,
        cancel: &CancellationToken,
    ) -> Vec<Message> {
        debug!(agent = agent.name(), session_id = %self.id, "Getting messages for agent");

        let mut messages = Vec::new();

        let peers = team.peers_of(agent);
        if !peers.is_empty() {
            messages.push(Message::system(team_prompt(&peers)));
            let peer_tools = peer_tools_info(&peers).await;
            if !peer_tools.is_empty() {
                messages.push(Message::system(peer_tools));
            }
        }

        let mut content = agent.instruction(cancel).await;

        if agent.add_date() {
            content.push_str(&format!(
                "\n\nToday's date: {}",
                Utc::now().format("%Y-%m-%d")
            ));
        }

        let working_dir = match &self.working_dir {
            Some(dir) => Some(dir.clone()),
            None => std::env::current_dir()
                .inspect_err(|e| {
                    error!(error = %e, "Getting current working directory for environment info")
                })
                .ok(),
        };
        if let Some(dir) = &working_dir {
            if agent.add_environment_info() {
                content.push_str("\n\n");
                content.push_str(&environment_info(dir));
            }
            for file in agent.add_prompt_files() {
                match read_prompt_file(dir, file) {
                    Ok(extra) if !extra.trim().is_empty() => {
                        content.push_str("\n\n");
                        content.push_str(&extra);
                    }
                    Ok(_) => {}
                    Err(e) => error!(file = %file, error = %e, "Reading prompt file"),
                }
            }
        }

        messages.push(Message::system(content));

        for instructions in agent.toolset_instructions() {
            messages.push(Message::system(instructions));
        }

        let last_summary = self
            .messages
            .iter()
            .rposition(|item| item.summary().is_some());
        if let Some(summary) = last_summary.and_then(|i| self.messages[i].summary()) {
            messages.push(Message::system(format!("{SUMMARY_PREFIX}{summary}")));
        }

        let start = last_summary.map_or(0, |i| i + 1);
        messages.extend(
            self.messages[start..]
                .iter()
                .filter_map(Item::as_message)
                .map(|m| m.message.clone()),
        );

        let max_items = match agent.num_history_items() {
            0 => default_max_items,
            n => n,
        };
        let total = messages.len();
        let trimmed = trim_messages(messages, max_items);

        let system_count = trimmed.iter().filter(|m| m.is_system()).count();
        debug!(
            agent = agent.name(),
            session_id = %self.id,
            total_messages = total,
            trimmed_total = trimmed.len(),
            system_messages = system_count,
            conversation_messages = trimmed.len() - system_count,
            max_history_items = max_items,
            "Retrieved messages for agent"
        );

        trimmed
    }
}

fn team_prompt(peers: &[Arc<Agent>]) -> String {
    let mut roster = String::new();
    let mut ids = Vec::with_capacity(peers.len());
    for peer in peers {
        roster.push_str(&format!(
            "ID: {0} | Name: {0} | Description: {1}\n",
            peer.name(),
            peer.description()
        ));
        ids.push(peer.name());
    }

    format!(
        "You are part of a multi-agent team. Your goal is to answer the user query in the most helpful way possible.\n\n\
         Available agents in your team:\n{roster}\n\
         You can hand off the conversation to any of these agents at any time by using the `handoff` function with their ID. \
         The valid agent IDs are: {}.\n\n\
         When to hand off:\n\
         - If another agent's description indicates they are better suited for the current task or question\n\
         - If any of the tools of the agent indicate that this agent is able to respond correctly\n\
         - If the user explicitly asks for a specific agent\n\
         - If you need specialized capabilities that another agent provides\n\n\
         If you are the best agent to handle the current request based on your capabilities and description, respond directly. \
         When transferring to another agent, use only the function call without generating additional text.\n\n\
         Once you are done, hand off the conversation to the root agent.",
        ids.join(", ")
    )
}

/// Describe the tools other agents hold so this agent knows whom to hand
/// off to. Agents without tools are left out.
async fn peer_tools_info(peers: &[Arc<Agent>]) -> String {
    let mut sections = String::new();
    for peer in peers {
        let tools = peer.tools().await;
        if tools.is_empty() {
            continue;
        }
        sections.push_str(&format!("### Agent: {}\n", peer.name()));
        if !peer.description().is_empty() {
            sections.push_str(&format!("Description: {}\n", peer.description()));
        }
        sections.push_str("Available tools:\n");
        for tool in tools {
            if tool.description().is_empty() {
                sections.push_str(&format!("- **{}**\n", tool.name()));
            } else {
                sections.push_str(&format!("- **{}**: {}\n", tool.name(), tool.description()));
            }
        }
        sections.push('\n');
    }

    if sections.is_empty() {
        return sections;
    }
    format!(
        "## Other Agents' Capabilities\n\n\
         The following agents have access to specialized tools. \
         DO NOT attempt to call these tools directly - they are not available to you. \
         Instead, use the 'handoff' function to transfer the conversation to the appropriate agent when their capabilities are needed.\n\n\
         {sections}"
    )
}

fn environment_info(working_dir: &Path) -> String {
    let is_git_repo = working_dir.ancestors().any(|dir| dir.join(".git").exists());
    format!(
        "Here is useful information about the environment you are running in:\n\
         <env>\n\
         Working directory: {}\n\
         Is directory a git repo: {}\n\
         Operating System: {}\n\
         CPU Architecture: {}\n\
         </env>",
        working_dir.display(),
        if is_git_repo { "Yes" } else { "No" },
        std::env::consts::OS,
        std::env::consts::ARCH,
    )
}

/// Read `name` from the working directory or the closest ancestor holding it.
fn read_prompt_file(working_dir: &Path, name: &str) -> std::io::Result<String> {
    match working_dir
        .ancestors()
        .map(|dir| dir.join(name))
        .find(|path| path.is_file())
    {
        Some(path) => std::fs::read_to_string(path),
        None => Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{name} not found from {}", working_dir.display()),
        )),
    }
}

/// Bound the number of conversation messages to `max_items`, dropping the
/// oldest first. System messages are always kept and come first in the
/// result when trimming happens. A tool reply whose assistant call was
/// dropped is dropped too.
pub fn trim_messages(messages: Vec<Message>, max_items: usize) -> Vec<Message> {
    let conversation_len = messages.iter().filter(|m| !m.is_system()).count();
    if conversation_len <= max_items {
        return messages;
    }

    let (system, conversation): (Vec<Message>, Vec<Message>) =
        messages.into_iter().partition(Message::is_system);

    let to_remove = conversation_len - max_items;
    let removed_calls: HashSet<String> = conversation[..to_remove]
        .iter()
        .filter(|m| m.role == Role::Assistant)
        .flat_map(|m| m.tool_calls.iter().map(|tc| tc.id.clone()))
        .collect();

    let mut result = system;
    result.reserve(max_items);
    for message in conversation.into_iter().skip(to_remove) {
        let orphaned = message.role == Role::Tool
            && message
                .tool_call_id
                .as_ref()
                .is_some_and(|id| removed_calls.contains(id));
        if orphaned {
            debug!(tool_call_id = ?message.tool_call_id, "Dropping tool reply whose call was trimmed");
            continue;
        }
        result.push(message);
    }
    result
}
