//! The agentic loop.
//!
//! Each iteration builds the turn context from the session, calls the active
//! agent's model, records the answer and dispatches tool calls. The loop ends
//! when the model answers without tool calls, when the iteration cap is hit
//! or when the run is cancelled. Everything notable is published on the
//! runtime's event hub.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use cadre_config::{DEFAULT_MAX_HISTORY_ITEMS, RuntimeConfig};
use cadre_core::event::RuntimeEvent;
use cadre_core::message::{Message, MessageToolCall, Role};
use cadre_core::provider::{ProviderRequest, ProviderResponse, ToolDefinition};
use cadre_core::pubsub::Hub;
use cadre_core::tool::{ToolCall, ToolRegistry};
use cadre_core::CancellationToken;
use chrono::Utc;
use futures::future::BoxFuture;
use tracing::{debug, info, warn};

use crate::agent::Agent;
use crate::builtin::{self, HandoffArgs, TransferTaskArgs};
use crate::error::RuntimeError;
use crate::session::{Item, Session, SessionMessage};
use crate::team::Team;

const SUMMARY_PROMPT: &str = "Summarize the conversation above so it can replace the history. \
Keep decisions, open questions, file names and anything the user asked to remember. \
Answer with the summary only.";

/// Drives a team over a session.
#[async_trait]
pub trait Runtime: Send + Sync {
    /// The agent that answers the next user message.
    fn current_agent(&self) -> Arc<Agent>;

    /// Make `name` the active agent.
    fn set_current_agent(&self, name: &str) -> Result<(), RuntimeError>;

    fn events(&self) -> &Hub<RuntimeEvent>;

    /// Run the loop until the active agent answers; returns that answer.
    async fn run(
        &self,
        session: &mut Session,
        cancel: &CancellationToken,
    ) -> Result<String, RuntimeError>;

    /// Replace the visible history with a summary checkpoint.
    async fn summarize(
        &self,
        session: &mut Session,
        cancel: &CancellationToken,
    ) -> Result<String, RuntimeError>;
}

/// A runtime that calls providers and tools in-process.
pub struct LocalRuntime {
    team: Arc<Team>,
    current: Mutex<Arc<Agent>>,
    events: Hub<RuntimeEvent>,
    max_history_items: usize,
    agent_filename: String,
}

/// What one loop run produced.
struct LoopOutcome {
    agent: Arc<Agent>,
    answer: String,
}

impl LocalRuntime {
    pub fn new(team: Arc<Team>) -> Self {
        let current = team.default_agent();
        Self {
            team,
            current: Mutex::new(current),
            events: Hub::new(),
            max_history_items: DEFAULT_MAX_HISTORY_ITEMS,
            agent_filename: String::new(),
        }
    }

    /// Take the history bound from the runtime config.
    pub fn with_config(mut self, config: &RuntimeConfig) -> Self {
        self.max_history_items = config.max_history_items;
        self
    }

    pub fn with_max_history_items(mut self, max: usize) -> Self {
        self.max_history_items = max;
        self
    }

    /// The team file messages of delegated sub-sessions are attributed to.
    pub fn with_agent_filename(mut self, filename: impl Into<String>) -> Self {
        self.agent_filename = filename.into();
        self
    }

    /// Publish on an existing hub instead of a private one.
    pub fn with_events(mut self, events: Hub<RuntimeEvent>) -> Self {
        self.events = events;
        self
    }

    pub fn team(&self) -> &Arc<Team> {
        &self.team
    }

    async fn publish(&self, cancel: &CancellationToken, event: RuntimeEvent) {
        self.events.publish(cancel, event).await;
    }

    async fn publish_warnings(&self, agent: &Agent, cancel: &CancellationToken) {
        for message in agent.drain_warnings() {
            warn!(agent = agent.name(), warning = %message, "Agent warning");
            self.publish(
                cancel,
                RuntimeEvent::Warning {
                    agent: agent.name().to_string(),
                    message,
                },
            )
            .await;
        }
    }

    /// Agents `agent` may hand the conversation to: its configured handoffs
    /// plus the team peers named in its roster prompt.
    fn handoff_targets(&self, agent: &Agent) -> Vec<Arc<Agent>> {
        let mut targets = self.team.handoffs_of(agent);
        for peer in self.team.peers_of(agent) {
            if !targets.iter().any(|t| t.name() == peer.name()) {
                targets.push(peer);
            }
        }
        targets
    }

    fn tool_definitions(&self, agent: &Agent, registry: &ToolRegistry) -> Vec<ToolDefinition> {
        let mut definitions: Vec<ToolDefinition> = registry
            .definitions()
            .into_iter()
            .filter(|def| {
                let shadowed = builtin::is_builtin(&def.name);
                if shadowed {
                    debug!(agent = agent.name(), tool = %def.name, "Toolset tool shadowed by built-in");
                }
                !shadowed
            })
            .collect();

        let sub_agents = self.team.sub_agents_of(agent);
        if !sub_agents.is_empty() {
            definitions.push(builtin::transfer_task_definition(&sub_agents));
        }
        let targets = self.handoff_targets(agent);
        if !targets.is_empty() {
            definitions.push(builtin::handoff_definition(&targets));
        }
        definitions
    }

    fn iteration_cap(session: &Session, agent: &Agent) -> u32 {
        match session.max_iterations {
            0 => agent.max_iterations(),
            n => n,
        }
    }

    async fn call_model(
        &self,
        agent: &Agent,
        request: ProviderRequest,
        cancel: &CancellationToken,
    ) -> Result<ProviderResponse, RuntimeError> {
        let model = agent
            .model()
            .ok_or_else(|| RuntimeError::NoModel(agent.name().to_string()))?;
        debug!(agent = agent.name(), model = %model.id(), messages = request.messages.len(), "Calling model");

        let result = tokio::select! {
            _ = cancel.cancelled() => return Err(RuntimeError::Cancelled),
            result = model.complete(request) => result,
        };

        match result {
            Ok(response) => Ok(response),
            Err(source) => {
                self.publish(
                    cancel,
                    RuntimeEvent::Error {
                        agent: agent.name().to_string(),
                        message: source.to_string(),
                    },
                )
                .await;
                Err(RuntimeError::Provider {
                    agent: agent.name().to_string(),
                    source,
                })
            }
        }
    }

    async fn record_usage(
        &self,
        session: &mut Session,
        agent: &Agent,
        response: &ProviderResponse,
        cancel: &CancellationToken,
    ) {
        let Some(usage) = &response.usage else {
            return;
        };
        session.add_usage(usage);
        self.publish(
            cancel,
            RuntimeEvent::TokenUsage {
                session_id: session.id.clone(),
                agent: agent.name().to_string(),
                usage: usage.clone(),
                session_input_tokens: session.input_tokens,
                session_output_tokens: session.output_tokens,
                session_cost: session.cost,
            },
        )
        .await;
    }

    /// One run of the loop for `agent` over `session`. Boxed because task
    /// transfers recurse into a nested session.
    fn run_loop<'a>(
        &'a self,
        agent: Arc<Agent>,
        session: &'a mut Session,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<LoopOutcome, RuntimeError>> {
        Box::pin(async move {
            let mut agent = agent;
            let mut answer = String::new();
            let mut iterations: u32 = 0;

            loop {
                if cancel.is_cancelled() {
                    return Err(RuntimeError::Cancelled);
                }

                let cap = Self::iteration_cap(session, &agent);
                if cap > 0 && iterations >= cap {
                    warn!(agent = agent.name(), session_id = %session.id, max_iterations = cap, "Max iterations reached");
                    self.publish(
                        cancel,
                        RuntimeEvent::MaxIterationsReached {
                            agent: agent.name().to_string(),
                            max_iterations: cap,
                        },
                    )
                    .await;
                    break;
                }
                iterations += 1;
                debug!(agent = agent.name(), session_id = %session.id, iteration = iterations, "Agent loop iteration");

                let messages = session
                    .get_messages(&self.team, &agent, self.max_history_items, cancel)
                    .await;
                let registry = ToolRegistry::from_tools(agent.tools().await);
                let tools = self.tool_definitions(&agent, &registry);
                self.publish_warnings(&agent, cancel).await;

                let response = self
                    .call_model(
                        &agent,
                        ProviderRequest {
                            messages,
                            tools,
                            max_tokens: None,
                        },
                        cancel,
                    )
                    .await?;
                self.record_usage(session, &agent, &response, cancel).await;

                let message = response.message;
                if !message.content.is_empty() {
                    self.publish(
                        cancel,
                        RuntimeEvent::AgentChoice {
                            agent: agent.name().to_string(),
                            content: message.content.clone(),
                        },
                    )
                    .await;
                }
                let tool_calls = message.tool_calls.clone();
                answer = message.content.trim().to_string();
                session.add_message(SessionMessage::agent_message(&agent, message));

                if tool_calls.is_empty() {
                    break;
                }

                let mut next_agent: Option<Arc<Agent>> = None;
                for (index, call) in tool_calls.iter().enumerate() {
                    let reply = match call.name.as_str() {
                        builtin::TRANSFER_TASK => {
                            self.transfer_task(&agent, call, session, cancel).await
                        }
                        builtin::HANDOFF => match self.handoff(&agent, call, cancel).await {
                            Ok((target, output)) => {
                                next_agent = Some(target);
                                Ok((output, false))
                            }
                            Err(output) => Ok((output, true)),
                        },
                        _ => self.dispatch(&agent, &registry, call, cancel).await,
                    };
                    let (output, is_error) = match reply {
                        Ok(reply) => reply,
                        Err(e) => {
                            answer_pending_calls(session, &agent, &tool_calls[index..], &e);
                            return Err(e);
                        }
                    };

                    self.publish(
                        cancel,
                        RuntimeEvent::ToolCallResponse {
                            agent: agent.name().to_string(),
                            tool_call_id: call.id.clone(),
                            tool_name: call.name.clone(),
                            output: output.clone(),
                            is_error,
                        },
                    )
                    .await;
                    session.add_message(SessionMessage::agent_message(
                        &agent,
                        Message::tool_result(&call.id, output),
                    ));
                }

                if let Some(target) = next_agent {
                    info!(from = agent.name(), to = target.name(), "Handing off conversation");
                    agent = target;
                }
            }

            Ok(LoopOutcome { agent, answer })
        })
    }

    async fn announce_call(&self, agent: &Agent, call: &MessageToolCall, cancel: &CancellationToken) {
        self.publish(
            cancel,
            RuntimeEvent::ToolCall {
                agent: agent.name().to_string(),
                tool_call_id: call.id.clone(),
                tool_name: call.name.clone(),
                arguments: call.arguments.clone(),
            },
        )
        .await;
    }

    /// Run a toolset tool. Failures are handed back to the model as the
    /// tool output so it can recover; only cancellation ends the run.
    async fn dispatch(
        &self,
        agent: &Agent,
        registry: &ToolRegistry,
        call: &MessageToolCall,
        cancel: &CancellationToken,
    ) -> Result<(String, bool), RuntimeError> {
        self.announce_call(agent, call, cancel).await;

        let arguments = match parse_arguments(&call.arguments) {
            Ok(arguments) => arguments,
            Err(e) => return Ok((format!("Error: invalid arguments: {e}"), true)),
        };
        let tool_call = ToolCall {
            id: call.id.clone(),
            name: call.name.clone(),
            arguments,
        };

        let started = std::time::Instant::now();
        let result = tokio::select! {
            _ = cancel.cancelled() => return Err(RuntimeError::Cancelled),
            result = registry.execute(&tool_call) => result,
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(result) => {
                debug!(agent = agent.name(), tool = %call.name, success = result.success, duration_ms, "Tool executed");
                Ok((result.output, !result.success))
            }
            Err(e) => {
                warn!(agent = agent.name(), tool = %call.name, error = %e, "Tool execution failed");
                self.publish(
                    cancel,
                    RuntimeEvent::Error {
                        agent: agent.name().to_string(),
                        message: e.to_string(),
                    },
                )
                .await;
                Ok((format!("Error: {e}"), true))
            }
        }
    }

    /// Run a sub-agent on a nested session and return its final answer.
    async fn transfer_task(
        &self,
        agent: &Arc<Agent>,
        call: &MessageToolCall,
        session: &mut Session,
        cancel: &CancellationToken,
    ) -> Result<(String, bool), RuntimeError> {
        self.announce_call(agent, call, cancel).await;

        let args: TransferTaskArgs = match serde_json::from_str(&call.arguments) {
            Ok(args) => args,
            Err(e) => return Ok((format!("Error: invalid arguments: {e}"), true)),
        };
        if !agent.sub_agents().iter().any(|name| *name == args.agent) {
            return Ok((
                format!(
                    "Error: agent '{}' is not a sub-agent of '{}'",
                    args.agent,
                    agent.name()
                ),
                true,
            ));
        }
        let sub_agent = self.team.agent(&args.agent)?;

        info!(from = agent.name(), to = sub_agent.name(), "Transferring task");
        self.publish(
            cancel,
            RuntimeEvent::TransferTask {
                from: agent.name().to_string(),
                to: sub_agent.name().to_string(),
                task: args.task.clone(),
            },
        )
        .await;

        let mut sub_session = Session::new()
            .with_title(format!("Task for {}", sub_agent.name()))
            .with_implicit_user_message(self.agent_filename.clone(), builtin::transfer_prompt(&args))
            .with_max_iterations(session.max_iterations)
            .with_tools_approved(session.tools_approved)
            .with_send_user_message(false);
        if let Some(dir) = &session.working_dir {
            sub_session = sub_session.with_working_dir(dir.clone());
        }

        self.run_loop(sub_agent, &mut sub_session, cancel).await?;

        let result = sub_session.last_assistant_message_content();
        session.input_tokens += sub_session.input_tokens;
        session.output_tokens += sub_session.output_tokens;
        session.cost += sub_session.cost;
        session.add_sub_session(sub_session);
        Ok((result, false))
    }

    /// Validate a handoff. `Err` carries the message handed back to the model.
    async fn handoff(
        &self,
        agent: &Arc<Agent>,
        call: &MessageToolCall,
        cancel: &CancellationToken,
    ) -> Result<(Arc<Agent>, String), String> {
        self.announce_call(agent, call, cancel).await;

        let args: HandoffArgs = serde_json::from_str(&call.arguments)
            .map_err(|e| format!("Error: invalid arguments: {e}"))?;
        let target = self
            .handoff_targets(agent)
            .into_iter()
            .find(|t| t.name() == args.agent)
            .ok_or_else(|| {
                format!(
                    "Error: agent '{}' cannot hand off to '{}'",
                    agent.name(),
                    args.agent
                )
            })?;

        self.publish(
            cancel,
            RuntimeEvent::Handoff {
                from: agent.name().to_string(),
                to: target.name().to_string(),
            },
        )
        .await;
        let output = format!(
            "The agent {} handed off the conversation to {}.",
            agent.name(),
            target.name()
        );
        Ok((target, output))
    }
}

/// Reply to every call in `calls` with `error` so the history never holds a
/// tool call without its result.
fn answer_pending_calls(
    session: &mut Session,
    agent: &Agent,
    calls: &[MessageToolCall],
    error: &RuntimeError,
) {
    warn!(agent = agent.name(), pending = calls.len(), error = %error, "Run ended with unanswered tool calls");
    for call in calls {
        session.add_message(SessionMessage::agent_message(
            agent,
            Message::tool_result(&call.id, format!("Error: {error}")),
        ));
    }
}

fn parse_arguments(raw: &str) -> Result<serde_json::Value, serde_json::Error> {
    if raw.trim().is_empty() {
        return Ok(serde_json::json!({}));
    }
    serde_json::from_str(raw)
}

/// The newest visible user message, if the session ends a turn with one.
fn pending_user_message(session: &Session) -> Option<&str> {
    match session.messages.last() {
        Some(Item::Message(m)) if m.message.role == Role::User && !m.implicit => {
            Some(m.message.content.as_str())
        }
        _ => None,
    }
}

#[async_trait]
impl Runtime for LocalRuntime {
    fn current_agent(&self) -> Arc<Agent> {
        Arc::clone(&self.current.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn set_current_agent(&self, name: &str) -> Result<(), RuntimeError> {
        let agent = self.team.agent(name)?;
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = agent;
        Ok(())
    }

    fn events(&self) -> &Hub<RuntimeEvent> {
        &self.events
    }

    async fn run(
        &self,
        session: &mut Session,
        cancel: &CancellationToken,
    ) -> Result<String, RuntimeError> {
        let agent = self.current_agent();
        info!(agent = agent.name(), session_id = %session.id, "Starting run");

        if let Some(content) = pending_user_message(session) {
            let content = content.to_string();
            self.publish(
                cancel,
                RuntimeEvent::UserMessage {
                    session_id: session.id.clone(),
                    content,
                },
            )
            .await;
        }
        self.publish(
            cancel,
            RuntimeEvent::StreamStarted {
                session_id: session.id.clone(),
                agent: agent.name().to_string(),
                timestamp: Utc::now(),
            },
        )
        .await;

        let result = self.run_loop(agent, session, cancel).await;

        let last_agent = match &result {
            Ok(outcome) => {
                *self.current.lock().unwrap_or_else(PoisonError::into_inner) =
                    Arc::clone(&outcome.agent);
                outcome.agent.name().to_string()
            }
            Err(_) => self.current_agent().name().to_string(),
        };
        self.publish(
            cancel,
            RuntimeEvent::StreamStopped {
                session_id: session.id.clone(),
                agent: last_agent,
                timestamp: Utc::now(),
            },
        )
        .await;

        result.map(|outcome| outcome.answer)
    }

    async fn summarize(
        &self,
        session: &mut Session,
        cancel: &CancellationToken,
    ) -> Result<String, RuntimeError> {
        let agent = self.current_agent();
        let mut messages = session
            .get_messages(&self.team, &agent, self.max_history_items, cancel)
            .await;
        messages.push(Message::user(SUMMARY_PROMPT));

        let response = self
            .call_model(
                &agent,
                ProviderRequest {
                    messages,
                    tools: Vec::new(),
                    max_tokens: None,
                },
                cancel,
            )
            .await?;
        self.record_usage(session, &agent, &response, cancel).await;

        let summary = response.message.content.trim().to_string();
        if summary.is_empty() {
            warn!(agent = agent.name(), session_id = %session.id, "Model returned an empty summary");
            return Ok(summary);
        }
        session.add_summary(summary.clone());
        self.publish(
            cancel,
            RuntimeEvent::SessionSummary {
                session_id: session.id.clone(),
                summary: summary.clone(),
            },
        )
        .await;
        Ok(summary)
    }
}
