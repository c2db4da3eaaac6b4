//! # cadre core
//!
//! Domain types, traits, and error definitions for the cadre multi-agent
//! runtime. Implementations live in the other workspace crates; everything
//! here is shared vocabulary.
//!
//! - [`message`]: chat messages exchanged with providers
//! - [`tool`]: `Tool`, `ToolSet` and the per-call `ToolRegistry`
//! - [`provider`]: the `provider/model` addressed model contract
//! - [`pubsub`]: generic typed event hub
//! - [`registry`]: generic builder lookup
//! - [`event`]: events published by the runtime

pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod pubsub;
pub mod registry;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{ProviderError, ToolError};
pub use event::RuntimeEvent;
pub use message::{Message, MessagePart, MessageToolCall, Role};
pub use provider::{
    Provider, ProviderRequest, ProviderResponse, ToolDefinition, Usage, format_model_id,
    parse_model_id,
};
pub use pubsub::{Hub, Unsubscribe};
pub use registry::{Factory, Registry};
pub use tool::{
    ElicitationHandler, ElicitationRequest, ElicitationResponse, OAuthSuccessHandler,
    StaticToolSet, Tool, ToolCall, ToolRegistry, ToolResult, ToolSet, required_parameters,
};
pub use tokio_util::sync::CancellationToken;
