//! The multi-agent runtime.
//!
//! A [`Team`] owns [`Agent`]s built from a team file by the [`TeamLoader`].
//! A [`LocalRuntime`] drives the active agent over a [`Session`]:
//!
//! 1. **Build context**: team roster, instruction (templates expanded once),
//!    toolset instructions, last summary checkpoint, bounded history
//! 2. **Call the model** of the active agent
//! 3. **Dispatch tool calls**: toolset tools, `transfer_task` into a nested
//!    session, or `handoff` to another agent; append results and loop
//! 4. **Stop** on a plain answer, the iteration cap, or cancellation
//!
//! Every step is published as a [`RuntimeEvent`](cadre_core::RuntimeEvent).

pub mod agent;
pub mod builtin;
pub mod error;
pub mod expander;
pub mod loader;
pub mod runtime;
pub mod session;
pub mod team;

#[cfg(test)]
mod test_helpers;

pub use agent::{Agent, StartableToolSet};
pub use error::{RuntimeError, TeamError};
pub use expander::InstructionExpander;
pub use loader::{TeamLoader, ToolsetBuilder, ToolsetContext, default_toolset_registry, toolsets_for_agent};
pub use runtime::{LocalRuntime, Runtime};
pub use session::{Item, Session, SessionMessage, trim_messages};
pub use team::Team;
