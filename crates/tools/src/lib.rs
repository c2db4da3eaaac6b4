//! Built-in toolsets and the scripting sandbox for cadre.
//!
//! - [`script`]: fresh-per-call JavaScript sandbox with every tool injected
//!   as a global function
//! - [`code_mode`]: wraps toolsets behind a single scripting tool
//! - [`filesystem`] and [`shell`]: toolsets confined to a working directory
//! - [`filter`]: per-agent allowlist and instruction override

pub mod code_mode;
pub mod filesystem;
pub mod filter;
pub mod script;
pub mod shell;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use code_mode::{CodeModeToolSet, RUN_TOOLS_WITH_JAVASCRIPT};
pub use filesystem::FilesystemToolSet;
pub use filter::FilteredToolSet;
pub use script::{ScriptEngine, ScriptError, ScriptOutput};
pub use shell::ShellToolSet;
