//! Error types for the cadre domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; crates that combine them
//! (the agent runtime, the config loader) wrap these with `#[source]`.

use thiserror::Error;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Permission denied: {tool_name}: {reason}")]
    PermissionDenied { tool_name: String, reason: String },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("Toolset {toolset} unavailable: {reason}")]
    Unavailable { toolset: String, reason: String },

    #[error("Tool call cancelled: {0}")]
    Cancelled(String),
}

impl ToolError {
    /// Shorthand for a handler failure.
    pub fn failed(tool_name: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::ExecutionFailed {
            tool_name: tool_name.into(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = ProviderError::ApiError {
            status_code: 429,
            message: "Too many requests".into(),
        };
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("Too many requests"));
    }

    #[test]
    fn tool_error_displays_correctly() {
        let err = ToolError::Unavailable {
            toolset: "filesystem".into(),
            reason: "working directory missing".into(),
        };
        assert!(err.to_string().contains("filesystem"));
        assert!(err.to_string().contains("working directory missing"));
    }

    #[test]
    fn failed_shorthand_keeps_tool_name() {
        let err = ToolError::failed("shell", "exit status 2");
        assert!(matches!(err, ToolError::ExecutionFailed { ref tool_name, .. } if tool_name == "shell"));
    }
}
