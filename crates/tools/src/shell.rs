//! Shell toolset: run commands through `sh -c` in the working directory.
//!
//! Commands run unrestricted; which agents get the shell is decided by the
//! team file. Dropping the call future kills the child process.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use cadre_core::error::ToolError;
use cadre_core::tool::{Tool, ToolResult, ToolSet};
use tokio::process::Command;
use tracing::{debug, warn};

pub const SHELL: &str = "shell";

pub struct ShellToolSet {
    tool: Arc<ShellTool>,
}

impl ShellToolSet {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            tool: Arc::new(ShellTool {
                working_dir: working_dir.into(),
            }),
        }
    }
}

#[async_trait]
impl ToolSet for ShellToolSet {
    fn name(&self) -> &str {
        SHELL
    }

    async fn tools(&self) -> Result<Vec<Arc<dyn Tool>>, ToolError> {
        Ok(vec![Arc::clone(&self.tool) as Arc<dyn Tool>])
    }
}

/// Execute shell commands in a fixed working directory.
pub struct ShellTool {
    working_dir: PathBuf,
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        SHELL
    }

    fn description(&self) -> &str {
        "Execute a shell command in the working directory and return its output. \
         A non-zero exit code is reported in the output."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let command = arguments["command"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'command' argument".into()))?;

        debug!(command = %command, cwd = %self.working_dir.display(), "Executing shell command");

        let output = Command::new("sh")
            .args(["-c", command])
            .current_dir(&self.working_dir)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ToolError::failed(SHELL, e))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let success = output.status.success();

        let text = if success {
            if stderr.is_empty() {
                stdout.into_owned()
            } else {
                format!("{stdout}\n[stderr]: {stderr}")
            }
        } else {
            let code = output.status.code().unwrap_or(-1);
            warn!(command = %command, exit_code = code, "Command failed");
            format!("[exit code: {code}]\n{stdout}\n{stderr}")
        };

        Ok(ToolResult {
            success,
            output: text.trim().to_string(),
            data: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool() -> ShellTool {
        ShellTool {
            working_dir: std::env::temp_dir(),
        }
    }

    #[tokio::test]
    async fn runs_in_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "x").unwrap();
        let set = ShellToolSet::new(dir.path());
        let shell = set.tools().await.unwrap().remove(0);

        let result = shell
            .execute(serde_json::json!({"command": "ls"}))
            .await
            .unwrap();
        assert!(result.success);
        assert!(result.output.contains("marker.txt"));
    }

    #[tokio::test]
    async fn failing_command_reports_exit_code() {
        let result = tool()
            .execute(serde_json::json!({"command": "exit 3"}))
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.output.contains("[exit code: 3]"));
    }

    #[tokio::test]
    async fn missing_command_is_invalid() {
        let result = tool().execute(serde_json::json!({})).await;
        assert!(matches!(result, Err(ToolError::InvalidArguments(_))));
    }
}
