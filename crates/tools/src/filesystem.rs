//! Filesystem toolset: list, read and write files under one root.
//!
//! Every path is resolved against the root and normalized lexically; a path
//! that would leave the root is refused with `PermissionDenied`. Symlinks
//! inside the root are followed as-is.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use cadre_core::error::ToolError;
use cadre_core::tool::{Tool, ToolResult, ToolSet};
use tracing::debug;

pub const LIST_DIRECTORY: &str = "list_directory";
pub const READ_FILE: &str = "read_file";
pub const WRITE_FILE: &str = "write_file";

/// Lexically normalize a path; `None` if `..` climbs above its start.
fn normalize(path: &Path) -> Option<PathBuf> {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    return None;
                }
            }
            other => normalized.push(other),
        }
    }
    Some(normalized)
}

/// Resolve `path` against `root`, refusing anything outside it.
pub fn resolve_path(root: &Path, path: &str) -> Result<PathBuf, String> {
    let root = normalize(root).unwrap_or_else(|| root.to_path_buf());
    let candidate = Path::new(path);
    let joined = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        root.join(candidate)
    };

    let normalized = normalize(&joined)
        .ok_or_else(|| format!("Path '{path}' escapes the working directory"))?;
    if !normalized.starts_with(&root) {
        return Err(format!("Path '{path}' is outside the working directory"));
    }
    Ok(normalized)
}

fn path_argument<'a>(arguments: &'a serde_json::Value, tool: &str) -> Result<&'a str, ToolError> {
    arguments["path"]
        .as_str()
        .ok_or_else(|| ToolError::InvalidArguments(format!("{tool}: missing 'path' argument")))
}

fn confined(root: &Path, path: &str, tool: &str) -> Result<PathBuf, ToolError> {
    resolve_path(root, path).map_err(|reason| ToolError::PermissionDenied {
        tool_name: tool.to_string(),
        reason,
    })
}

/// Tools confined to a working directory.
pub struct FilesystemToolSet {
    root: Arc<PathBuf>,
}

impl FilesystemToolSet {
    /// A relative root is made absolute against the process directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let root = std::path::absolute(&root).unwrap_or(root);
        Self {
            root: Arc::new(root),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl ToolSet for FilesystemToolSet {
    fn name(&self) -> &str {
        "filesystem"
    }

    async fn tools(&self) -> Result<Vec<Arc<dyn Tool>>, ToolError> {
        Ok(vec![
            Arc::new(ListDirectoryTool {
                root: Arc::clone(&self.root),
            }),
            Arc::new(ReadFileTool {
                root: Arc::clone(&self.root),
            }),
            Arc::new(WriteFileTool {
                root: Arc::clone(&self.root),
            }),
        ])
    }

    fn instructions(&self) -> String {
        format!(
            "Filesystem tools operate inside {}. Use paths relative to it.",
            self.root.display()
        )
    }

    async fn start(&self) -> Result<(), ToolError> {
        match tokio::fs::metadata(self.root.as_path()).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(ToolError::Unavailable {
                toolset: "filesystem".into(),
                reason: format!("{} is not a directory", self.root.display()),
            }),
            Err(e) => Err(ToolError::Unavailable {
                toolset: "filesystem".into(),
                reason: format!("{}: {e}", self.root.display()),
            }),
        }
    }
}

struct ListDirectoryTool {
    root: Arc<PathBuf>,
}

#[async_trait]
impl Tool for ListDirectoryTool {
    fn name(&self) -> &str {
        LIST_DIRECTORY
    }

    fn description(&self) -> &str {
        "List the entries of a directory. Directories are suffixed with '/'."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory to list, relative to the working directory (default '.')"
                }
            }
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let path = arguments["path"].as_str().unwrap_or(".");
        let dir = confined(&self.root, path, LIST_DIRECTORY)?;

        let mut reader = match tokio::fs::read_dir(&dir).await {
            Ok(reader) => reader,
            Err(e) => return Ok(ToolResult::error(format!("Failed to list directory: {e}"))),
        };

        let mut entries = Vec::new();
        loop {
            match reader.next_entry().await {
                Ok(Some(entry)) => {
                    let mut name = entry.file_name().to_string_lossy().into_owned();
                    if entry.file_type().await.is_ok_and(|t| t.is_dir()) {
                        name.push('/');
                    }
                    entries.push(name);
                }
                Ok(None) => break,
                Err(e) => return Ok(ToolResult::error(format!("Failed to list directory: {e}"))),
            }
        }
        entries.sort();
        Ok(ToolResult::ok(entries.join("\n")))
    }
}

struct ReadFileTool {
    root: Arc<PathBuf>,
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        READ_FILE
    }

    fn description(&self) -> &str {
        "Read the contents of a file at the given path."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "The file path to read"
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let path = path_argument(&arguments, READ_FILE)?;
        let file = confined(&self.root, path, READ_FILE)?;

        match tokio::fs::read_to_string(&file).await {
            Ok(content) => Ok(ToolResult::ok(content)),
            Err(e) => Ok(ToolResult::error(format!("Failed to read file: {e}"))),
        }
    }
}

struct WriteFileTool {
    root: Arc<PathBuf>,
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        WRITE_FILE
    }

    fn description(&self) -> &str {
        "Write content to a file. Creates the file and missing parent directories if needed, overwrites if it exists."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "The file path to write to"
                },
                "content": {
                    "type": "string",
                    "description": "The content to write"
                }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let path = path_argument(&arguments, WRITE_FILE)?;
        let content = arguments["content"].as_str().ok_or_else(|| {
            ToolError::InvalidArguments(format!("{WRITE_FILE}: missing 'content' argument"))
        })?;
        let file = confined(&self.root, path, WRITE_FILE)?;

        if let Some(parent) = file.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return Ok(ToolResult::error(format!("Failed to create directory: {e}")));
            }
        }

        debug!(path = %file.display(), bytes = content.len(), "Writing file");
        match tokio::fs::write(&file, content).await {
            Ok(()) => Ok(ToolResult::ok(format!(
                "Wrote {} bytes to {path}",
                content.len()
            ))),
            Err(e) => Ok(ToolResult::error(format!("Failed to write file: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn tool(set: &FilesystemToolSet, name: &str) -> Arc<dyn Tool> {
        set.tools()
            .await
            .unwrap()
            .into_iter()
            .find(|t| t.name() == name)
            .unwrap()
    }

    #[test]
    fn resolve_keeps_paths_inside_root() {
        let root = Path::new("/work");
        assert_eq!(resolve_path(root, "a/b.txt").unwrap(), PathBuf::from("/work/a/b.txt"));
        assert_eq!(resolve_path(root, "./a/../b").unwrap(), PathBuf::from("/work/b"));
        assert_eq!(resolve_path(root, "/work/c").unwrap(), PathBuf::from("/work/c"));
        assert!(resolve_path(root, "../etc/passwd").is_err());
        assert!(resolve_path(root, "/etc/passwd").is_err());
    }

    #[tokio::test]
    async fn write_then_read_then_list() {
        let dir = tempfile::tempdir().unwrap();
        let set = FilesystemToolSet::new(dir.path());
        set.start().await.unwrap();

        let written = tool(&set, WRITE_FILE)
            .await
            .execute(serde_json::json!({"path": "notes/today.md", "content": "ship it"}))
            .await
            .unwrap();
        assert!(written.success);

        let read = tool(&set, READ_FILE)
            .await
            .execute(serde_json::json!({"path": "notes/today.md"}))
            .await
            .unwrap();
        assert_eq!(read.output, "ship it");

        let listed = tool(&set, LIST_DIRECTORY)
            .await
            .execute(serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(listed.output, "notes/");
    }

    #[tokio::test]
    async fn read_missing_file_is_soft_failure() {
        let dir = tempfile::tempdir().unwrap();
        let set = FilesystemToolSet::new(dir.path());
        let result = tool(&set, READ_FILE)
            .await
            .execute(serde_json::json!({"path": "nope.txt"}))
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.output.contains("Failed to read file"));
    }

    #[tokio::test]
    async fn escaping_the_root_is_denied() {
        let dir = tempfile::tempdir().unwrap();
        let set = FilesystemToolSet::new(dir.path());
        let result = tool(&set, READ_FILE)
            .await
            .execute(serde_json::json!({"path": "../../etc/passwd"}))
            .await;
        assert!(matches!(result, Err(ToolError::PermissionDenied { .. })));
    }

    #[tokio::test]
    async fn missing_path_argument() {
        let dir = tempfile::tempdir().unwrap();
        let set = FilesystemToolSet::new(dir.path());
        let result = tool(&set, READ_FILE).await.execute(serde_json::json!({})).await;
        assert!(matches!(result, Err(ToolError::InvalidArguments(_))));
    }

    #[tokio::test]
    async fn start_fails_without_root() {
        let dir = tempfile::tempdir().unwrap();
        let set = FilesystemToolSet::new(dir.path().join("missing"));
        let err = set.start().await.unwrap_err();
        assert!(matches!(err, ToolError::Unavailable { ref toolset, .. } if toolset == "filesystem"));
    }
}
