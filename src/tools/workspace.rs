//! Built-in file tools scoped to a workspace directory.
//!
//! Provides `file_read`, `file_write` and `list_dir`. Reads are unrestricted;
//! writes and listings must stay inside the canonical workspace root.
//!
//! Failure split: a bad call (unknown tool, missing argument) is an
//! `Err(ToolError)` and ends the sub-agent run. Filesystem failures and
//! workspace violations come back as a `{"error": "..."}` JSON string so the
//! model can observe them and try something else.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use super::ToolExecutor;
use crate::error::ToolError;
use crate::llm::ToolDefinition;

pub struct WorkspaceTools {
    /// Canonical (absolute, symlinks resolved) workspace root.
    root: PathBuf,
}

impl WorkspaceTools {
    /// Create the workspace directory if needed and resolve its canonical path.
    pub fn new(workspace: &Path) -> std::io::Result<Self> {
        std::fs::create_dir_all(workspace)?;
        let root = std::fs::canonicalize(workspace)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `path` for reading: relative to the workspace, absolute as-is.
    fn resolve(&self, path: &str) -> PathBuf {
        let candidate = Path::new(path);
        if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.root.join(candidate)
        }
    }

    async fn file_read(&self, args: &Map<String, Value>) -> Result<String, ToolError> {
        let path = required_str("file_read", args, "path")?;
        match tokio::fs::read_to_string(self.resolve(path)).await {
            Ok(content) => Ok(content),
            Err(e) => Ok(json!({"error": format!("file_read: {e}")}).to_string()),
        }
    }

    async fn file_write(&self, args: &Map<String, Value>) -> Result<String, ToolError> {
        let path = required_str("file_write", args, "path")?;
        let content = required_str("file_write", args, "content")?;

        let full_path = self.root.join(path);
        let Some(parent) = full_path.parent() else {
            return Ok(json!({"error": "file_write: path has no parent directory"}).to_string());
        };

        // Check the target itself, not just its parent: an existing symlink at
        // `path` would otherwise redirect the write. Nothing is created until
        // the check passes.
        match self.contains(&full_path).await {
            Ok(true) => {}
            Ok(false) => {
                return Ok(json!({
                    "error": format!("file_write: path '{path}' is outside the workspace directory")
                })
                .to_string());
            }
            Err(e) => {
                return Ok(json!({"error": format!("file_write: failed to resolve path: {e}")})
                    .to_string());
            }
        }

        if let Err(e) = tokio::fs::create_dir_all(parent).await {
            return Ok(
                json!({"error": format!("file_write: failed to create directories: {e}")})
                    .to_string(),
            );
        }

        match tokio::fs::write(&full_path, content).await {
            Ok(()) => Ok(json!({"written_bytes": content.len(), "path": path}).to_string()),
            Err(e) => Ok(json!({"error": format!("file_write: {e}")}).to_string()),
        }
    }

    async fn list_dir(&self, args: &Map<String, Value>) -> Result<String, ToolError> {
        let path = args.get("path").and_then(Value::as_str).unwrap_or(".");
        let dir = self.root.join(path);

        match self.contains(&dir).await {
            Ok(true) => {}
            Ok(false) => {
                return Ok(json!({
                    "error": format!("list_dir: path '{path}' is outside the workspace directory")
                })
                .to_string());
            }
            Err(e) => return Ok(json!({"error": format!("list_dir: {e}")}).to_string()),
        }

        let mut reader = match tokio::fs::read_dir(&dir).await {
            Ok(reader) => reader,
            Err(e) => return Ok(json!({"error": format!("list_dir: {e}")}).to_string()),
        };

        let mut entries = Vec::new();
        loop {
            match reader.next_entry().await {
                Ok(Some(entry)) => {
                    let mut name = entry.file_name().to_string_lossy().into_owned();
                    if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                        name.push('/');
                    }
                    entries.push(name);
                }
                Ok(None) => break,
                Err(e) => return Ok(json!({"error": format!("list_dir: {e}")}).to_string()),
            }
        }
        entries.sort();

        Ok(json!({"path": path, "entries": entries}).to_string())
    }

    /// Whether `target` resolves inside the workspace root.
    ///
    /// Walks up to the nearest existing ancestor, canonicalizes it (resolving
    /// symlinks), then re-appends the not-yet-existing tail. `..` components in
    /// the tail are rejected outright. A symlink counts as existing even when
    /// dangling, so its canonicalization fails instead of being skipped.
    async fn contains(&self, target: &Path) -> std::io::Result<bool> {
        let mut existing = target.to_path_buf();
        let mut tail = Vec::new();
        while tokio::fs::symlink_metadata(&existing).await.is_err() {
            match (existing.file_name(), existing.parent()) {
                (Some(name), Some(parent)) => {
                    tail.push(name.to_os_string());
                    existing = parent.to_path_buf();
                }
                _ => return Ok(false),
            }
        }
        if target
            .components()
            .rev()
            .take(tail.len())
            .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Ok(false);
        }

        let mut resolved = tokio::fs::canonicalize(&existing).await?;
        for name in tail.into_iter().rev() {
            resolved.push(name);
        }
        Ok(resolved.starts_with(&self.root))
    }
}

#[async_trait]
impl ToolExecutor for WorkspaceTools {
    fn definitions(&self) -> Vec<ToolDefinition> {
        vec![
            ToolDefinition {
                name: "file_read".to_string(),
                description: "Read the contents of a file. The path can be relative to the \
                              workspace root or absolute."
                    .to_string(),
                schema: json!({
                    "type": "object",
                    "properties": {
                        "path": {
                            "type": "string",
                            "description": "File path, relative to workspace or absolute"
                        }
                    },
                    "required": ["path"]
                }),
            },
            ToolDefinition {
                name: "file_write".to_string(),
                description: "Write content to a file inside the workspace. Parent \
                              directories are created; writes outside the workspace are \
                              rejected."
                    .to_string(),
                schema: json!({
                    "type": "object",
                    "properties": {
                        "path": {
                            "type": "string",
                            "description": "File path relative to the workspace root"
                        },
                        "content": {
                            "type": "string",
                            "description": "Content to write to the file"
                        }
                    },
                    "required": ["path", "content"]
                }),
            },
            ToolDefinition {
                name: "list_dir".to_string(),
                description: "List the entries of a workspace directory. Directories are \
                              suffixed with '/'."
                    .to_string(),
                schema: json!({
                    "type": "object",
                    "properties": {
                        "path": {
                            "type": "string",
                            "description": "Directory relative to the workspace root (default '.')"
                        }
                    }
                }),
            },
        ]
    }

    async fn execute(&self, name: &str, args: &Map<String, Value>) -> Result<String, ToolError> {
        match name {
            "file_read" => self.file_read(args).await,
            "file_write" => self.file_write(args).await,
            "list_dir" => self.list_dir(args).await,
            unknown => Err(ToolError::UnknownTool(unknown.to_string())),
        }
    }
}

fn required_str<'a>(
    tool: &str,
    args: &'a Map<String, Value>,
    key: &str,
) -> Result<&'a str, ToolError> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::InvalidArguments {
            tool: tool.to_string(),
            message: format!("missing or invalid '{key}' argument"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_tools(tmp: &TempDir) -> WorkspaceTools {
        WorkspaceTools::new(&tmp.path().join("workspace")).unwrap()
    }

    fn args(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("test args must be an object"),
        }
    }

    #[test]
    fn definitions_have_expected_names() {
        let tmp = TempDir::new().unwrap();
        let tools = make_tools(&tmp);
        let names: Vec<String> = tools.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["file_read", "file_write", "list_dir"]);
    }

    #[tokio::test]
    async fn file_read_returns_raw_content() {
        let tmp = TempDir::new().unwrap();
        let tools = make_tools(&tmp);
        std::fs::write(tools.root().join("test.txt"), "file contents here").unwrap();

        let out = tools
            .execute("file_read", &args(json!({"path": "test.txt"})))
            .await
            .unwrap();
        assert_eq!(out, "file contents here");
    }

    #[tokio::test]
    async fn file_read_missing_file_is_observable_error() {
        let tmp = TempDir::new().unwrap();
        let tools = make_tools(&tmp);

        let out = tools
            .execute("file_read", &args(json!({"path": "nope.txt"})))
            .await
            .unwrap();
        let parsed: Value = serde_json::from_str(&out).unwrap();
        assert!(parsed["error"].as_str().unwrap().contains("file_read"));
    }

    #[tokio::test]
    async fn file_write_creates_parent_dirs() {
        let tmp = TempDir::new().unwrap();
        let tools = make_tools(&tmp);

        let out = tools
            .execute(
                "file_write",
                &args(json!({"path": "sub/dir/file.txt", "content": "nested"})),
            )
            .await
            .unwrap();
        let parsed: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed["written_bytes"], 6);

        let written = std::fs::read_to_string(tools.root().join("sub/dir/file.txt")).unwrap();
        assert_eq!(written, "nested");
    }

    #[tokio::test]
    async fn file_write_outside_workspace_rejected() {
        let tmp = TempDir::new().unwrap();
        let tools = make_tools(&tmp);

        let out = tools
            .execute(
                "file_write",
                &args(json!({"path": "../escape.txt", "content": "should fail"})),
            )
            .await
            .unwrap();
        assert!(out.contains("outside the workspace"), "got: {out}");
        assert!(!tmp.path().join("escape.txt").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_write_through_symlink_rejected() {
        let tmp = TempDir::new().unwrap();
        let tools = make_tools(&tmp);
        let outside = tmp.path().join("outside.txt");
        std::fs::write(&outside, "original").unwrap();
        std::os::unix::fs::symlink(&outside, tools.root().join("link")).unwrap();

        let out = tools
            .execute(
                "file_write",
                &args(json!({"path": "link", "content": "overwritten"})),
            )
            .await
            .unwrap();
        let parsed: Value = serde_json::from_str(&out).unwrap();
        assert!(parsed["error"].is_string(), "got: {out}");
        assert_eq!(std::fs::read_to_string(&outside).unwrap(), "original");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_write_through_dangling_symlink_rejected() {
        let tmp = TempDir::new().unwrap();
        let tools = make_tools(&tmp);
        let target = tmp.path().join("not-yet.txt");
        std::os::unix::fs::symlink(&target, tools.root().join("dangling")).unwrap();

        let out = tools
            .execute(
                "file_write",
                &args(json!({"path": "dangling", "content": "escaped"})),
            )
            .await
            .unwrap();
        let parsed: Value = serde_json::from_str(&out).unwrap();
        assert!(parsed["error"].is_string(), "got: {out}");
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn file_write_overwrites_existing_workspace_file() {
        let tmp = TempDir::new().unwrap();
        let tools = make_tools(&tmp);
        std::fs::write(tools.root().join("notes.md"), "old").unwrap();

        tools
            .execute(
                "file_write",
                &args(json!({"path": "notes.md", "content": "new"})),
            )
            .await
            .unwrap();
        assert_eq!(
            std::fs::read_to_string(tools.root().join("notes.md")).unwrap(),
            "new"
        );
    }

    #[tokio::test]
    async fn file_write_missing_content_is_invalid_call() {
        let tmp = TempDir::new().unwrap();
        let tools = make_tools(&tmp);

        let err = tools
            .execute("file_write", &args(json!({"path": "file.txt"})))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));
        assert!(err.to_string().contains("content"));
    }

    #[tokio::test]
    async fn list_dir_sorts_and_marks_directories() {
        let tmp = TempDir::new().unwrap();
        let tools = make_tools(&tmp);
        std::fs::write(tools.root().join("b.txt"), "").unwrap();
        std::fs::create_dir(tools.root().join("a")).unwrap();

        let out = tools.execute("list_dir", &Map::new()).await.unwrap();
        let parsed: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed["entries"], json!(["a/", "b.txt"]));
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let tools = make_tools(&tmp);

        let err = tools.execute("shell_exec", &Map::new()).await.unwrap_err();
        assert!(matches!(err, ToolError::UnknownTool(name) if name == "shell_exec"));
    }
}
