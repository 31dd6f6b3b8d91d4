//! Built-in tools.
//!
//! The filesystem tools are rooted in a working directory and refuse to
//! step outside it; the path allow-list in the security policy is
//! enforced separately by the verifier. `spawn_agent` is the dynamic
//! sub-agent entry point; registering it enables the orchestrator
//! preamble in goal system prompts.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::{Tool, ToolOutput, parse_args};
use crate::error::ToolError;

/// Reject absolute paths and parent traversal before joining onto the
/// tool root.
fn safe_join(root: &Path, relative: &str) -> Result<PathBuf, ToolError> {
    let candidate = Path::new(relative);
    if candidate.is_absolute() {
        return Err(ToolError::InvalidArguments(format!(
            "path '{relative}' must be relative"
        )));
    }
    if candidate
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(ToolError::InvalidArguments(format!(
            "path '{relative}' must not contain '..'"
        )));
    }
    Ok(root.join(candidate))
}

/// Reads a file under the working directory.
#[derive(Debug, Clone)]
pub struct ReadFileTool {
    root: PathBuf,
}

#[derive(Debug, Deserialize)]
struct ReadFileArgs {
    path: String,
}

impl ReadFileTool {
    /// Create the tool rooted at the given directory.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> String {
        "Read a text file from the working directory.".to_string()
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Relative path of the file to read"}
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput, ToolError> {
        let args: ReadFileArgs = parse_args(&args)?;
        let path = safe_join(&self.root, &args.path)?;
        let content = tokio::fs::read_to_string(&path).await?;
        Ok(ToolOutput::Text(content))
    }
}

/// Writes a file under the working directory, creating parents.
#[derive(Debug, Clone)]
pub struct WriteFileTool {
    root: PathBuf,
}

#[derive(Debug, Deserialize)]
struct WriteFileArgs {
    path: String,
    content: String,
}

impl WriteFileTool {
    /// Create the tool rooted at the given directory.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> String {
        "Write a text file in the working directory, creating parent directories.".to_string()
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Relative path of the file to write"},
                "content": {"type": "string", "description": "Full file content"}
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput, ToolError> {
        let args: WriteFileArgs = parse_args(&args)?;
        let path = safe_join(&self.root, &args.path)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, args.content.as_bytes()).await?;
        Ok(ToolOutput::Text(format!(
            "wrote {} bytes to {}",
            args.content.len(),
            args.path
        )))
    }
}

/// Lists a directory under the working directory.
#[derive(Debug, Clone)]
pub struct ListDirTool {
    root: PathBuf,
}

#[derive(Debug, Deserialize)]
struct ListDirArgs {
    #[serde(default = "default_list_path")]
    path: String,
}

fn default_list_path() -> String {
    ".".to_string()
}

impl ListDirTool {
    /// Create the tool rooted at the given directory.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }

    fn description(&self) -> String {
        "List the entries of a directory in the working directory.".to_string()
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Relative directory path, defaults to '.'"}
            }
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput, ToolError> {
        let args: ListDirArgs = parse_args(&args)?;
        let path = safe_join(&self.root, &args.path)?;
        let mut reader = tokio::fs::read_dir(&path).await?;
        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await? {
            let mut name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().await?.is_dir() {
                name.push('/');
            }
            entries.push(name);
        }
        entries.sort();
        Ok(ToolOutput::Json(Value::Array(
            entries.into_iter().map(Value::String).collect(),
        )))
    }
}

/// Contract between the `spawn_agent` tool and the executor's dynamic
/// sub-agent spawner.
#[async_trait]
pub trait AgentSpawner: Send + Sync {
    /// Spawn an ad-hoc agent for a role and task, returning its final
    /// output string.
    async fn spawn(
        &self,
        role: &str,
        task: &str,
        outputs: Option<Vec<String>>,
    ) -> Result<String, ToolError>;
}

/// The dynamic sub-agent tool.
pub struct SpawnAgentTool {
    spawner: Arc<dyn AgentSpawner>,
}

#[derive(Debug, Deserialize)]
struct SpawnAgentArgs {
    role: String,
    task: String,
    #[serde(default)]
    outputs: Option<Vec<String>>,
}

impl SpawnAgentTool {
    /// Create the tool around a spawner implementation.
    #[must_use]
    pub fn new(spawner: Arc<dyn AgentSpawner>) -> Self {
        Self { spawner }
    }
}

impl std::fmt::Debug for SpawnAgentTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpawnAgentTool").finish_non_exhaustive()
    }
}

#[async_trait]
impl Tool for SpawnAgentTool {
    fn name(&self) -> &str {
        super::registry::SPAWN_AGENT
    }

    fn description(&self) -> String {
        "Spawn an isolated sub-agent with a role and a task; returns its final output."
            .to_string()
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "role": {"type": "string", "description": "Role of the sub-agent, e.g. 'researcher'"},
                "task": {"type": "string", "description": "The task to perform"},
                "outputs": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Optional structured output field names"
                }
            },
            "required": ["role", "task"]
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput, ToolError> {
        let args: SpawnAgentArgs = parse_args(&args)?;
        let output = self
            .spawner
            .spawn(&args.role, &args.task, args.outputs)
            .await?;
        Ok(ToolOutput::Text(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> tempfile::TempDir {
        tempfile::tempdir().expect("tempdir")
    }

    #[tokio::test]
    async fn read_after_write_roundtrips() {
        let dir = root();
        let write = WriteFileTool::new(dir.path());
        let read = ReadFileTool::new(dir.path());

        write
            .execute(serde_json::json!({"path": "notes/plan.md", "content": "step one"}))
            .await
            .unwrap();
        let out = read
            .execute(serde_json::json!({"path": "notes/plan.md"}))
            .await
            .unwrap();
        assert_eq!(out.to_llm_string(), "step one");
    }

    #[tokio::test]
    async fn absolute_paths_are_rejected() {
        let dir = root();
        let read = ReadFileTool::new(dir.path());
        let err = read
            .execute(serde_json::json!({"path": "/etc/passwd"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn parent_traversal_is_rejected() {
        let dir = root();
        let read = ReadFileTool::new(dir.path());
        let err = read
            .execute(serde_json::json!({"path": "../secrets"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn list_dir_sorts_and_marks_directories() {
        let dir = root();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("b.txt"), "b").unwrap();
        std::fs::write(dir.path().join("a.txt"), "a").unwrap();

        let out = ListDirTool::new(dir.path())
            .execute(serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(out.to_llm_string(), r#"["a.txt","b.txt","sub/"]"#);
    }

    #[tokio::test]
    async fn spawn_agent_routes_through_spawner() {
        struct FixedSpawner;

        #[async_trait]
        impl AgentSpawner for FixedSpawner {
            async fn spawn(
                &self,
                role: &str,
                task: &str,
                _outputs: Option<Vec<String>>,
            ) -> Result<String, ToolError> {
                Ok(format!("{role}: {task}"))
            }
        }

        let tool = SpawnAgentTool::new(Arc::new(FixedSpawner));
        let out = tool
            .execute(serde_json::json!({"role": "researcher", "task": "find prior art"}))
            .await
            .unwrap();
        assert_eq!(out.to_llm_string(), "researcher: find prior art");
    }

    #[tokio::test]
    async fn missing_file_surfaces_io_error() {
        let dir = root();
        let err = ReadFileTool::new(dir.path())
            .execute(serde_json::json!({"path": "absent.txt"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Io(_)));
    }
}
