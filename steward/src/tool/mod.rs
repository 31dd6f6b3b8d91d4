//! Tool trait and supporting types.
//!
//! Tools are how goals touch the world. Every tool exposes a name, a
//! description, a JSON-schema parameter object, and an async `execute`;
//! the registry (see [`registry`]) dispatches calls to built-ins and MCP
//! servers behind one interface, and the security verifier sits in front
//! of every dispatch.

pub mod builtins;
pub mod registry;

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use builtins::{AgentSpawner, ListDirTool, ReadFileTool, SpawnAgentTool, WriteFileTool};
pub use registry::{McpManager, ToolRegistry};

use crate::error::ToolError;

/// Definition of a tool for LLM function calling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name in snake_case (e.g. `read_file`).
    pub name: String,
    /// What the tool does; steers the model's choice.
    pub description: String,
    /// JSON schema for the arguments object.
    pub parameters: Value,
}

impl ToolDefinition {
    /// Create a new tool definition.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// The result of a tool invocation.
///
/// Tool results are anything-shaped; this tagged value keeps the three
/// cases explicit. Serialisation towards the LLM always produces a
/// string: text verbatim, JSON re-encoded, bytes base64-encoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolOutput {
    /// Plain text.
    Text(String),
    /// Raw bytes (file contents, archives).
    Bytes(Vec<u8>),
    /// Structured JSON.
    Json(Value),
}

impl ToolOutput {
    /// Render the output as the string handed back to the LLM.
    #[must_use]
    pub fn to_llm_string(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Bytes(bytes) => base64::engine::general_purpose::STANDARD.encode(bytes),
            Self::Json(value) => serde_json::to_string(value).unwrap_or_else(|_| value.to_string()),
        }
    }
}

impl From<String> for ToolOutput {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Value> for ToolOutput {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

/// The trait every tool implements.
///
/// Kept object-safe: arguments arrive as a JSON value and implementations
/// deserialize their own typed `Args` struct inside `execute`.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Name of the tool.
    fn name(&self) -> &str;

    /// Description shown to the model.
    fn description(&self) -> String;

    /// JSON schema of the arguments object.
    fn parameters_schema(&self) -> Value;

    /// Execute the tool.
    async fn execute(&self, args: Value) -> Result<ToolOutput, ToolError>;

    /// The tool definition for chat requests.
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name().to_owned(), self.description(), self.parameters_schema())
    }
}

/// A shared dynamic tool.
pub type BoxedTool = Arc<dyn Tool>;

/// Deserialize a tool's typed arguments from a JSON value, accepting the
/// stringified form some providers emit.
///
/// # Errors
///
/// Returns [`ToolError::InvalidArguments`] when the value does not match.
pub fn parse_args<T: for<'de> Deserialize<'de>>(args: &Value) -> Result<T, ToolError> {
    match args {
        Value::String(s) => {
            serde_json::from_str(s).map_err(|e| ToolError::InvalidArguments(e.to_string()))
        }
        other => serde_json::from_value(other.clone())
            .map_err(|e| ToolError::InvalidArguments(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_output_is_verbatim() {
        assert_eq!(ToolOutput::Text("hello".into()).to_llm_string(), "hello");
    }

    #[test]
    fn json_output_is_encoded() {
        let output = ToolOutput::Json(serde_json::json!({"n": 3}));
        assert_eq!(output.to_llm_string(), r#"{"n":3}"#);
    }

    #[test]
    fn bytes_output_is_base64() {
        let output = ToolOutput::Bytes(vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(output.to_llm_string(), "3q2+7w==");
    }

    #[test]
    fn parse_args_accepts_object_and_string_forms() {
        #[derive(Deserialize)]
        struct Args {
            path: String,
        }
        let object: Args = parse_args(&serde_json::json!({"path": "a.txt"})).unwrap();
        assert_eq!(object.path, "a.txt");
        let stringified: Args =
            parse_args(&Value::String(r#"{"path": "b.txt"}"#.to_string())).unwrap();
        assert_eq!(stringified.path, "b.txt");
    }

    #[test]
    fn parse_args_rejects_mismatches() {
        #[derive(Debug, Deserialize)]
        struct Args {
            #[allow(dead_code)]
            path: String,
        }
        let err = parse_args::<Args>(&serde_json::json!({"wrong": 1})).unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
