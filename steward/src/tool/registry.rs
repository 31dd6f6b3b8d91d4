//! Tool registry: policy-filtered dispatch for built-in and MCP tools.
//!
//! MCP tools are surfaced to the model as `mcp_<server>_<tool>`; on
//! invocation the prefix is stripped and the call routed to the
//! [`McpManager`]. The registry filters denied tools out of the
//! definitions it exposes, so the model never sees them; the security
//! verifier still guards every dispatch independently.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::{BoxedTool, ToolDefinition, ToolOutput};
use crate::error::ToolError;

/// Prefix applied to MCP tool names surfaced to the model.
pub const MCP_PREFIX: &str = "mcp_";

/// Name of the sub-agent spawning built-in. Its presence in a registry
/// enables the orchestrator preamble in goal system prompts.
pub const SPAWN_AGENT: &str = "spawn_agent";

/// External contract to the MCP subprocess manager.
///
/// The transport (process lifecycle, framing) lives outside this crate;
/// the registry only needs server names, their tool definitions, and an
/// invoke path.
#[async_trait]
pub trait McpManager: Send + Sync {
    /// Connected server names.
    fn servers(&self) -> Vec<String>;

    /// Tool definitions exposed by one server, unprefixed.
    fn tools(&self, server: &str) -> Vec<ToolDefinition>;

    /// Invoke a tool on a server.
    async fn invoke(
        &self,
        server: &str,
        tool: &str,
        args: Value,
    ) -> Result<ToolOutput, ToolError>;
}

/// A collection of tools exposed to a goal loop.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<BoxedTool>,
    mcp: Option<Arc<dyn McpManager>>,
    denied: HashSet<String>,
}

impl ToolRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a built-in tool. Insertion order is preserved in the
    /// exposed definitions.
    pub fn register(&mut self, tool: BoxedTool) {
        self.tools.push(tool);
    }

    /// Attach an MCP manager whose tools are surfaced with the
    /// `mcp_<server>_<tool>` naming scheme.
    pub fn set_mcp(&mut self, manager: Arc<dyn McpManager>) {
        self.mcp = Some(manager);
    }

    /// Deny tools by name (surfaced name for MCP tools). Denied tools are
    /// dropped from definitions and refuse dispatch.
    pub fn deny<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.denied.extend(names.into_iter().map(Into::into));
    }

    /// Whether a tool with this name is dispatchable.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        if self.denied.contains(name) {
            return false;
        }
        if self.tools.iter().any(|t| t.name() == name) {
            return true;
        }
        self.resolve_mcp(name).is_some()
    }

    /// Whether the spawn-agent built-in is registered (and not denied).
    #[must_use]
    pub fn has_spawn_agent(&self) -> bool {
        self.contains(SPAWN_AGENT)
    }

    /// Number of registered built-in tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether no built-in tools are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// All exposed tool definitions: built-ins in registration order,
    /// then MCP tools grouped by server, minus denied names.
    #[must_use]
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut definitions: Vec<ToolDefinition> = self
            .tools
            .iter()
            .filter(|t| !self.denied.contains(t.name()))
            .map(|t| t.definition())
            .collect();

        if let Some(ref mcp) = self.mcp {
            for server in mcp.servers() {
                for mut def in mcp.tools(&server) {
                    if self.denied.contains(&def.name) {
                        continue;
                    }
                    def.name = format!("{MCP_PREFIX}{server}_{}", def.name);
                    if self.denied.contains(&def.name) {
                        continue;
                    }
                    definitions.push(def);
                }
            }
        }

        definitions
    }

    /// Resolve an `mcp_`-prefixed name into `(server, tool)`.
    ///
    /// Server names may themselves contain underscores, so the known
    /// server list is matched longest-first rather than split blindly.
    fn resolve_mcp(&self, name: &str) -> Option<(String, String)> {
        let mcp = self.mcp.as_ref()?;
        let rest = name.strip_prefix(MCP_PREFIX)?;
        let mut servers = mcp.servers();
        servers.sort_by_key(|s| std::cmp::Reverse(s.len()));
        for server in servers {
            if let Some(tool) = rest.strip_prefix(&format!("{server}_")) {
                return Some((server, tool.to_string()));
            }
        }
        None
    }

    /// Dispatch a tool call by name.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::NotFound`] for unknown names and
    /// [`ToolError::Execution`] for denied ones; tool failures propagate.
    pub async fn dispatch(&self, name: &str, args: Value) -> Result<ToolOutput, ToolError> {
        if self.denied.contains(name) {
            return Err(ToolError::Execution(format!(
                "tool '{name}' is denied by policy"
            )));
        }

        if let Some((server, tool)) = self.resolve_mcp(name) {
            debug!(server = %server, tool = %tool, "dispatching MCP tool");
            let mcp = self
                .mcp
                .as_ref()
                .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
            return mcp.invoke(&server, &tool, args).await;
        }

        let tool = self
            .tools
            .iter()
            .find(|t| t.name() == name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        debug!(tool = %name, "dispatching built-in tool");
        tool.execute(args).await
    }
}

impl Clone for ToolRegistry {
    fn clone(&self) -> Self {
        Self {
            tools: self.tools.clone(),
            mcp: self.mcp.clone(),
            denied: self.denied.clone(),
        }
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field(
                "tools",
                &self.tools.iter().map(|t| t.name().to_owned()).collect::<Vec<_>>(),
            )
            .field("mcp", &self.mcp.is_some())
            .field("denied", &self.denied)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::Tool;
    use async_trait::async_trait;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> String {
            "Echoes its message argument.".to_string()
        }

        fn parameters_schema(&self) -> Value {
            serde_json::json!({
                "type": "object",
                "properties": {"message": {"type": "string"}},
                "required": ["message"]
            })
        }

        async fn execute(&self, args: Value) -> Result<ToolOutput, ToolError> {
            let message = args
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default();
            Ok(ToolOutput::Text(message.to_string()))
        }
    }

    struct FakeMcp;

    #[async_trait]
    impl McpManager for FakeMcp {
        fn servers(&self) -> Vec<String> {
            vec!["files".to_string(), "files_ro".to_string()]
        }

        fn tools(&self, server: &str) -> Vec<ToolDefinition> {
            vec![ToolDefinition::new(
                "stat",
                format!("stat on {server}"),
                serde_json::json!({"type": "object"}),
            )]
        }

        async fn invoke(
            &self,
            server: &str,
            tool: &str,
            _args: Value,
        ) -> Result<ToolOutput, ToolError> {
            Ok(ToolOutput::Text(format!("{server}/{tool}")))
        }
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        registry.set_mcp(Arc::new(FakeMcp));
        registry
    }

    #[tokio::test]
    async fn dispatches_builtin() {
        let out = registry()
            .dispatch("echo", serde_json::json!({"message": "hi"}))
            .await
            .unwrap();
        assert_eq!(out.to_llm_string(), "hi");
    }

    #[tokio::test]
    async fn dispatches_mcp_with_prefix_stripped() {
        let out = registry()
            .dispatch("mcp_files_stat", serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(out.to_llm_string(), "files/stat");
    }

    #[tokio::test]
    async fn mcp_server_names_match_longest_first() {
        let out = registry()
            .dispatch("mcp_files_ro_stat", serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(out.to_llm_string(), "files_ro/stat");
    }

    #[test]
    fn definitions_surface_mcp_names() {
        let names: Vec<String> = registry().definitions().into_iter().map(|d| d.name).collect();
        assert!(names.contains(&"echo".to_string()));
        assert!(names.contains(&"mcp_files_stat".to_string()));
        assert!(names.contains(&"mcp_files_ro_stat".to_string()));
    }

    #[test]
    fn denied_tools_are_hidden() {
        let mut reg = registry();
        reg.deny(["echo", "mcp_files_stat"]);
        let names: Vec<String> = reg.definitions().into_iter().map(|d| d.name).collect();
        assert!(!names.contains(&"echo".to_string()));
        assert!(!names.contains(&"mcp_files_stat".to_string()));
        assert!(names.contains(&"mcp_files_ro_stat".to_string()));
        assert!(!reg.contains("echo"));
    }

    #[tokio::test]
    async fn denied_tools_refuse_dispatch() {
        let mut reg = registry();
        reg.deny(["echo"]);
        let err = reg.dispatch("echo", serde_json::json!({})).await.unwrap_err();
        assert!(err.to_string().contains("denied by policy"));
    }

    #[tokio::test]
    async fn unknown_tool_is_not_found() {
        let err = registry()
            .dispatch("nonexistent", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
    }

    #[test]
    fn spawn_agent_detection() {
        assert!(!registry().has_spawn_agent());
    }
}
