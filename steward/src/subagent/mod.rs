//! Isolated parallel sub-agent execution.
//!
//! Multi-agent goals and the `spawn_agent` tool both land here. Each
//! sub-agent gets its own extracted working directory (discarded on
//! completion), its own provider resolved through a capability profile,
//! a restrictive default policy, and a tool registry without
//! `spawn_agent` — delegation depth is capped at one. Only the final
//! output string crosses back to the parent; tool results stay inside
//! the sandbox.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::debug;

use crate::chat::{Message, Provider};
use crate::error::{IsolationError, Result, ToolError};
use crate::executor::goal::ChatLoop;
use crate::executor::{CancelToken, prompts};
use crate::security::{SecurityPolicy, SecurityVerifier};
use crate::session::SessionLog;
use crate::tool::{AgentSpawner, ListDirTool, ReadFileTool, ToolRegistry, WriteFileTool};
use crate::usage::Usage;

/// One agent to spawn: its identity, prompt, and provider requirements.
#[derive(Debug, Clone)]
pub struct SubAgentSpec {
    /// Agent name; tags the agent's events.
    pub name: String,
    /// System prompt (linked agent prompt, or a generated role prompt).
    pub prompt: String,
    /// Capability profile to resolve the provider through.
    pub requires: Option<String>,
    /// Declared structured-output field names.
    pub outputs: Vec<String>,
}

/// A completed sub-agent run.
#[derive(Debug, Clone)]
pub struct SubAgentOutcome {
    /// The agent that produced the output.
    pub agent: String,
    /// Final output string; the only thing that crosses the boundary.
    pub output: String,
    /// Tokens the sub-agent consumed.
    pub usage: Usage,
}

/// Runs a batch of sub-agents concurrently and returns their outputs in
/// declaration order.
#[async_trait]
pub trait SubAgentRunner: Send + Sync {
    /// Run every spec against the shared input map. `inputs` carries the
    /// interpolated goal outcome under `_task` and is never mutated.
    async fn run(
        &self,
        goal: &str,
        specs: &[SubAgentSpec],
        inputs: &BTreeMap<String, String>,
        log: &SessionLog,
        cancel: &CancelToken,
    ) -> Result<Vec<SubAgentOutcome>>;
}

/// Maps capability profile names to providers, with a default fallback.
pub struct CapabilityProfiles {
    default: Arc<dyn Provider>,
    profiles: HashMap<String, Arc<dyn Provider>>,
}

impl CapabilityProfiles {
    /// Create a profile map around the default provider.
    #[must_use]
    pub fn new(default: Arc<dyn Provider>) -> Self {
        Self {
            default,
            profiles: HashMap::new(),
        }
    }

    /// Register a named profile.
    #[must_use]
    pub fn with_profile(mut self, name: impl Into<String>, provider: Arc<dyn Provider>) -> Self {
        self.profiles.insert(name.into(), provider);
        self
    }

    /// Resolve a profile name; missing names fall back to the default.
    #[must_use]
    pub fn resolve(&self, requires: Option<&str>) -> Arc<dyn Provider> {
        requires
            .and_then(|name| self.profiles.get(name).cloned())
            .unwrap_or_else(|| self.default.clone())
    }
}

impl std::fmt::Debug for CapabilityProfiles {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityProfiles")
            .field("profiles", &self.profiles.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// The production runner: temp-dir isolation per agent, per-agent
/// registry and verifier, concurrent execution.
pub struct IsolatedRunner {
    profiles: CapabilityProfiles,
    policy: SecurityPolicy,
}

impl IsolatedRunner {
    /// Create a runner resolving providers through the given profiles.
    /// Sub-agents carry the restrictive default policy unless one is
    /// supplied with [`with_policy`](Self::with_policy).
    #[must_use]
    pub fn new(profiles: CapabilityProfiles) -> Self {
        Self {
            profiles,
            policy: SecurityPolicy::restrictive(),
        }
    }

    /// Override the sub-agent security policy.
    #[must_use]
    pub fn with_policy(mut self, policy: SecurityPolicy) -> Self {
        self.policy = policy;
        self
    }

    async fn run_one(
        &self,
        goal: &str,
        spec: &SubAgentSpec,
        inputs: &BTreeMap<String, String>,
        log: &SessionLog,
        cancel: &CancelToken,
    ) -> Result<SubAgentOutcome> {
        let workdir = tempfile::tempdir().map_err(|e| IsolationError {
            agent: spec.name.clone(),
            message: format!("cannot create working directory: {e}"),
        })?;
        debug!(agent = %spec.name, dir = %workdir.path().display(), "sub-agent sandbox ready");

        // Own registry per agent; spawn_agent is deliberately absent.
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(ReadFileTool::new(workdir.path())));
        registry.register(Arc::new(WriteFileTool::new(workdir.path())));
        registry.register(Arc::new(ListDirTool::new(workdir.path())));

        let verifier = SecurityVerifier::new(self.policy.clone());
        let provider = self.profiles.resolve(spec.requires.as_deref());

        let task = inputs.get("_task").cloned().unwrap_or_default();
        let mut user = task;
        let context: Vec<(&String, &String)> =
            inputs.iter().filter(|(k, _)| *k != "_task").collect();
        if !context.is_empty() {
            user.push_str("\n\nInputs:");
            for (name, value) in context {
                user.push_str(&format!("\n- {name}: {value}"));
            }
        }
        if !spec.outputs.is_empty() {
            user.push_str(&prompts::structured_directive(&spec.outputs));
        }

        let messages = vec![Message::system(spec.prompt.clone()), Message::user(user)];
        let skills = HashMap::new();
        let outcome = ChatLoop {
            provider: provider.as_ref(),
            registry: &registry,
            verifier: Some(&verifier),
            log,
            goal,
            skills: &skills,
            cancel,
            agent: Some(&spec.name),
        }
        .run(messages)
        .await?;

        // Dropping the TempDir discards the sandbox contents.
        drop(workdir);

        Ok(SubAgentOutcome {
            agent: spec.name.clone(),
            output: outcome.content,
            usage: outcome.usage,
        })
    }
}

#[async_trait]
impl SubAgentRunner for IsolatedRunner {
    async fn run(
        &self,
        goal: &str,
        specs: &[SubAgentSpec],
        inputs: &BTreeMap<String, String>,
        log: &SessionLog,
        cancel: &CancelToken,
    ) -> Result<Vec<SubAgentOutcome>> {
        let runs = specs
            .iter()
            .map(|spec| self.run_one(goal, spec, inputs, log, cancel));
        join_all(runs).await.into_iter().collect()
    }
}

impl std::fmt::Debug for IsolatedRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IsolatedRunner")
            .field("profiles", &self.profiles)
            .finish_non_exhaustive()
    }
}

/// Bridges the `spawn_agent` tool to a [`SubAgentRunner`], bound to the
/// goal whose loop registered it.
pub struct DynamicSpawner {
    runner: Arc<dyn SubAgentRunner>,
    log: SessionLog,
    cancel: CancelToken,
    goal: String,
}

impl DynamicSpawner {
    /// Create a spawner for one goal's loop.
    #[must_use]
    pub fn new(
        runner: Arc<dyn SubAgentRunner>,
        log: SessionLog,
        cancel: CancelToken,
        goal: impl Into<String>,
    ) -> Self {
        Self {
            runner,
            log,
            cancel,
            goal: goal.into(),
        }
    }
}

impl std::fmt::Debug for DynamicSpawner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicSpawner")
            .field("goal", &self.goal)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl AgentSpawner for DynamicSpawner {
    async fn spawn(
        &self,
        role: &str,
        task: &str,
        outputs: Option<Vec<String>>,
    ) -> std::result::Result<String, ToolError> {
        let spec = SubAgentSpec {
            name: role.to_string(),
            prompt: format!(
                "You are the {role} for this task. Complete it and reply with only the \
                 final result."
            ),
            requires: None,
            outputs: outputs.unwrap_or_default(),
        };
        let inputs = BTreeMap::from([("_task".to_string(), task.to_string())]);

        let outcomes = self
            .runner
            .run(&self.goal, &[spec], &inputs, &self.log, &self.cancel)
            .await
            .map_err(|e| ToolError::Execution(format!("sub-agent '{role}' failed: {e}")))?;

        Ok(outcomes
            .into_iter()
            .next()
            .map(|o| o.output)
            .unwrap_or_default())
    }
}
