//! Convenient re-exports for embedding the runtime.
//!
//! ```rust,ignore
//! use steward::prelude::*;
//!
//! let workflow = agentfile::load("deploy.agent", &[])?;
//! let report = WorkflowExecutor::new(provider, registry)
//!     .with_verifier(verifier)
//!     .run(&workflow, inputs)
//!     .await?;
//! ```

pub use crate::agentfile::{
    self, AgentDecl, Goal, Input, SecurityMode, Step, StepKind, Supervision, Workflow,
};
pub use crate::chat::{ChatRequest, ChatResponse, Message, Provider, Role, ToolCall};
pub use crate::error::{
    ConfigError, Error, ParseError, PolicyError, ProviderError, Result, ToolError,
    ValidationError,
};
pub use crate::executor::{
    CancelHandle, CancelToken, HumanChannel, RunReport, WorkflowExecutor,
};
pub use crate::providers::MockProvider;
pub use crate::security::{
    BlockRegistry, ContentBlock, SecurityAction, SecurityDecision, SecurityPolicy,
    SecurityVerifier, TrustLevel,
};
pub use crate::session::{
    Event, EventType, Session, SessionLog, SessionStatus, SessionStore, replay,
};
pub use crate::subagent::{
    CapabilityProfiles, IsolatedRunner, SubAgentOutcome, SubAgentRunner, SubAgentSpec,
};
pub use crate::supervision::{
    CheckpointStore, Confidence, Phase, PostCheckpoint, PreCheckpoint, SupervisionEngine,
    Verdict,
};
pub use crate::tool::{
    AgentSpawner, McpManager, Tool, ToolDefinition, ToolOutput, ToolRegistry,
};
pub use crate::usage::Usage;
