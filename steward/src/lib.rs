//! steward — a supervised agent workflow runtime driven by declarative
//! Agentfiles.
//!
//! An Agentfile declares inputs, agents, goals, and RUN/LOOP steps; the
//! runtime executes the goals through an LLM provider under layered
//! controls:
//!
//! - the [`agentfile`] front-end lexes, parses, links, and validates
//!   workflows (smart `FROM` resolution, skill directories)
//! - the [`executor`] walks steps, drives the goal loop with parallel
//!   tool execution, interpolates variables, and coerces structured
//!   outputs
//! - the [`supervision`] engine wraps every goal in COMMIT → EXECUTE →
//!   RECONCILE → SUPERVISE with persisted checkpoints
//! - the [`security`] verifier admits each tool call through static
//!   rules and optional triage/supervisor LLM tiers
//! - the [`subagent`] runner fans multi-agent goals out into isolated
//!   sandboxes
//! - the [`session`] log records every observable transition for
//!   deterministic replay
//!
//! Provider wire formats, the MCP transport, and package signing live
//! outside this crate behind the [`chat::Provider`],
//! [`tool::McpManager`], and [`executor::HumanChannel`] contracts.

// Language front-end
pub mod agentfile;

// Provider contract and implementations
pub mod chat;
pub mod providers;
pub mod usage;

// Execution
pub mod executor;
pub mod subagent;
pub mod supervision;
pub mod tool;

// Admission control and forensics
pub mod security;
pub mod session;

// Shared utilities
pub mod error;
pub mod json_utils;

pub mod prelude;

pub use error::{Error, Result};
