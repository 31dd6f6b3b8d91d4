//! Error types for the steward runtime.
//!
//! Each subsystem owns a focused error enum; [`Error`] is the crate-wide
//! umbrella that the executor and public entry points return. Conversion
//! into the umbrella is provided via `#[from]` so call sites can use `?`
//! across subsystem boundaries.

use thiserror::Error;

/// A type alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// An error produced while parsing an Agentfile.
///
/// Every parse error carries the line number of the token that
/// triggered it.
#[derive(Debug, Clone, Error)]
#[error("parse error at line {line}: {message}")]
pub struct ParseError {
    /// 1-based line number of the offending token.
    pub line: usize,
    /// Human-readable description of the problem.
    pub message: String,
}

impl ParseError {
    /// Create a parse error at the given line.
    #[must_use]
    pub fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

/// A single validation violation with its source line.
#[derive(Debug, Clone)]
pub struct Violation {
    /// 1-based line number the violation refers to.
    pub line: usize,
    /// Description of the violation.
    pub message: String,
}

impl Violation {
    /// Create a violation at the given line.
    #[must_use]
    pub fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

/// Aggregated validation failure for a linked workflow.
///
/// The validator never stops at the first problem; all violations are
/// collected and reported together, each with its line number.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Every violation found, in source order.
    pub violations: Vec<Violation>,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "workflow validation failed:")?;
        for v in &self.violations {
            writeln!(f, "  line {}: {}", v.line, v.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

/// Configuration and load-time errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required workflow input was not supplied and has no default.
    #[error("missing required input '{0}'")]
    MissingInput(String),

    /// A capability profile named by an agent does not exist.
    #[error("unknown capability profile '{0}'")]
    MissingProfile(String),

    /// An agent's `FROM` source could not be resolved.
    #[error("agent '{agent}' (line {line}): {message}")]
    AgentSource {
        /// Name of the agent whose source failed to load.
        agent: String,
        /// Line of the agent declaration.
        line: usize,
        /// What went wrong.
        message: String,
    },

    /// The workflow has supervised-human steps but no human channel is
    /// configured.
    #[error("workflow requires human supervision but no human channel is configured")]
    NoHumanChannel,

    /// A filesystem path in the configuration is invalid.
    #[error("invalid path '{path}': {message}")]
    BadPath {
        /// The offending path.
        path: String,
        /// What went wrong.
        message: String,
    },
}

/// An error returned by an LLM provider.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// The request failed to reach the provider or was rejected.
    #[error("provider request failed: {0}")]
    Request(String),

    /// The provider returned a response the runtime could not use.
    #[error("malformed provider response: {0}")]
    Malformed(String),
}

impl ProviderError {
    /// Create a request error.
    #[must_use]
    pub fn request(message: impl Into<String>) -> Self {
        Self::Request(message.into())
    }
}

/// An error produced by a tool invocation.
#[derive(Debug, Error)]
pub enum ToolError {
    /// No tool with the given name is registered.
    #[error("tool '{0}' not found")]
    NotFound(String),

    /// The arguments did not match the tool's schema.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// The tool ran and failed.
    #[error("tool execution failed: {0}")]
    Execution(String),

    /// An I/O error during tool execution.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A tool call was rejected by the security verifier.
#[derive(Debug, Clone, Error)]
#[error("security: tool '{tool}' denied: {reason}")]
pub struct PolicyError {
    /// The tool that was denied.
    pub tool: String,
    /// The verifier's reason.
    pub reason: String,
    /// Static-tier flags that contributed to the decision.
    pub flags: Vec<String>,
}

/// A sub-agent failed to bootstrap its isolated environment.
#[derive(Debug, Error)]
#[error("sub-agent '{agent}' isolation failed: {message}")]
pub struct IsolationError {
    /// The agent being spawned.
    pub agent: String,
    /// What went wrong.
    pub message: String,
}

/// The crate-wide error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Agentfile parse failure.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Aggregated workflow validation failure.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Configuration or load-time failure.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// LLM provider failure.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Tool invocation failure.
    #[error(transparent)]
    Tool(#[from] ToolError),

    /// Security verifier denial.
    #[error(transparent)]
    Policy(#[from] PolicyError),

    /// Sub-agent bootstrap failure.
    #[error(transparent)]
    Isolation(#[from] IsolationError),

    /// The run was cancelled from the outside.
    #[error("cancelled")]
    Cancelled,

    /// Session or checkpoint persistence failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding failure in a persistence path.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// A bug or broken internal invariant.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}
