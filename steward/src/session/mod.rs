//! Session state and the append-only event log.
//!
//! A [`Session`] is the forensic record of one workflow run: immutable
//! identity plus a strictly append-only event stream. Every observable
//! transition — LLM turns, tool calls, supervision phases, security
//! decisions — lands here, and [`replay`](crate::session::replay)
//! reconstructs the run from the file alone.
//!
//! Persistence is crash-consistent: each update serialises the whole
//! session and lands via write-temp-then-rename, so a reader never sees
//! a torn JSON document and a crash loses at most the current event.

pub mod replay;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Error, Result};

/// The type of a session event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Workflow execution began.
    WorkflowStart,
    /// Workflow execution finished (any status).
    WorkflowEnd,
    /// A goal began.
    GoalStart,
    /// A goal finished.
    GoalEnd,
    /// Runtime diagnostics (degraded phases, coercion failures).
    System,
    /// A user-role message sent to the provider.
    User,
    /// An assistant response from the provider.
    Assistant,
    /// A tool call requested by the model.
    ToolCall,
    /// The result of a tool call.
    ToolResult,
    /// COMMIT phase completed.
    PhaseCommit,
    /// EXECUTE phase completed.
    PhaseExecute,
    /// RECONCILE phase completed.
    PhaseReconcile,
    /// SUPERVISE phase completed.
    PhaseSupervise,
    /// A checkpoint file was persisted.
    Checkpoint,
    /// Untrusted content was registered as a block.
    SecurityBlock,
    /// Tier 1 static check ran.
    SecurityStatic,
    /// Tier 2 triage classification ran.
    SecurityTriage,
    /// Tier 3 supervisor evaluation ran.
    SecuritySupervisor,
    /// Final admission decision for a tool call.
    SecurityDecision,
}

impl EventType {
    /// String form, matching the serialized representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::WorkflowStart => "workflow_start",
            Self::WorkflowEnd => "workflow_end",
            Self::GoalStart => "goal_start",
            Self::GoalEnd => "goal_end",
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::ToolCall => "tool_call",
            Self::ToolResult => "tool_result",
            Self::PhaseCommit => "phase_commit",
            Self::PhaseExecute => "phase_execute",
            Self::PhaseReconcile => "phase_reconcile",
            Self::PhaseSupervise => "phase_supervise",
            Self::Checkpoint => "checkpoint",
            Self::SecurityBlock => "security_block",
            Self::SecurityStatic => "security_static",
            Self::SecurityTriage => "security_triage",
            Self::SecuritySupervisor => "security_supervisor",
            Self::SecurityDecision => "security_decision",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry in the session event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Event type.
    #[serde(rename = "type")]
    pub event_type: EventType,

    /// Goal in scope, when any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal: Option<String>,

    /// Step in scope, when any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,

    /// Tool name for tool-related events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,

    /// Tool arguments or other structured inputs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,

    /// Message or result content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    /// Error text for failure events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Duration of the recorded operation, milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,

    /// When the event was recorded.
    pub timestamp: DateTime<Utc>,

    /// Phase and security detail; expanded by replay at verbosity 2.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl Event {
    /// Create an event stamped now.
    #[must_use]
    pub fn new(event_type: EventType) -> Self {
        Self {
            event_type,
            goal: None,
            step: None,
            tool: None,
            args: None,
            content: None,
            error: None,
            duration_ms: None,
            timestamp: Utc::now(),
            meta: None,
        }
    }

    /// Tag the event with a goal name.
    #[must_use]
    pub fn goal(mut self, goal: impl Into<String>) -> Self {
        self.goal = Some(goal.into());
        self
    }

    /// Tag the event with a step name.
    #[must_use]
    pub fn step(mut self, step: impl Into<String>) -> Self {
        self.step = Some(step.into());
        self
    }

    /// Tag the event with a tool name.
    #[must_use]
    pub fn tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = Some(tool.into());
        self
    }

    /// Attach structured arguments.
    #[must_use]
    pub fn args(mut self, args: Value) -> Self {
        self.args = Some(args);
        self
    }

    /// Attach content.
    #[must_use]
    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Attach an error message.
    #[must_use]
    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Attach a duration in milliseconds.
    #[must_use]
    pub fn duration_ms(mut self, ms: u64) -> Self {
        self.duration_ms = Some(ms);
        self
    }

    /// Attach metadata.
    #[must_use]
    pub fn meta(mut self, meta: Value) -> Self {
        self.meta = Some(meta);
        self
    }
}

/// Lifecycle status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// The workflow is executing.
    Running,
    /// The workflow finished successfully.
    Complete,
    /// The workflow finished with an error.
    Failed,
}

impl SessionStatus {
    /// String form, matching the serialized representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One workflow run: identity, inputs, outputs, and the event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Unique session id.
    pub id: String,
    /// Name of the workflow that ran.
    pub workflow_name: String,
    /// Bound inputs at start.
    pub inputs: BTreeMap<String, String>,
    /// Current status.
    pub status: SessionStatus,
    /// Goal outputs accumulated so far.
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,
    /// Append-only event log.
    #[serde(default)]
    pub events: Vec<Event>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Create a fresh running session.
    #[must_use]
    pub fn new(workflow_name: impl Into<String>, inputs: BTreeMap<String, String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            workflow_name: workflow_name.into(),
            inputs,
            status: SessionStatus::Running,
            outputs: BTreeMap::new(),
            events: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Persists sessions as `<dir>/<id>.json` with atomic replace.
#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    /// Create a store rooted at the given directory.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of a session file.
    #[must_use]
    pub fn path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    /// Persist a session. Writes a sibling temp file and renames over the
    /// target, so readers never observe a partial document.
    ///
    /// # Errors
    ///
    /// Returns an I/O or serialization error.
    pub fn save(&self, session: &Session) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let target = self.path(&session.id);
        let tmp = self.dir.join(format!(".{}.json.tmp", session.id));
        let json = serde_json::to_vec_pretty(session)?;
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &target)?;
        Ok(())
    }

    /// Load a session by id.
    ///
    /// # Errors
    ///
    /// Returns an I/O or deserialization error.
    pub fn load(&self, id: &str) -> Result<Session> {
        let bytes = fs::read(self.path(id))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Load a session from an arbitrary file path.
    ///
    /// # Errors
    ///
    /// Returns an I/O or deserialization error.
    pub fn load_file(path: impl AsRef<Path>) -> Result<Session> {
        let bytes = fs::read(path.as_ref())?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Shared, serialised writer over a session.
///
/// Parallel tool tasks clone this handle; the inner mutex totally orders
/// their appends, and every append persists the full document before the
/// lock is released.
#[derive(Clone)]
pub struct SessionLog {
    inner: Arc<Mutex<Session>>,
    store: Option<Arc<SessionStore>>,
}

impl SessionLog {
    /// Create a log for a fresh session and persist the initial state.
    ///
    /// # Errors
    ///
    /// Returns a persistence error from the initial save.
    pub fn new(session: Session, store: Option<Arc<SessionStore>>) -> Result<Self> {
        if let Some(ref store) = store {
            store.save(&session)?;
        }
        Ok(Self {
            inner: Arc::new(Mutex::new(session)),
            store,
        })
    }

    /// Create an in-memory log (tests, compat mode).
    #[must_use]
    pub fn in_memory(session: Session) -> Self {
        Self {
            inner: Arc::new(Mutex::new(session)),
            store: None,
        }
    }

    fn with_session<R>(&self, f: impl FnOnce(&mut Session) -> R) -> Result<R> {
        let mut session = self
            .inner
            .lock()
            .map_err(|_| Error::internal("session lock poisoned"))?;
        let result = f(&mut session);
        if let Some(ref store) = self.store {
            store.save(&session)?;
        }
        Ok(result)
    }

    /// Session id.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the lock is poisoned.
    pub fn id(&self) -> Result<String> {
        let session = self
            .inner
            .lock()
            .map_err(|_| Error::internal("session lock poisoned"))?;
        Ok(session.id.clone())
    }

    /// Append an event and persist.
    ///
    /// # Errors
    ///
    /// Returns a persistence error.
    pub fn record(&self, event: Event) -> Result<()> {
        self.with_session(|session| {
            session.updated_at = event.timestamp;
            session.events.push(event);
        })
    }

    /// Update the session status and persist.
    ///
    /// # Errors
    ///
    /// Returns a persistence error.
    pub fn set_status(&self, status: SessionStatus) -> Result<()> {
        self.with_session(|session| {
            session.status = status;
            session.updated_at = Utc::now();
        })
    }

    /// Record a goal output and persist.
    ///
    /// # Errors
    ///
    /// Returns a persistence error.
    pub fn set_output(&self, name: impl Into<String>, value: impl Into<String>) -> Result<()> {
        self.with_session(|session| {
            session.outputs.insert(name.into(), value.into());
            session.updated_at = Utc::now();
        })
    }

    /// Clone the current session state.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the lock is poisoned.
    pub fn snapshot(&self) -> Result<Session> {
        let session = self
            .inner
            .lock()
            .map_err(|_| Error::internal("session lock poisoned"))?;
        Ok(session.clone())
    }
}

impl std::fmt::Debug for SessionLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionLog")
            .field("persistent", &self.store.is_some())
            .finish_non_exhaustive()
    }
}
