//! Checkpoint types and the per-session checkpoint store.
//!
//! Each supervised goal leaves a paper trail of one JSON file per phase:
//! `<sessionPath>/checkpoints/<sessionId>/<stepId>.<phase>.json`. Files
//! land atomically and are never rewritten; a reorientation re-run gets a
//! numbered sibling instead of clobbering the original record.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;

use crate::error::Result;

/// Model-declared confidence in a commitment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    /// Low confidence; reconciliation escalates on this alone.
    Low,
    /// Medium confidence.
    #[default]
    Medium,
    /// High confidence.
    High,
}

/// The COMMIT phase record: what the model declared it would do.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PreCheckpoint {
    /// Step (goal) identifier this checkpoint belongs to.
    pub step_id: String,
    /// The instruction the goal was given.
    pub instruction: String,
    /// The model's restatement of the instruction.
    #[serde(default)]
    pub interpretation: String,
    /// What the model considers in scope.
    #[serde(default)]
    pub scope_in: Vec<String>,
    /// What the model considers out of scope.
    #[serde(default)]
    pub scope_out: Vec<String>,
    /// Planned approach.
    #[serde(default)]
    pub approach: String,
    /// Tools the model plans to use.
    #[serde(default)]
    pub tools_planned: Vec<String>,
    /// Predicted shape of the output.
    #[serde(default)]
    pub predicted_output: String,
    /// Declared confidence.
    #[serde(default)]
    pub confidence: Confidence,
    /// Stated assumptions.
    #[serde(default)]
    pub assumptions: Vec<String>,
}

/// The post-execution self-assessment record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PostCheckpoint {
    /// Step (goal) identifier this checkpoint belongs to.
    pub step_id: String,
    /// The goal's actual output.
    pub actual_output: String,
    /// Tools actually invoked during execution.
    #[serde(default)]
    pub tools_used: Vec<String>,
    /// Whether the model judges it met its commitment.
    #[serde(default = "default_true")]
    pub met_commitment: bool,
    /// Deviations from the declared approach.
    #[serde(default)]
    pub deviations: Vec<String>,
    /// Concerns raised during execution.
    #[serde(default)]
    pub concerns: Vec<String>,
    /// Unexpected observations.
    #[serde(default)]
    pub unexpected: Vec<String>,
}

const fn default_true() -> bool {
    true
}

/// The RECONCILE phase record: which static rules fired.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconcileResult {
    /// Names of triggered rules.
    pub triggers: Vec<String>,
    /// Whether SUPERVISE must run (`triggers` non-empty).
    pub supervise: bool,
}

/// Supervisor verdicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Accept the execution and move on.
    Continue,
    /// Re-execute once with a correction appended to the prompt.
    Reorient,
    /// Stop and wait for a human resolution.
    Pause,
}

impl Verdict {
    /// String form, matching the serialized representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Continue => "continue",
            Self::Reorient => "reorient",
            Self::Pause => "pause",
        }
    }
}

/// The SUPERVISE phase record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuperviseResult {
    /// The verdict.
    pub verdict: Verdict,
    /// Correction text; non-empty iff the verdict is reorient.
    #[serde(default)]
    pub correction: String,
}

/// Names of the four persisted phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// COMMIT output (`pre`).
    Pre,
    /// Self-assessment output (`post`).
    Post,
    /// RECONCILE output (`reconcile`).
    Reconcile,
    /// SUPERVISE output (`supervise`).
    Supervise,
}

impl Phase {
    /// File-name component for the phase.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pre => "pre",
            Self::Post => "post",
            Self::Reconcile => "reconcile",
            Self::Supervise => "supervise",
        }
    }
}

/// Append-only directory of checkpoint files, one per phase per step.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    /// Create a store rooted at the given checkpoints directory.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding one session's checkpoints.
    #[must_use]
    pub fn session_dir(&self, session_id: &str) -> PathBuf {
        self.dir.join(session_id)
    }

    /// Persist one phase record and return the path written.
    ///
    /// Writes are atomic (temp + rename) and never clobber: when a file
    /// for the phase already exists (a reorientation re-run), a numbered
    /// sibling `<stepId>.<phase>.<n>.json` is written instead.
    ///
    /// # Errors
    ///
    /// Returns an I/O or serialization error.
    pub fn save<T: Serialize>(
        &self,
        session_id: &str,
        step_id: &str,
        phase: Phase,
        record: &T,
    ) -> Result<PathBuf> {
        let dir = self.session_dir(session_id);
        fs::create_dir_all(&dir)?;

        let mut target = dir.join(format!("{step_id}.{}.json", phase.as_str()));
        let mut revision = 1u32;
        while target.exists() {
            target = dir.join(format!("{step_id}.{}.{revision}.json", phase.as_str()));
            revision += 1;
        }

        let tmp = dir.join(format!(".{step_id}.{}.tmp", phase.as_str()));
        fs::write(&tmp, serde_json::to_vec_pretty(record)?)?;
        fs::rename(&tmp, &target)?;
        Ok(target)
    }

    /// Load the primary record for a phase.
    ///
    /// # Errors
    ///
    /// Returns an I/O or deserialization error.
    pub fn load<T: DeserializeOwned>(
        &self,
        session_id: &str,
        step_id: &str,
        phase: Phase,
    ) -> Result<T> {
        let path = self
            .session_dir(session_id)
            .join(format!("{step_id}.{}.json", phase.as_str()));
        let bytes = fs::read(&path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Whether a phase record exists for the step.
    #[must_use]
    pub fn exists(&self, session_id: &str, step_id: &str, phase: Phase) -> bool {
        self.session_dir(session_id)
            .join(format!("{step_id}.{}.json", phase.as_str()))
            .exists()
    }

    /// Root directory of the store.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, CheckpointStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = CheckpointStore::new(dir.path().join("checkpoints"));
        (dir, store)
    }

    #[test]
    fn save_and_load_pre_checkpoint() {
        let (_guard, store) = store();
        let pre = PreCheckpoint {
            step_id: "analyze".to_string(),
            instruction: "Analyze the request".to_string(),
            confidence: Confidence::High,
            tools_planned: vec!["read_file".to_string()],
            ..PreCheckpoint::default()
        };
        store.save("sess-1", "analyze", Phase::Pre, &pre).unwrap();

        let loaded: PreCheckpoint = store.load("sess-1", "analyze", Phase::Pre).unwrap();
        assert_eq!(loaded.step_id, "analyze");
        assert_eq!(loaded.confidence, Confidence::High);
        assert!(store.exists("sess-1", "analyze", Phase::Pre));
    }

    #[test]
    fn existing_files_are_never_rewritten() {
        let (_guard, store) = store();
        let first = ReconcileResult {
            triggers: vec!["confidence_low".to_string()],
            supervise: true,
        };
        let path_a = store.save("s", "g", Phase::Reconcile, &first).unwrap();
        let second = ReconcileResult::default();
        let path_b = store.save("s", "g", Phase::Reconcile, &second).unwrap();

        assert_ne!(path_a, path_b);
        // The original content survives.
        let loaded: ReconcileResult = store.load("s", "g", Phase::Reconcile).unwrap();
        assert_eq!(loaded.triggers, vec!["confidence_low"]);
    }

    #[test]
    fn sessions_are_isolated() {
        let (_guard, store) = store();
        store
            .save("a", "g", Phase::Post, &PostCheckpoint::default())
            .unwrap();
        assert!(store.exists("a", "g", Phase::Post));
        assert!(!store.exists("b", "g", Phase::Post));
    }

    #[test]
    fn post_defaults_met_commitment_true() {
        let parsed: PostCheckpoint =
            serde_json::from_str(r#"{"step_id": "g", "actual_output": "x"}"#).unwrap();
        assert!(parsed.met_commitment);
    }

    #[test]
    fn phase_file_names() {
        assert_eq!(Phase::Pre.as_str(), "pre");
        assert_eq!(Phase::Post.as_str(), "post");
        assert_eq!(Phase::Reconcile.as_str(), "reconcile");
        assert_eq!(Phase::Supervise.as_str(), "supervise");
    }

    #[test]
    fn verdict_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&Verdict::Reorient).unwrap(), r#""reorient""#);
    }
}
