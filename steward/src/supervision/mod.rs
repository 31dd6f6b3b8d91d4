//! The four-phase supervision engine.
//!
//! Every goal runs COMMIT and EXECUTE; RECONCILE and SUPERVISE run only
//! when the goal's effective supervision flag is set:
//!
//! 1. **COMMIT** — the model declares interpretation, scope, approach,
//!    planned tools, predicted output, confidence, and assumptions
//!    before touching anything.
//! 2. **EXECUTE** — the goal loop (driven by the executor).
//! 3. **RECONCILE** — deterministic rules compare the commitment to the
//!    post-execution self-assessment.
//! 4. **SUPERVISE** — a supervisor LLM rules continue / reorient /
//!    pause when reconciliation fired.
//!
//! COMMIT and the self-assessment degrade gracefully on provider or
//! parse failure; execution is never aborted by its own paperwork.
//! Every phase persists a checkpoint and emits a `phase_*` event with
//! its duration.

pub mod checkpoint;

use std::sync::Arc;
use std::time::Instant;

use serde::Deserialize;
use serde::Serialize;
use tracing::{debug, warn};

pub use checkpoint::{
    CheckpointStore, Confidence, Phase, PostCheckpoint, PreCheckpoint, ReconcileResult,
    SuperviseResult, Verdict,
};

use crate::chat::{ChatRequest, Message, Provider};
use crate::error::Result;
use crate::json_utils;
use crate::session::{Event, EventType, SessionLog};
use crate::usage::Usage;

/// Names of the reconcile trigger rules.
pub mod triggers {
    /// The self-assessment reported an unmet commitment.
    pub const COMMITMENT_UNMET: &str = "commitment_unmet";
    /// A tool was used that was absent from the plan.
    pub const TOOLS_DIVERGED: &str = "tools_diverged";
    /// The output or the tools touched something declared out of scope.
    pub const SCOPE_OUT_TOUCHED: &str = "scope_out_touched";
    /// The self-assessment raised concerns.
    pub const CONCERNS_NONEMPTY: &str = "concerns_nonempty";
    /// The self-assessment reported unexpected observations.
    pub const UNEXPECTED_NONEMPTY: &str = "unexpected_nonempty";
    /// The commitment carried low confidence.
    pub const CONFIDENCE_LOW: &str = "confidence_low";
    /// The self-assessment reported deviations from the approach.
    pub const DEVIATIONS_NONEMPTY: &str = "deviations_nonempty";
}

const COMMIT_SYSTEM_PROMPT: &str = "Before executing the task below, commit to a plan. \
    Respond with a JSON object only: {\"interpretation\": \"your reading of the task\", \
    \"scope_in\": [\"things you will touch\"], \"scope_out\": [\"things you will not touch\"], \
    \"approach\": \"how you will proceed\", \"tools_planned\": [\"tool names\"], \
    \"predicted_output\": \"what the result will look like\", \
    \"confidence\": \"low\"|\"medium\"|\"high\", \"assumptions\": [\"...\"]}";

const ASSESS_SYSTEM_PROMPT: &str = "Compare the actual result of a task against the \
    commitment made beforehand. Respond with a JSON object only: \
    {\"met_commitment\": true|false, \"deviations\": [\"...\"], \"concerns\": [\"...\"], \
    \"unexpected\": [\"...\"]}";

const SUPERVISE_SYSTEM_PROMPT: &str = "You supervise an agent that just executed a task. \
    You receive its pre-execution commitment, its post-execution self-assessment, and the \
    list of reconciliation triggers that fired. Decide how to proceed. Respond with a JSON \
    object only: {\"verdict\": \"continue\"|\"reorient\"|\"pause\", \"correction\": \"...\"}. \
    A reorient verdict requires a concrete correction; use pause only when a human must \
    intervene.";

/// Identifies where a phase's artifacts belong.
#[derive(Debug, Clone, Copy)]
pub struct PhaseScope<'a> {
    /// Session the checkpoints belong to.
    pub session_id: &'a str,
    /// Goal (step id) being executed.
    pub goal: &'a str,
}

/// JSON shape demanded from the COMMIT phase.
#[derive(Debug, Default, Deserialize)]
struct CommitReply {
    #[serde(default)]
    interpretation: String,
    #[serde(default)]
    scope_in: Vec<String>,
    #[serde(default)]
    scope_out: Vec<String>,
    #[serde(default)]
    approach: String,
    #[serde(default)]
    tools_planned: Vec<String>,
    #[serde(default)]
    predicted_output: String,
    #[serde(default)]
    confidence: Confidence,
    #[serde(default)]
    assumptions: Vec<String>,
}

/// JSON shape demanded from the self-assessment.
#[derive(Debug, Deserialize)]
struct AssessReply {
    #[serde(default = "default_true")]
    met_commitment: bool,
    #[serde(default)]
    deviations: Vec<String>,
    #[serde(default)]
    concerns: Vec<String>,
    #[serde(default)]
    unexpected: Vec<String>,
}

const fn default_true() -> bool {
    true
}

/// JSON shape demanded from the SUPERVISE phase.
#[derive(Debug, Deserialize)]
struct SuperviseReply {
    verdict: String,
    #[serde(default)]
    correction: String,
}

/// Drives the commit, assessment, reconcile, and supervise phases around
/// the executor's goal loop.
pub struct SupervisionEngine {
    provider: Arc<dyn Provider>,
    store: Option<CheckpointStore>,
}

impl SupervisionEngine {
    /// Create an engine around the supervisor provider.
    #[must_use]
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self {
            provider,
            store: None,
        }
    }

    /// Attach a checkpoint store.
    #[must_use]
    pub fn with_store(mut self, store: CheckpointStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Persist a phase record and emit the `checkpoint` event.
    fn persist<T: Serialize>(
        &self,
        scope: PhaseScope<'_>,
        phase: Phase,
        record: &T,
        log: &SessionLog,
    ) -> Result<()> {
        let Some(ref store) = self.store else {
            return Ok(());
        };
        let path = store.save(scope.session_id, scope.goal, phase, record)?;
        log.record(
            Event::new(EventType::Checkpoint)
                .goal(scope.goal)
                .content(path.display().to_string())
                .meta(serde_json::json!({"phase": phase.as_str()})),
        )
    }

    /// COMMIT: obtain and persist the pre-execution commitment.
    ///
    /// Provider or parse failures degrade to a low-confidence checkpoint
    /// with a recorded assumption; they never abort the goal.
    ///
    /// # Errors
    ///
    /// Returns session or checkpoint persistence errors only.
    pub async fn commit(
        &self,
        scope: PhaseScope<'_>,
        instruction: &str,
        log: &SessionLog,
        usage: &mut Usage,
    ) -> Result<PreCheckpoint> {
        let started = Instant::now();
        let request = ChatRequest::with_messages(vec![
            Message::system(COMMIT_SYSTEM_PROMPT),
            Message::user(instruction.to_string()),
        ]);

        let reply = match self.provider.chat(&request).await {
            Ok(response) => {
                *usage += response.usage;
                json_utils::extract_object(&response.content)
                    .and_then(|v| serde_json::from_value::<CommitReply>(v).ok())
            }
            Err(e) => {
                warn!(goal = scope.goal, error = %e, "commit phase provider failure");
                log.record(
                    Event::new(EventType::System)
                        .goal(scope.goal)
                        .content(format!("commit degraded: {e}")),
                )?;
                None
            }
        };

        let pre = match reply {
            Some(reply) => PreCheckpoint {
                step_id: scope.goal.to_string(),
                instruction: instruction.to_string(),
                interpretation: reply.interpretation,
                scope_in: reply.scope_in,
                scope_out: reply.scope_out,
                approach: reply.approach,
                tools_planned: reply.tools_planned,
                predicted_output: reply.predicted_output,
                confidence: reply.confidence,
                assumptions: reply.assumptions,
            },
            None => PreCheckpoint {
                step_id: scope.goal.to_string(),
                instruction: instruction.to_string(),
                confidence: Confidence::Low,
                assumptions: vec!["Failed to get commitment".to_string()],
                ..PreCheckpoint::default()
            },
        };

        self.persist(scope, Phase::Pre, &pre, log)?;
        log.record(
            Event::new(EventType::PhaseCommit)
                .goal(scope.goal)
                .duration_ms(elapsed_ms(started))
                .meta(serde_json::json!({
                    "confidence": pre.confidence,
                    "tools_planned": pre.tools_planned.clone(),
                })),
        )?;
        Ok(pre)
    }

    /// Self-assessment: compare the actual output against the
    /// commitment and persist the post checkpoint.
    ///
    /// Parse or provider failures default to `met_commitment = true`.
    ///
    /// # Errors
    ///
    /// Returns session or checkpoint persistence errors only.
    pub async fn assess(
        &self,
        scope: PhaseScope<'_>,
        pre: &PreCheckpoint,
        actual_output: &str,
        tools_used: &[String],
        log: &SessionLog,
        usage: &mut Usage,
    ) -> Result<PostCheckpoint> {
        let commitment = serde_json::to_string_pretty(pre).unwrap_or_default();
        let request = ChatRequest::with_messages(vec![
            Message::system(ASSESS_SYSTEM_PROMPT),
            Message::user(format!(
                "Commitment:\n{commitment}\n\nActual output:\n{actual_output}\n\n\
                 Tools actually used: {}",
                tools_used.join(", "),
            )),
        ]);

        let reply = match self.provider.chat(&request).await {
            Ok(response) => {
                *usage += response.usage;
                json_utils::extract_object(&response.content)
                    .and_then(|v| serde_json::from_value::<AssessReply>(v).ok())
            }
            Err(e) => {
                warn!(goal = scope.goal, error = %e, "assessment provider failure");
                log.record(
                    Event::new(EventType::System)
                        .goal(scope.goal)
                        .content(format!("self-assessment degraded: {e}")),
                )?;
                None
            }
        };

        let post = match reply {
            Some(reply) => PostCheckpoint {
                step_id: scope.goal.to_string(),
                actual_output: actual_output.to_string(),
                tools_used: tools_used.to_vec(),
                met_commitment: reply.met_commitment,
                deviations: reply.deviations,
                concerns: reply.concerns,
                unexpected: reply.unexpected,
            },
            None => PostCheckpoint {
                step_id: scope.goal.to_string(),
                actual_output: actual_output.to_string(),
                tools_used: tools_used.to_vec(),
                met_commitment: true,
                ..PostCheckpoint::default()
            },
        };

        self.persist(scope, Phase::Post, &post, log)?;
        Ok(post)
    }

    /// The deterministic RECONCILE rules, exposed for direct testing.
    #[must_use]
    pub fn reconcile_rules(pre: &PreCheckpoint, post: &PostCheckpoint) -> ReconcileResult {
        let mut fired = Vec::new();

        if !post.met_commitment {
            fired.push(triggers::COMMITMENT_UNMET.to_string());
        }

        if post
            .tools_used
            .iter()
            .any(|used| !pre.tools_planned.contains(used))
        {
            fired.push(triggers::TOOLS_DIVERGED.to_string());
        }

        let output_lower = post.actual_output.to_lowercase();
        let touched = pre.scope_out.iter().any(|token| {
            let token = token.trim().to_lowercase();
            !token.is_empty()
                && (output_lower.contains(&token)
                    || post.tools_used.iter().any(|t| t.to_lowercase().contains(&token)))
        });
        if touched {
            fired.push(triggers::SCOPE_OUT_TOUCHED.to_string());
        }

        if !post.concerns.is_empty() {
            fired.push(triggers::CONCERNS_NONEMPTY.to_string());
        }
        if !post.unexpected.is_empty() {
            fired.push(triggers::UNEXPECTED_NONEMPTY.to_string());
        }
        if pre.confidence == Confidence::Low {
            fired.push(triggers::CONFIDENCE_LOW.to_string());
        }
        if !post.deviations.is_empty() {
            fired.push(triggers::DEVIATIONS_NONEMPTY.to_string());
        }

        ReconcileResult {
            supervise: !fired.is_empty(),
            triggers: fired,
        }
    }

    /// RECONCILE: run the static rules, persist, and emit the phase
    /// event (with `meta.escalate` carrying the supervise decision).
    ///
    /// # Errors
    ///
    /// Returns session or checkpoint persistence errors only.
    pub fn reconcile(
        &self,
        scope: PhaseScope<'_>,
        pre: &PreCheckpoint,
        post: &PostCheckpoint,
        log: &SessionLog,
    ) -> Result<ReconcileResult> {
        let started = Instant::now();
        let result = Self::reconcile_rules(pre, post);
        debug!(goal = scope.goal, triggers = ?result.triggers, "reconcile complete");

        self.persist(scope, Phase::Reconcile, &result, log)?;
        log.record(
            Event::new(EventType::PhaseReconcile)
                .goal(scope.goal)
                .duration_ms(elapsed_ms(started))
                .meta(serde_json::json!({
                    "triggers": result.triggers.clone(),
                    "escalate": result.supervise,
                })),
        )?;
        Ok(result)
    }

    /// SUPERVISE: ask the supervisor provider for a verdict.
    ///
    /// Provider or parse failures degrade to a `continue` verdict with a
    /// logged system event; an empty correction downgrades a reorient
    /// verdict the same way.
    ///
    /// # Errors
    ///
    /// Returns session or checkpoint persistence errors only.
    pub async fn supervise(
        &self,
        scope: PhaseScope<'_>,
        pre: &PreCheckpoint,
        post: &PostCheckpoint,
        reconcile: &ReconcileResult,
        log: &SessionLog,
        usage: &mut Usage,
    ) -> Result<SuperviseResult> {
        let started = Instant::now();
        let request = ChatRequest::with_messages(vec![
            Message::system(SUPERVISE_SYSTEM_PROMPT),
            Message::user(format!(
                "Commitment:\n{}\n\nSelf-assessment:\n{}\n\nTriggers: {}",
                serde_json::to_string_pretty(pre).unwrap_or_default(),
                serde_json::to_string_pretty(post).unwrap_or_default(),
                reconcile.triggers.join(", "),
            )),
        ]);

        let reply = match self.provider.chat(&request).await {
            Ok(response) => {
                *usage += response.usage;
                json_utils::extract_object(&response.content)
                    .and_then(|v| serde_json::from_value::<SuperviseReply>(v).ok())
            }
            Err(e) => {
                warn!(goal = scope.goal, error = %e, "supervise provider failure");
                log.record(
                    Event::new(EventType::System)
                        .goal(scope.goal)
                        .content(format!("supervise degraded: {e}")),
                )?;
                None
            }
        };

        let result = match reply {
            Some(reply) => {
                let verdict = match reply.verdict.as_str() {
                    "reorient" if !reply.correction.trim().is_empty() => Verdict::Reorient,
                    "reorient" => {
                        log.record(
                            Event::new(EventType::System)
                                .goal(scope.goal)
                                .content("reorient verdict without correction; continuing"),
                        )?;
                        Verdict::Continue
                    }
                    "pause" => Verdict::Pause,
                    _ => Verdict::Continue,
                };
                SuperviseResult {
                    correction: if verdict == Verdict::Reorient {
                        reply.correction
                    } else {
                        String::new()
                    },
                    verdict,
                }
            }
            None => SuperviseResult {
                verdict: Verdict::Continue,
                correction: String::new(),
            },
        };

        self.persist(scope, Phase::Supervise, &result, log)?;
        log.record(
            Event::new(EventType::PhaseSupervise)
                .goal(scope.goal)
                .duration_ms(elapsed_ms(started))
                .meta(serde_json::json!({
                    "verdict": result.verdict,
                    "correction": result.correction.clone(),
                })),
        )?;
        Ok(result)
    }
}

impl std::fmt::Debug for SupervisionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupervisionEngine")
            .field("store", &self.store.is_some())
            .finish_non_exhaustive()
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::MockProvider;
    use crate::session::Session;
    use std::collections::BTreeMap;

    fn log() -> SessionLog {
        SessionLog::in_memory(Session::new("t", BTreeMap::new()))
    }

    fn scope<'a>() -> PhaseScope<'a> {
        PhaseScope {
            session_id: "sess",
            goal: "analyze",
        }
    }

    mod reconcile_rules {
        use super::*;

        fn pre() -> PreCheckpoint {
            PreCheckpoint {
                step_id: "g".to_string(),
                tools_planned: vec!["read_file".to_string()],
                confidence: Confidence::Medium,
                scope_out: vec!["database".to_string()],
                ..PreCheckpoint::default()
            }
        }

        fn post() -> PostCheckpoint {
            PostCheckpoint {
                step_id: "g".to_string(),
                actual_output: "all fine".to_string(),
                tools_used: vec!["read_file".to_string()],
                met_commitment: true,
                ..PostCheckpoint::default()
            }
        }

        #[test]
        fn clean_run_does_not_escalate() {
            let result = SupervisionEngine::reconcile_rules(&pre(), &post());
            assert!(!result.supervise);
            assert!(result.triggers.is_empty());
        }

        #[test]
        fn commitment_unmet_fires() {
            let mut p = post();
            p.met_commitment = false;
            let result = SupervisionEngine::reconcile_rules(&pre(), &p);
            assert!(result.triggers.contains(&triggers::COMMITMENT_UNMET.to_string()));
            assert!(result.supervise);
        }

        #[test]
        fn unplanned_tool_fires_divergence() {
            let mut p = post();
            p.tools_used.push("write_file".to_string());
            let result = SupervisionEngine::reconcile_rules(&pre(), &p);
            assert!(result.triggers.contains(&triggers::TOOLS_DIVERGED.to_string()));
        }

        #[test]
        fn scope_out_token_in_output_fires() {
            let mut p = post();
            p.actual_output = "I also migrated the Database schema".to_string();
            let result = SupervisionEngine::reconcile_rules(&pre(), &p);
            assert!(result.triggers.contains(&triggers::SCOPE_OUT_TOUCHED.to_string()));
        }

        #[test]
        fn low_confidence_fires() {
            let mut p = pre();
            p.confidence = Confidence::Low;
            let result = SupervisionEngine::reconcile_rules(&p, &post());
            assert_eq!(result.triggers, vec![triggers::CONFIDENCE_LOW]);
        }

        #[test]
        fn assessment_lists_fire_individually() {
            let mut p = post();
            p.deviations = vec!["used another file".to_string()];
            p.concerns = vec!["output looks thin".to_string()];
            p.unexpected = vec!["saw a lockfile".to_string()];
            let result = SupervisionEngine::reconcile_rules(&pre(), &p);
            for t in [
                triggers::CONCERNS_NONEMPTY,
                triggers::UNEXPECTED_NONEMPTY,
                triggers::DEVIATIONS_NONEMPTY,
            ] {
                assert!(result.triggers.contains(&t.to_string()), "missing {t}");
            }
        }
    }

    #[tokio::test]
    async fn commit_parses_the_declared_plan() {
        let provider = Arc::new(MockProvider::with_texts(&[r#"{
            "interpretation": "analyze the request",
            "scope_in": ["src"],
            "scope_out": ["deps"],
            "approach": "read then summarize",
            "tools_planned": ["read_file"],
            "predicted_output": "a summary",
            "confidence": "high",
            "assumptions": ["repo is small"]
        }"#]));
        let engine = SupervisionEngine::new(provider);
        let mut usage = Usage::zero();
        let pre = engine
            .commit(scope(), "Analyze the request", &log(), &mut usage)
            .await
            .unwrap();

        assert_eq!(pre.step_id, "analyze");
        assert_eq!(pre.confidence, Confidence::High);
        assert_eq!(pre.tools_planned, vec!["read_file"]);
        assert_eq!(pre.instruction, "Analyze the request");
    }

    #[tokio::test]
    async fn commit_parse_failure_degrades_to_low_confidence() {
        let engine = SupervisionEngine::new(Arc::new(MockProvider::with_texts(&["not json"])));
        let mut usage = Usage::zero();
        let pre = engine
            .commit(scope(), "Do the thing", &log(), &mut usage)
            .await
            .unwrap();
        assert_eq!(pre.confidence, Confidence::Low);
        assert_eq!(pre.assumptions, vec!["Failed to get commitment"]);
    }

    #[tokio::test]
    async fn commit_provider_failure_is_non_fatal() {
        let engine = SupervisionEngine::new(Arc::new(MockProvider::failing("down")));
        let session_log = log();
        let mut usage = Usage::zero();
        let pre = engine
            .commit(scope(), "Do the thing", &session_log, &mut usage)
            .await
            .unwrap();
        assert_eq!(pre.confidence, Confidence::Low);

        let events = session_log.snapshot().unwrap().events;
        assert!(events.iter().any(|e| e.event_type == EventType::System));
        assert!(events.iter().any(|e| e.event_type == EventType::PhaseCommit));
    }

    #[tokio::test]
    async fn assess_defaults_met_commitment_on_parse_failure() {
        let engine = SupervisionEngine::new(Arc::new(MockProvider::with_texts(&["garbage"])));
        let mut usage = Usage::zero();
        let post = engine
            .assess(
                scope(),
                &PreCheckpoint::default(),
                "output",
                &["read_file".to_string()],
                &log(),
                &mut usage,
            )
            .await
            .unwrap();
        assert!(post.met_commitment);
        assert_eq!(post.tools_used, vec!["read_file"]);
    }

    #[tokio::test]
    async fn checkpoints_land_on_disk_when_store_configured() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        let engine = SupervisionEngine::new(Arc::new(MockProvider::with_texts(&["{}"])))
            .with_store(store.clone());
        let session_log = log();
        let mut usage = Usage::zero();
        let pre = engine
            .commit(scope(), "task", &session_log, &mut usage)
            .await
            .unwrap();
        let post = engine
            .assess(scope(), &pre, "out", &[], &session_log, &mut usage)
            .await
            .unwrap();
        engine.reconcile(scope(), &pre, &post, &session_log).unwrap();

        assert!(store.exists("sess", "analyze", Phase::Pre));
        assert!(store.exists("sess", "analyze", Phase::Post));
        assert!(store.exists("sess", "analyze", Phase::Reconcile));

        let events = session_log.snapshot().unwrap().events;
        let checkpoints = events
            .iter()
            .filter(|e| e.event_type == EventType::Checkpoint)
            .count();
        assert_eq!(checkpoints, 3);
    }

    #[tokio::test]
    async fn supervise_reorient_requires_correction() {
        let engine = SupervisionEngine::new(Arc::new(MockProvider::with_texts(&[
            r#"{"verdict": "reorient", "correction": ""}"#,
        ])));
        let mut usage = Usage::zero();
        let result = engine
            .supervise(
                scope(),
                &PreCheckpoint::default(),
                &PostCheckpoint::default(),
                &ReconcileResult::default(),
                &log(),
                &mut usage,
            )
            .await
            .unwrap();
        assert_eq!(result.verdict, Verdict::Continue);
    }

    #[tokio::test]
    async fn supervise_parses_reorient_with_correction() {
        let engine = SupervisionEngine::new(Arc::new(MockProvider::with_texts(&[
            r#"{"verdict": "reorient", "correction": "only modify README"}"#,
        ])));
        let session_log = log();
        let mut usage = Usage::zero();
        let result = engine
            .supervise(
                scope(),
                &PreCheckpoint::default(),
                &PostCheckpoint::default(),
                &ReconcileResult {
                    triggers: vec![triggers::TOOLS_DIVERGED.to_string()],
                    supervise: true,
                },
                &session_log,
                &mut usage,
            )
            .await
            .unwrap();
        assert_eq!(result.verdict, Verdict::Reorient);
        assert_eq!(result.correction, "only modify README");

        let events = session_log.snapshot().unwrap().events;
        assert!(
            events
                .iter()
                .any(|e| e.event_type == EventType::PhaseSupervise)
        );
    }

    #[tokio::test]
    async fn supervise_failure_degrades_to_continue() {
        let engine = SupervisionEngine::new(Arc::new(MockProvider::failing("offline")));
        let mut usage = Usage::zero();
        let result = engine
            .supervise(
                scope(),
                &PreCheckpoint::default(),
                &PostCheckpoint::default(),
                &ReconcileResult::default(),
                &log(),
                &mut usage,
            )
            .await
            .unwrap();
        assert_eq!(result.verdict, Verdict::Continue);
    }
}
