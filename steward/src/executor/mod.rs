//! The workflow executor.
//!
//! Given a validated [`Workflow`], bound inputs, a provider, and a tool
//! registry, the executor walks the steps in source order, delegates
//! every goal to the supervision engine's four phases, and records each
//! observable transition on the session log.
//!
//! Construction is explicit: verifier, checkpoint store, sub-agent
//! runner, human channel, and session store are all optional
//! collaborators handed in up front. There are no ambient globals.

pub(crate) mod goal;
pub mod interpolate;
pub mod prompts;
pub mod structured;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{Instrument, info, info_span, warn};

use crate::agentfile::{DEFAULT_ITERATION_LIMIT, Goal, Step, StepKind, Supervision, Workflow};
use crate::chat::{ChatRequest, Message, Provider};
use crate::error::{ConfigError, Error, Result};
use crate::security::SecurityVerifier;
use crate::session::{Event, EventType, Session, SessionLog, SessionStatus, SessionStore};
use crate::subagent::{SubAgentOutcome, SubAgentRunner, SubAgentSpec};
use crate::supervision::{CheckpointStore, PhaseScope, SupervisionEngine, Verdict};
use crate::tool::{SpawnAgentTool, ToolRegistry};
use crate::usage::Usage;

use goal::{ChatLoop, ChatOutcome};
use interpolate::interpolate;

/// Cancels a running workflow from the outside.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Signal cancellation. Every suspension point observes it.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Cooperative cancellation token threaded through every suspension
/// point (LLM calls, tool calls, human waits).
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// Create a handle/token pair.
    #[must_use]
    pub fn new() -> (CancelHandle, Self) {
        let (tx, rx) = watch::channel(false);
        (CancelHandle { tx }, Self { rx })
    }

    /// Whether cancellation was signalled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve when cancellation is signalled; pend forever otherwise
    /// (including after the handle is dropped without cancelling).
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// External channel for supervised-human workflows: the runtime blocks
/// on `resolve` when a supervisor verdict pauses a goal.
#[async_trait]
pub trait HumanChannel: Send + Sync {
    /// Present the pause context and wait for a resolution message.
    async fn resolve(&self, prompt: &str) -> Result<String>;
}

/// The observable result of one workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Final session status.
    pub status: SessionStatus,
    /// Goal outputs (goal names and structured fields).
    pub outputs: BTreeMap<String, String>,
    /// Iterations executed per goal.
    pub iterations: BTreeMap<String, u32>,
    /// Error message when the status is failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Total tokens consumed across every provider call.
    pub usage: Usage,
    /// Session id for replay and checkpoint lookup.
    pub session_id: String,
}

/// One completed goal execution, as seen by iteration control.
#[derive(Debug, Clone)]
struct GoalRun {
    content: String,
    tool_calls: usize,
}

/// Per-run mutable state, initialised once per `run` call.
struct RunState<'a> {
    workflow: &'a Workflow,
    inputs: BTreeMap<String, String>,
    goal_outputs: Vec<(String, String)>,
    iterations: BTreeMap<String, u32>,
    usage: Usage,
    log: SessionLog,
    session_id: String,
    skills: HashMap<String, String>,
}

impl RunState<'_> {
    /// `inputs ∪ goalOutputs`, later goal outputs winning on conflict.
    fn env_map(&self) -> BTreeMap<String, String> {
        let mut env = self.inputs.clone();
        for (name, value) in &self.goal_outputs {
            env.insert(name.clone(), value.clone());
        }
        env
    }

    /// Insert or override a goal output, preserving first-insert order,
    /// and mirror it onto the session.
    fn upsert_output(&mut self, name: String, value: String) -> Result<()> {
        if let Some(entry) = self.goal_outputs.iter_mut().find(|(k, _)| *k == name) {
            entry.1 = value.clone();
        } else {
            self.goal_outputs.push((name.clone(), value.clone()));
        }
        self.log.set_output(name, value)
    }

    fn outputs_map(&self) -> BTreeMap<String, String> {
        self.goal_outputs.iter().cloned().collect()
    }

    /// Skill names for the system prompt, sorted for determinism.
    fn skill_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.skills.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Runs workflows. Cheap to construct; reusable across runs.
pub struct WorkflowExecutor {
    provider: Arc<dyn Provider>,
    registry: ToolRegistry,
    verifier: Option<Arc<SecurityVerifier>>,
    checkpoints: Option<CheckpointStore>,
    subagents: Option<Arc<dyn SubAgentRunner>>,
    human: Option<Arc<dyn HumanChannel>>,
    session_store: Option<Arc<SessionStore>>,
    cancel: CancelToken,
}

impl WorkflowExecutor {
    /// Create an executor over a provider and a tool registry.
    #[must_use]
    pub fn new(provider: Arc<dyn Provider>, registry: ToolRegistry) -> Self {
        let (_handle, cancel) = CancelToken::new();
        Self {
            provider,
            registry,
            verifier: None,
            checkpoints: None,
            subagents: None,
            human: None,
            session_store: None,
            cancel,
        }
    }

    /// Attach the security verifier; without one, tool calls run
    /// unverified.
    #[must_use]
    pub fn with_verifier(mut self, verifier: Arc<SecurityVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Attach the checkpoint store for supervision phases.
    #[must_use]
    pub fn with_checkpoints(mut self, store: CheckpointStore) -> Self {
        self.checkpoints = Some(store);
        self
    }

    /// Attach the sub-agent runner for multi-agent goals and
    /// `spawn_agent`.
    #[must_use]
    pub fn with_subagents(mut self, runner: Arc<dyn SubAgentRunner>) -> Self {
        self.subagents = Some(runner);
        self
    }

    /// Attach the human channel required by supervised-human workflows.
    #[must_use]
    pub fn with_human(mut self, channel: Arc<dyn HumanChannel>) -> Self {
        self.human = Some(channel);
        self
    }

    /// Persist sessions through the given store.
    #[must_use]
    pub fn with_session_store(mut self, store: Arc<SessionStore>) -> Self {
        self.session_store = Some(store);
        self
    }

    /// Use an externally controlled cancellation token.
    #[must_use]
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Execute a workflow.
    ///
    /// Pre-flight failures (missing human channel, missing required
    /// inputs) return `Err` before any event is emitted. Runtime
    /// failures finalise the session as failed and surface in the
    /// returned report instead.
    ///
    /// # Errors
    ///
    /// Returns configuration errors from pre-flight, or persistence
    /// errors from creating the session.
    pub async fn run(
        &self,
        workflow: &Workflow,
        inputs: BTreeMap<String, String>,
    ) -> Result<RunReport> {
        if workflow.has_supervised_human_steps() && self.human.is_none() {
            return Err(ConfigError::NoHumanChannel.into());
        }

        let mut bound = BTreeMap::new();
        for input in &workflow.inputs {
            let value = inputs
                .get(&input.name)
                .cloned()
                .or_else(|| input.default.clone())
                .ok_or_else(|| ConfigError::MissingInput(input.name.clone()))?;
            bound.insert(input.name.clone(), value);
        }
        // Undeclared extra inputs pass through to interpolation.
        for (name, value) in inputs {
            bound.entry(name).or_insert(value);
        }

        let session = Session::new(&workflow.name, bound.clone());
        let session_id = session.id.clone();
        let log = SessionLog::new(session, self.session_store.clone())?;

        let skills = workflow
            .agents
            .iter()
            .filter(|a| a.is_skill)
            .filter_map(|a| {
                a.skill_instructions
                    .clone()
                    .map(|instructions| (a.name.clone(), instructions))
            })
            .collect();

        let mut state = RunState {
            workflow,
            inputs: bound,
            goal_outputs: Vec::new(),
            iterations: BTreeMap::new(),
            usage: Usage::zero(),
            log: log.clone(),
            session_id: session_id.clone(),
            skills,
        };

        log.record(
            Event::new(EventType::WorkflowStart)
                .meta(serde_json::json!({"workflow": workflow.name.clone()})),
        )?;

        let engine = {
            let engine = SupervisionEngine::new(self.provider.clone());
            match &self.checkpoints {
                Some(store) => engine.with_store(store.clone()),
                None => engine,
            }
        };

        let span = info_span!("workflow", workflow.name = %workflow.name);
        let outcome = self.run_steps(&mut state, &engine).instrument(span).await;

        match outcome {
            Ok(()) => {
                log.record(Event::new(EventType::WorkflowEnd))?;
                log.set_status(SessionStatus::Complete)?;
                info!(workflow = %workflow.name, usage = %state.usage, "workflow complete");
                Ok(RunReport {
                    status: SessionStatus::Complete,
                    outputs: state.outputs_map(),
                    iterations: state.iterations,
                    error: None,
                    usage: state.usage,
                    session_id,
                })
            }
            Err(e) => {
                let message = e.to_string();
                warn!(workflow = %workflow.name, error = %message, "workflow failed");
                let _ = log.record(Event::new(EventType::WorkflowEnd).error(message.clone()));
                let _ = log.set_status(SessionStatus::Failed);
                Ok(RunReport {
                    status: SessionStatus::Failed,
                    outputs: state.outputs_map(),
                    iterations: state.iterations,
                    error: Some(message),
                    usage: state.usage,
                    session_id,
                })
            }
        }
    }

    async fn run_steps(&self, state: &mut RunState<'_>, engine: &SupervisionEngine) -> Result<()> {
        for step in &state.workflow.steps {
            for goal_name in &step.using_goals {
                let goal = state
                    .workflow
                    .goal(goal_name)
                    .ok_or_else(|| Error::internal(format!("unvalidated goal '{goal_name}'")))?;

                match step.kind {
                    StepKind::Run if goal.is_converge => {
                        let limit = effective_limit(
                            goal.within_limit,
                            goal.within_var.as_deref(),
                            &state.inputs,
                        )?;
                        self.iterate_goal(state, step, goal, limit, engine).await?;
                    }
                    StepKind::Run => {
                        self.run_goal(state, step, goal, engine).await?;
                        state.iterations.insert(goal.name.clone(), 1);
                    }
                    StepKind::Loop => {
                        let limit = effective_limit(
                            step.within_limit,
                            step.within_var.as_deref(),
                            &state.inputs,
                        )?;
                        self.iterate_goal(state, step, goal, limit, engine).await?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Iterate a goal until convergence or the limit.
    ///
    /// Convergence: the output byte-equals the previous iteration's, or
    /// an iteration issued no tool calls.
    async fn iterate_goal(
        &self,
        state: &mut RunState<'_>,
        step: &Step,
        goal: &Goal,
        limit: u32,
        engine: &SupervisionEngine,
    ) -> Result<()> {
        let mut previous: Option<String> = None;
        let mut count = 0u32;

        for _ in 0..limit {
            let run = self.run_goal(state, step, goal, engine).await?;
            count += 1;
            if previous.as_deref() == Some(run.content.as_str()) {
                break;
            }
            if run.tool_calls == 0 {
                break;
            }
            previous = Some(run.content);
        }

        state.iterations.insert(goal.name.clone(), count);
        Ok(())
    }

    /// Run one goal execution, bracketing every goal-tagged event with
    /// `goal_start`/`goal_end`.
    async fn run_goal(
        &self,
        state: &mut RunState<'_>,
        step: &Step,
        goal: &Goal,
        engine: &SupervisionEngine,
    ) -> Result<GoalRun> {
        let started = Instant::now();
        state
            .log
            .record(Event::new(EventType::GoalStart).goal(&goal.name).step(&step.name))?;

        let result = self.run_goal_inner(state, step, goal, engine).await;
        match result {
            Ok(run) => {
                state.log.record(
                    Event::new(EventType::GoalEnd)
                        .goal(&goal.name)
                        .step(&step.name)
                        .duration_ms(elapsed_ms(started)),
                )?;
                Ok(run)
            }
            Err(e) => {
                let _ = state.log.record(
                    Event::new(EventType::GoalEnd)
                        .goal(&goal.name)
                        .step(&step.name)
                        .error(e.to_string())
                        .duration_ms(elapsed_ms(started)),
                );
                Err(e)
            }
        }
    }

    async fn run_goal_inner(
        &self,
        state: &mut RunState<'_>,
        step: &Step,
        goal: &Goal,
        engine: &SupervisionEngine,
    ) -> Result<GoalRun> {
        let supervised = effective_supervision(state.workflow, step, goal);
        let session_id = state.session_id.clone();
        let scope = PhaseScope {
            session_id: &session_id,
            goal: &goal.name,
        };
        let base_prompt = self.build_goal_prompt(state, goal);

        // COMMIT and EXECUTE always run.
        let log = state.log.clone();
        let pre = engine
            .commit(scope, &base_prompt, &log, &mut state.usage)
            .await?;

        let mut outcome = self.execute_once(state, goal, &base_prompt).await?;

        if supervised {
            let post = engine
                .assess(
                    scope,
                    &pre,
                    &outcome.content,
                    &outcome.tools_used,
                    &log,
                    &mut state.usage,
                )
                .await?;
            let reconciled = engine.reconcile(scope, &pre, &post, &log)?;

            if reconciled.supervise {
                let verdict = engine
                    .supervise(scope, &pre, &post, &reconciled, &log, &mut state.usage)
                    .await?;

                match verdict.verdict {
                    Verdict::Continue => {}
                    Verdict::Reorient => {
                        let corrected = format!(
                            "{base_prompt}\n\n## Supervisor Correction\n{}",
                            verdict.correction
                        );
                        outcome = self.execute_once(state, goal, &corrected).await?;
                        // One self-assessment of the corrected run; no
                        // second supervise pass for the same goal.
                        engine
                            .assess(
                                scope,
                                &pre,
                                &outcome.content,
                                &outcome.tools_used,
                                &log,
                                &mut state.usage,
                            )
                            .await?;
                    }
                    Verdict::Pause => {
                        let Some(ref human) = self.human else {
                            return Err(ConfigError::NoHumanChannel.into());
                        };
                        let pause_prompt = format!(
                            "Goal '{}' was paused by the supervisor.\n\nInstruction:\n{}\n\n\
                             Last output:\n{}\n\nProvide a resolution to continue.",
                            goal.name, base_prompt, outcome.content,
                        );
                        let resolution = tokio::select! {
                            () = self.cancel.cancelled() => return Err(Error::Cancelled),
                            result = human.resolve(&pause_prompt) => result?,
                        };
                        log.record(
                            Event::new(EventType::System)
                                .goal(&goal.name)
                                .content(format!("human resolution: {resolution}")),
                        )?;
                        let resumed =
                            format!("{base_prompt}\n\n## Human Resolution\n{resolution}");
                        outcome = self.execute_once(state, goal, &resumed).await?;
                    }
                }
            }
        }

        // Structured-output coercion; parse failure is non-fatal.
        state.upsert_output(goal.name.clone(), outcome.content.clone())?;
        if !goal.outputs.is_empty() {
            match structured::coerce_outputs(&outcome.content, &goal.outputs) {
                Some(fields) if !fields.is_empty() => {
                    for (field, value) in fields {
                        state.upsert_output(field, value)?;
                    }
                }
                _ => {
                    log.record(
                        Event::new(EventType::System).goal(&goal.name).content(
                            "structured output coercion failed; raw output retained",
                        ),
                    )?;
                }
            }
        }

        Ok(GoalRun {
            content: outcome.content,
            tool_calls: outcome.tool_calls,
        })
    }

    /// One EXECUTE pass: goal loop for single-agent goals, sub-agent
    /// fan-out for multi-agent ones. Emits `phase_execute`.
    async fn execute_once(
        &self,
        state: &mut RunState<'_>,
        goal: &Goal,
        prompt: &str,
    ) -> Result<ChatOutcome> {
        let started = Instant::now();

        let outcome = if goal.using_agents.is_empty() {
            let registry = self.goal_registry(&state.log, &goal.name);
            let system = prompts::system_prompt(registry.has_spawn_agent(), &state.skill_names());
            let messages = vec![Message::system(system), Message::user(prompt.to_string())];
            ChatLoop {
                provider: self.provider.as_ref(),
                registry: &registry,
                verifier: self.verifier.as_deref(),
                log: &state.log,
                goal: &goal.name,
                skills: &state.skills,
                cancel: &self.cancel,
                agent: None,
            }
            .run(messages)
            .await?
        } else {
            self.execute_multi_agent(state, goal, prompt).await?
        };

        state.usage += outcome.usage;
        state.log.record(
            Event::new(EventType::PhaseExecute)
                .goal(&goal.name)
                .duration_ms(elapsed_ms(started))
                .meta(serde_json::json!({
                    "tools_used": outcome.tools_used.clone(),
                    "tool_calls": outcome.tool_calls,
                })),
        )?;
        Ok(outcome)
    }

    /// The registry a goal loop sees: the base registry plus, when a
    /// sub-agent runner is configured, the `spawn_agent` tool bound to
    /// this goal's context.
    fn goal_registry(&self, log: &SessionLog, goal: &str) -> ToolRegistry {
        let mut registry = self.registry.clone();
        if let Some(ref runner) = self.subagents {
            let spawner = crate::subagent::DynamicSpawner::new(
                runner.clone(),
                log.clone(),
                self.cancel.clone(),
                goal,
            );
            registry.register(Arc::new(SpawnAgentTool::new(Arc::new(spawner))));
        }
        registry
    }

    /// Fan a goal out to its agents and synthesize one answer.
    async fn execute_multi_agent(
        &self,
        state: &mut RunState<'_>,
        goal: &Goal,
        prompt: &str,
    ) -> Result<ChatOutcome> {
        let specs: Vec<SubAgentSpec> = goal
            .using_agents
            .iter()
            .map(|name| {
                let decl = state
                    .workflow
                    .agent(name)
                    .ok_or_else(|| Error::internal(format!("unvalidated agent '{name}'")))?;
                Ok(SubAgentSpec {
                    name: decl.name.clone(),
                    prompt: decl.prompt.clone().unwrap_or_default(),
                    requires: decl.requires.clone(),
                    outputs: decl.outputs.clone(),
                })
            })
            .collect::<Result<_>>()?;

        let mut shared = state.env_map();
        shared.insert("_task".to_string(), prompt.to_string());

        let outcomes: Vec<SubAgentOutcome> = match &self.subagents {
            Some(runner) => {
                runner
                    .run(&goal.name, &specs, &shared, &state.log, &self.cancel)
                    .await?
            }
            None => self.fallback_fan_out(state, goal, &specs, &shared).await?,
        };

        let mut usage = outcomes.iter().fold(Usage::zero(), |acc, o| acc + o.usage);

        if let [only] = outcomes.as_slice() {
            return Ok(ChatOutcome {
                content: only.output.clone(),
                tools_used: Vec::new(),
                tool_calls: 0,
                usage,
            });
        }

        // Synthesis chat on the main provider.
        let pairs: Vec<(String, String)> = outcomes
            .into_iter()
            .map(|o| (o.agent, o.output))
            .collect();
        let mut synthesis = prompts::synthesis_prompt(prompt, &pairs);
        if !goal.outputs.is_empty() {
            synthesis.push_str(&prompts::structured_directive(&goal.outputs));
        }
        state.log.record(
            Event::new(EventType::User)
                .goal(&goal.name)
                .content(synthesis.clone()),
        )?;

        let request = ChatRequest::with_messages(vec![
            Message::system(prompts::BASELINE_SYSTEM_PROMPT),
            Message::user(synthesis),
        ]);
        let response = tokio::select! {
            () = self.cancel.cancelled() => return Err(Error::Cancelled),
            result = self.provider.chat(&request) => result?,
        };
        usage += response.usage;
        state.log.record(
            Event::new(EventType::Assistant)
                .goal(&goal.name)
                .content(response.content.clone()),
        )?;

        Ok(ChatOutcome {
            content: response.content,
            tools_used: Vec::new(),
            tool_calls: 0,
            usage,
        })
    }

    /// Compat mode when no sub-agent runner is configured: agents run in
    /// parallel against the parent provider, without isolation.
    async fn fallback_fan_out(
        &self,
        state: &RunState<'_>,
        goal: &Goal,
        specs: &[SubAgentSpec],
        shared: &BTreeMap<String, String>,
    ) -> Result<Vec<SubAgentOutcome>> {
        let task = shared.get("_task").cloned().unwrap_or_default();
        let empty_skills = HashMap::new();

        let runs = specs.iter().map(|spec| {
            let task = task.clone();
            let empty_skills = &empty_skills;
            async move {
                let mut user = task;
                if !spec.outputs.is_empty() {
                    user.push_str(&prompts::structured_directive(&spec.outputs));
                }
                let messages = vec![Message::system(spec.prompt.clone()), Message::user(user)];
                let outcome = ChatLoop {
                    provider: self.provider.as_ref(),
                    registry: &self.registry,
                    verifier: self.verifier.as_deref(),
                    log: &state.log,
                    goal: &goal.name,
                    skills: empty_skills,
                    cancel: &self.cancel,
                    agent: Some(&spec.name),
                }
                .run(messages)
                .await?;
                Ok(SubAgentOutcome {
                    agent: spec.name.clone(),
                    output: outcome.content,
                    usage: outcome.usage,
                })
            }
        });

        futures::future::join_all(runs)
            .await
            .into_iter()
            .collect()
    }

    fn build_goal_prompt(&self, state: &RunState<'_>, goal: &Goal) -> String {
        let env = state.env_map();
        let interpolated = interpolate(goal.outcome.as_deref().unwrap_or_default(), &env);
        let mut prompt = match prompts::context_block(&state.goal_outputs) {
            Some(block) => format!("{block}\n{interpolated}"),
            None => interpolated,
        };
        if !goal.outputs.is_empty() {
            prompt.push_str(&prompts::structured_directive(&goal.outputs));
        }
        prompt
    }
}

impl std::fmt::Debug for WorkflowExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowExecutor")
            .field("verifier", &self.verifier.is_some())
            .field("checkpoints", &self.checkpoints.is_some())
            .field("subagents", &self.subagents.is_some())
            .field("human", &self.human.is_some())
            .finish_non_exhaustive()
    }
}

/// Resolve a goal's effective supervision flag: goal override, else step
/// override, else the workflow default.
fn effective_supervision(workflow: &Workflow, step: &Step, goal: &Goal) -> bool {
    match goal.supervision {
        Supervision::Enabled => true,
        Supervision::Disabled => false,
        Supervision::Inherit => match step.supervision {
            Supervision::Enabled => true,
            Supervision::Disabled => false,
            Supervision::Inherit => workflow.supervised,
        },
    }
}

/// Resolve an iteration limit: literal, else late-bound input, else the
/// default for programmatically constructed workflows.
fn effective_limit(
    limit: Option<u32>,
    var: Option<&str>,
    inputs: &BTreeMap<String, String>,
) -> Result<u32> {
    if let Some(limit) = limit {
        return Ok(limit);
    }
    if let Some(name) = var {
        let value = inputs
            .get(name)
            .ok_or_else(|| ConfigError::MissingInput(name.to_string()))?;
        return value.trim().parse().map_err(|_| {
            Error::internal(format!("input '{name}' is not a valid iteration limit: '{value}'"))
        });
    }
    Ok(DEFAULT_ITERATION_LIMIT)
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
