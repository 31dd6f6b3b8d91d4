//! The Agentfile abstract syntax tree.
//!
//! A parsed [`Workflow`] is produced once by the front-end and is
//! read-only for every other component: the executor walks its steps, the
//! supervision engine reads goal flags, the security verifier reads the
//! global mode. Nothing downstream mutates it.

use serde::{Deserialize, Serialize};

/// Supervision override on an agent, goal, or step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Supervision {
    /// Follow the workflow-level setting.
    #[default]
    Inherit,
    /// Supervise regardless of the workflow default.
    Enabled,
    /// Never supervise, unless the workflow is supervised-human.
    Disabled,
}

/// Workflow-level security mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityMode {
    /// Standard static rules with optional LLM escalation.
    #[default]
    Default,
    /// Benign triage classifications still escalate to the supervisor.
    Paranoid,
    /// Offensive actions inside the declared scope are permitted.
    Research,
}

impl SecurityMode {
    /// String form of the mode, as written in an Agentfile.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Paranoid => "paranoid",
            Self::Research => "research",
        }
    }
}

/// A declared workflow input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Input {
    /// Input name, referenced as `$name` in goal text.
    pub name: String,
    /// Default value; the input is required when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    /// Declaration line.
    pub line: usize,
}

/// A declared agent.
///
/// Exactly one of `prompt` or `from_path` is set after parsing; after
/// linking, `prompt` is always populated (the linker resolves `FROM`
/// sources and skill directories into prompt text).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentDecl {
    /// Agent name, referenced from `USING` lists.
    pub name: String,
    /// Inline or linked prompt text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// Unresolved `FROM` path, kept for diagnostics after linking.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_path: Option<String>,
    /// Capability profile used to resolve this agent's provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires: Option<String>,
    /// Declared structured-output field names, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<String>,
    /// Supervision override.
    #[serde(default)]
    pub supervision: Supervision,
    /// Whether supervision of this agent requires a human.
    #[serde(default)]
    pub human_only: bool,
    /// Set when the agent was loaded from a skill directory.
    #[serde(default)]
    pub is_skill: bool,
    /// Resolved skill instructions, set together with `is_skill`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skill_instructions: Option<String>,
    /// Declaration line.
    pub line: usize,
}

/// A declared goal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Goal {
    /// Goal name, referenced from step `USING` lists.
    pub name: String,
    /// Outcome text (inline, or loaded from `from_path` by the linker).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
    /// Unresolved `FROM` path for the outcome text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_path: Option<String>,
    /// Declared structured-output field names, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<String>,
    /// Agents to fan this goal out to, in declaration order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub using_agents: Vec<String>,
    /// Whether this is a `CONVERGE` goal.
    #[serde(default)]
    pub is_converge: bool,
    /// Literal iteration bound for converge goals.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub within_limit: Option<u32>,
    /// Input name bound to the iteration limit at run time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub within_var: Option<String>,
    /// Supervision override.
    #[serde(default)]
    pub supervision: Supervision,
    /// Whether supervision of this goal requires a human.
    #[serde(default)]
    pub human_only: bool,
    /// Declaration line.
    pub line: usize,
}

/// The kind of a workflow step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// Run each named goal exactly once.
    Run,
    /// Iterate each named goal up to its effective limit.
    Loop,
}

impl StepKind {
    /// String form of the step kind.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Run => "RUN",
            Self::Loop => "LOOP",
        }
    }
}

/// A workflow step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    /// RUN or LOOP.
    pub kind: StepKind,
    /// Step name.
    pub name: String,
    /// Goals this step drives, in declaration order.
    pub using_goals: Vec<String>,
    /// Literal iteration bound for LOOP steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub within_limit: Option<u32>,
    /// Input name bound to the iteration limit at run time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub within_var: Option<String>,
    /// Supervision override.
    #[serde(default)]
    pub supervision: Supervision,
    /// Whether supervision of this step requires a human.
    #[serde(default)]
    pub human_only: bool,
    /// Declaration line.
    pub line: usize,
}

/// Iteration limit applied to LOOP steps and CONVERGE goals when neither
/// a literal nor a bound input supplies one. Only reachable for
/// programmatically constructed workflows; the parser rejects a missing
/// `WITHIN`.
pub const DEFAULT_ITERATION_LIMIT: u32 = 10;

/// A parsed Agentfile workflow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workflow {
    /// Workflow name (`NAME` directive). Required by validation.
    pub name: String,
    /// Declared inputs, in source order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<Input>,
    /// Declared agents, in source order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub agents: Vec<AgentDecl>,
    /// Declared goals, in source order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub goals: Vec<Goal>,
    /// Steps, in execution order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<Step>,
    /// Global `SUPERVISED` directive.
    #[serde(default)]
    pub supervised: bool,
    /// Global `SUPERVISED HUMAN` directive.
    #[serde(default)]
    pub human_only: bool,
    /// `SECURITY` directive mode.
    #[serde(default)]
    pub security_mode: SecurityMode,
    /// Scope string, required iff the mode is research.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_scope: Option<String>,
}

impl Workflow {
    /// Look up an agent by name.
    #[must_use]
    pub fn agent(&self, name: &str) -> Option<&AgentDecl> {
        self.agents.iter().find(|a| a.name == name)
    }

    /// Look up a goal by name.
    #[must_use]
    pub fn goal(&self, name: &str) -> Option<&Goal> {
        self.goals.iter().find(|g| g.name == name)
    }

    /// Look up an input declaration by name.
    #[must_use]
    pub fn input(&self, name: &str) -> Option<&Input> {
        self.inputs.iter().find(|i| i.name == name)
    }

    /// Resolve a child supervision override against the workflow default.
    #[must_use]
    pub const fn effective_supervised(&self, child: Supervision) -> bool {
        match child {
            Supervision::Inherit => self.supervised,
            Supervision::Enabled => true,
            Supervision::Disabled => false,
        }
    }

    /// Whether any part of the workflow requires a human in the
    /// supervision loop.
    ///
    /// True when the workflow itself is `SUPERVISED HUMAN`, or when any
    /// agent, goal, or step carries an explicit `SUPERVISED HUMAN`
    /// modifier.
    #[must_use]
    pub fn has_supervised_human_steps(&self) -> bool {
        if self.supervised && self.human_only {
            return true;
        }
        let marked = |supervision: Supervision, human: bool| {
            human && matches!(supervision, Supervision::Enabled)
        };
        self.agents
            .iter()
            .any(|a| marked(a.supervision, a.human_only))
            || self.goals.iter().any(|g| marked(g.supervision, g.human_only))
            || self.steps.iter().any(|s| marked(s.supervision, s.human_only))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(kind: StepKind) -> Step {
        Step {
            kind,
            name: "s".to_string(),
            using_goals: vec!["g".to_string()],
            within_limit: None,
            within_var: None,
            supervision: Supervision::Inherit,
            human_only: false,
            line: 1,
        }
    }

    #[test]
    fn effective_supervised_inherits_workflow_default() {
        let supervised = Workflow {
            supervised: true,
            ..Workflow::default()
        };
        assert!(supervised.effective_supervised(Supervision::Inherit));
        assert!(!supervised.effective_supervised(Supervision::Disabled));

        let unsupervised = Workflow::default();
        assert!(!unsupervised.effective_supervised(Supervision::Inherit));
        assert!(unsupervised.effective_supervised(Supervision::Enabled));
    }

    #[test]
    fn human_steps_detected_from_global_directive() {
        let workflow = Workflow {
            supervised: true,
            human_only: true,
            ..Workflow::default()
        };
        assert!(workflow.has_supervised_human_steps());
    }

    #[test]
    fn human_steps_detected_from_step_modifier() {
        let mut marked = step(StepKind::Run);
        marked.supervision = Supervision::Enabled;
        marked.human_only = true;
        let workflow = Workflow {
            steps: vec![marked],
            ..Workflow::default()
        };
        assert!(workflow.has_supervised_human_steps());
    }

    #[test]
    fn no_human_steps_by_default() {
        let workflow = Workflow {
            steps: vec![step(StepKind::Loop)],
            ..Workflow::default()
        };
        assert!(!workflow.has_supervised_human_steps());
    }

    #[test]
    fn lookups_find_declared_items() {
        let workflow = Workflow {
            goals: vec![Goal {
                name: "analyze".to_string(),
                outcome: Some("do".to_string()),
                from_path: None,
                outputs: Vec::new(),
                using_agents: Vec::new(),
                is_converge: false,
                within_limit: None,
                within_var: None,
                supervision: Supervision::Inherit,
                human_only: false,
                line: 3,
            }],
            ..Workflow::default()
        };
        assert!(workflow.goal("analyze").is_some());
        assert!(workflow.goal("absent").is_none());
        assert!(workflow.agent("absent").is_none());
    }

    #[test]
    fn security_mode_strings() {
        assert_eq!(SecurityMode::Default.as_str(), "default");
        assert_eq!(SecurityMode::Paranoid.as_str(), "paranoid");
        assert_eq!(SecurityMode::Research.as_str(), "research");
    }
}
