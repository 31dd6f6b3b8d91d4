//! Post-link workflow validation.
//!
//! Violations are accumulated, never short-circuited: a broken workflow
//! reports every problem in one pass, each with its source line.

use super::ast::{Supervision, Workflow};
use crate::error::{ValidationError, Violation};

/// Validate a linked workflow.
///
/// Checks:
/// - the workflow has a name
/// - at least one step exists
/// - every `USING` reference resolves to a defined agent or goal
/// - a supervised-human workflow has no child opting out of supervision
///
/// # Errors
///
/// Returns a [`ValidationError`] carrying every violation found.
pub fn validate(workflow: &Workflow) -> Result<(), ValidationError> {
    let mut violations = Vec::new();

    if workflow.name.is_empty() {
        violations.push(Violation::new(1, "workflow has no NAME"));
    }

    if workflow.steps.is_empty() {
        violations.push(Violation::new(1, "workflow has no steps"));
    }

    for goal in &workflow.goals {
        for agent in &goal.using_agents {
            if workflow.agent(agent).is_none() {
                violations.push(Violation::new(
                    goal.line,
                    format!(
                        "goal '{}' references undefined agent '{agent}'",
                        goal.name
                    ),
                ));
            }
        }
    }

    for step in &workflow.steps {
        for goal in &step.using_goals {
            if workflow.goal(goal).is_none() {
                violations.push(Violation::new(
                    step.line,
                    format!(
                        "step '{}' references undefined goal '{goal}'",
                        step.name
                    ),
                ));
            }
        }
    }

    if workflow.supervised && workflow.human_only {
        for agent in &workflow.agents {
            if agent.supervision == Supervision::Disabled {
                violations.push(Violation::new(
                    agent.line,
                    format!(
                        "agent '{}' cannot be UNSUPERVISED in a SUPERVISED HUMAN workflow",
                        agent.name
                    ),
                ));
            }
        }
        for goal in &workflow.goals {
            if goal.supervision == Supervision::Disabled {
                violations.push(Violation::new(
                    goal.line,
                    format!(
                        "goal '{}' cannot be UNSUPERVISED in a SUPERVISED HUMAN workflow",
                        goal.name
                    ),
                ));
            }
        }
        for step in &workflow.steps {
            if step.supervision == Supervision::Disabled {
                violations.push(Violation::new(
                    step.line,
                    format!(
                        "step '{}' cannot be UNSUPERVISED in a SUPERVISED HUMAN workflow",
                        step.name
                    ),
                ));
            }
        }
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(ValidationError { violations })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agentfile::parser::Parser;

    fn check(source: &str) -> Result<(), ValidationError> {
        validate(&Parser::parse(source).expect("parse"))
    }

    #[test]
    fn valid_workflow_passes() {
        check("NAME t\nAGENT a \"p\"\nGOAL g \"do\" USING a\nRUN s USING g").unwrap();
    }

    #[test]
    fn undefined_agent_reported_with_line() {
        let err = check("NAME t\nGOAL g \"do\" USING missing\nRUN r USING g").unwrap_err();
        assert_eq!(err.violations.len(), 1);
        assert_eq!(err.violations[0].line, 2);
        assert!(err.violations[0].message.contains("missing"));
    }

    #[test]
    fn undefined_goal_reported_with_line() {
        let err = check("NAME t\nRUN r USING ghost").unwrap_err();
        assert_eq!(err.violations[0].line, 2);
        assert!(err.violations[0].message.contains("ghost"));
    }

    #[test]
    fn missing_name_and_steps_both_reported() {
        let err = check("GOAL g \"do\"").unwrap_err();
        let messages: Vec<_> = err.violations.iter().map(|v| v.message.as_str()).collect();
        assert!(messages.iter().any(|m| m.contains("NAME")));
        assert!(messages.iter().any(|m| m.contains("steps")));
    }

    #[test]
    fn supervised_human_forbids_unsupervised_children() {
        let err = check(
            "SUPERVISED HUMAN\nNAME t\nAGENT a \"p\" UNSUPERVISED\nGOAL g \"do\" USING a UNSUPERVISED\nRUN s USING g UNSUPERVISED",
        )
        .unwrap_err();
        assert_eq!(err.violations.len(), 3);
        assert!(err.violations.iter().all(|v| v.message.contains("UNSUPERVISED")));
    }

    #[test]
    fn plain_supervised_workflow_allows_opt_out() {
        check("SUPERVISED\nNAME t\nGOAL g \"do\" UNSUPERVISED\nRUN s USING g").unwrap();
    }

    #[test]
    fn all_violations_accumulate() {
        let err = check("GOAL g \"do\" USING nope\nRUN s USING gone").unwrap_err();
        assert!(err.violations.len() >= 4);
    }
}
