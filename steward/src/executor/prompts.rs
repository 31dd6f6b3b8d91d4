//! Prompt assembly for goal execution.

/// Baseline system prompt for every goal loop.
pub const BASELINE_SYSTEM_PROMPT: &str = "You are an agent executing one goal of a larger \
workflow. Work the goal to completion using the tools available to you, then state the \
final result as plain text. Be concrete and concise.";

/// Prepended when the registry exposes `spawn_agent`.
pub const ORCHESTRATOR_PREAMBLE: &str = "You can delegate self-contained sub-tasks by \
calling the spawn_agent tool with a role and a task. Each sub-agent runs in isolation and \
returns only its final output; prefer delegation for parallelizable or specialised work.";

/// Build the system message for a goal loop.
///
/// Skills are listed by name with the `[use-skill:name]` activation
/// sentinel documented, so the model can pull instructions in on demand.
#[must_use]
pub fn system_prompt(has_spawn_agent: bool, skills: &[String]) -> String {
    let mut prompt = String::new();
    if has_spawn_agent {
        prompt.push_str(ORCHESTRATOR_PREAMBLE);
        prompt.push_str("\n\n");
    }
    prompt.push_str(BASELINE_SYSTEM_PROMPT);
    if !skills.is_empty() {
        prompt.push_str("\n\nAvailable skills (activate one by replying with the sentinel \
                         [use-skill:name] on its own):");
        for name in skills {
            prompt.push_str("\n- ");
            prompt.push_str(name);
        }
    }
    prompt
}

/// Build the "Context from Previous Goals" block, or `None` when no goal
/// has produced output yet.
#[must_use]
pub fn context_block(outputs: &[(String, String)]) -> Option<String> {
    if outputs.is_empty() {
        return None;
    }
    let mut block = String::from("Context from Previous Goals:\n");
    for (name, output) in outputs {
        block.push_str(&format!("\n### {name}\n{output}\n"));
    }
    Some(block)
}

/// Structured-output directive appended when a goal declares outputs.
#[must_use]
pub fn structured_directive(fields: &[String]) -> String {
    format!(
        "\n\nRespond with a bare JSON object containing exactly these fields: {}.",
        fields.join(", ")
    )
}

/// User message for the multi-agent synthesis chat.
#[must_use]
pub fn synthesis_prompt(outcome: &str, agent_outputs: &[(String, String)]) -> String {
    let mut prompt = format!(
        "Several agents worked on this goal:\n{outcome}\n\nTheir outputs follow.\n"
    );
    for (name, output) in agent_outputs {
        prompt.push_str(&format!("\n[{name}]: {output}\n"));
    }
    prompt.push_str("\nSynthesize these into one coherent answer to the goal.");
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn baseline_only_by_default() {
        let prompt = system_prompt(false, &[]);
        assert_eq!(prompt, BASELINE_SYSTEM_PROMPT);
    }

    #[test]
    fn spawn_agent_prepends_orchestrator_preamble() {
        let prompt = system_prompt(true, &[]);
        assert!(prompt.starts_with(ORCHESTRATOR_PREAMBLE));
        assert!(prompt.contains(BASELINE_SYSTEM_PROMPT));
    }

    #[test]
    fn skills_are_listed_with_sentinel() {
        let prompt = system_prompt(false, &["review".to_string(), "triage".to_string()]);
        assert!(prompt.contains("[use-skill:name]"));
        assert!(prompt.contains("- review"));
        assert!(prompt.contains("- triage"));
    }

    #[test]
    fn context_block_concatenates_in_order() {
        let outputs = vec![
            ("analyze".to_string(), "two risks".to_string()),
            ("plan".to_string(), "three steps".to_string()),
        ];
        let block = context_block(&outputs).unwrap();
        assert!(block.starts_with("Context from Previous Goals:"));
        let analyze = block.find("### analyze").unwrap();
        let plan = block.find("### plan").unwrap();
        assert!(analyze < plan);
    }

    #[test]
    fn empty_context_is_none() {
        assert!(context_block(&[]).is_none());
    }

    #[test]
    fn structured_directive_lists_fields() {
        let directive = structured_directive(&["findings".to_string(), "risks".to_string()]);
        assert!(directive.contains("findings, risks"));
        assert!(directive.contains("JSON object"));
    }

    #[test]
    fn synthesis_enumerates_agents_in_order() {
        let prompt = synthesis_prompt(
            "Review the design",
            &[
                ("critic".to_string(), "A".to_string()),
                ("fan".to_string(), "B".to_string()),
            ],
        );
        let critic = prompt.find("[critic]: A").unwrap();
        let fan = prompt.find("[fan]: B").unwrap();
        assert!(critic < fan);
    }
}
