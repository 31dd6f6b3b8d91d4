//! Smart `FROM` resolution for agents and goals.
//!
//! The linker is a one-shot pass over a parsed [`Workflow`]: it loads
//! prompt files, resolves skill directories, and leaves every agent with
//! a concrete prompt string. Skills are pure strings after this pass, so
//! no cyclic module references can survive into execution.
//!
//! Resolution order for an agent's `FROM` path:
//!
//! 1. Relative to the Agentfile's directory.
//! 2. An existing `.md` file loads verbatim as the agent prompt.
//! 3. An existing directory must contain `SKILL.md`; the skill is
//!    composed into a prompt (description, instructions, and an
//!    `## Available Scripts` section naming the helper files).
//! 4. Otherwise each configured skill-search path is tried in order.
//! 5. Exhaustion is fatal, naming the target and the agent's line.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use super::ast::{AgentDecl, Workflow};
use crate::error::ConfigError;

/// Optional YAML frontmatter at the top of a `SKILL.md`.
#[derive(Debug, Default, Deserialize)]
struct SkillFrontmatter {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

/// A skill resolved from a directory containing `SKILL.md`.
#[derive(Debug, Clone)]
pub struct Skill {
    /// Skill name (frontmatter `name`, else the directory name).
    pub name: String,
    /// One-line description from the frontmatter.
    pub description: String,
    /// Instruction body of `SKILL.md`.
    pub instructions: String,
    /// Helper script file names found next to `SKILL.md`, sorted.
    pub scripts: Vec<String>,
}

impl Skill {
    /// Compose the skill into a single agent prompt.
    #[must_use]
    pub fn compose_prompt(&self) -> String {
        let mut prompt = String::new();
        if !self.description.is_empty() {
            prompt.push_str(&self.description);
            prompt.push_str("\n\n");
        }
        prompt.push_str(&self.instructions);
        if !self.scripts.is_empty() {
            prompt.push_str("\n\n## Available Scripts\n");
            for script in &self.scripts {
                prompt.push_str("\n- ");
                prompt.push_str(script);
            }
        }
        prompt
    }
}

/// Resolves `FROM` references in a parsed workflow.
#[derive(Debug, Clone)]
pub struct Linker {
    base_dir: PathBuf,
    skill_paths: Vec<PathBuf>,
}

impl Linker {
    /// Create a linker rooted at the Agentfile's directory.
    #[must_use]
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            skill_paths: Vec::new(),
        }
    }

    /// Configure skill-search paths. Tilde expansion happens here, once
    /// per entry.
    #[must_use]
    pub fn with_skill_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.skill_paths = paths
            .into_iter()
            .map(|p| expand_tilde(p.as_ref()))
            .collect();
        self
    }

    /// Resolve every `FROM` reference in the workflow, in place.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::AgentSource`] naming the agent (or goal)
    /// and its declaration line on any resolution or read failure.
    pub fn link(&self, workflow: &mut Workflow) -> Result<(), ConfigError> {
        for agent in &mut workflow.agents {
            if agent.from_path.is_some() {
                self.resolve_agent(agent)?;
            }
        }
        for goal in &mut workflow.goals {
            if let Some(path) = goal.from_path.clone() {
                let resolved = self.base_dir.join(&path);
                let text =
                    fs::read_to_string(&resolved).map_err(|e| ConfigError::AgentSource {
                        agent: goal.name.clone(),
                        line: goal.line,
                        message: format!("cannot read '{}': {e}", resolved.display()),
                    })?;
                goal.outcome = Some(text);
            }
        }
        Ok(())
    }

    fn resolve_agent(&self, agent: &mut AgentDecl) -> Result<(), ConfigError> {
        let target = agent
            .from_path
            .clone()
            .unwrap_or_default();
        let source_error = |message: String| ConfigError::AgentSource {
            agent: agent.name.clone(),
            line: agent.line,
            message,
        };

        let primary = self.base_dir.join(&target);
        let mut candidates = vec![primary];
        for search in &self.skill_paths {
            candidates.push(search.join(&target));
        }

        for candidate in &candidates {
            if candidate.is_file() {
                if candidate.extension().is_some_and(|e| e == "md") {
                    let prompt = fs::read_to_string(candidate).map_err(|e| {
                        source_error(format!("cannot read '{}': {e}", candidate.display()))
                    })?;
                    debug!(agent = %agent.name, path = %candidate.display(), "linked prompt file");
                    agent.prompt = Some(prompt);
                    return Ok(());
                }
                return Err(source_error(format!(
                    "'{}' is not a .md prompt file",
                    candidate.display()
                )));
            }
            if candidate.is_dir() {
                let skill = load_skill(candidate).map_err(source_error)?;
                debug!(agent = %agent.name, skill = %skill.name, "linked skill directory");
                agent.prompt = Some(skill.compose_prompt());
                agent.skill_instructions = Some(skill.instructions);
                agent.is_skill = true;
                return Ok(());
            }
        }

        Err(source_error(format!(
            "cannot resolve '{target}' (searched {} locations)",
            candidates.len()
        )))
    }
}

/// Load a skill from a directory that must contain `SKILL.md`.
fn load_skill(dir: &Path) -> Result<Skill, String> {
    let manifest = dir.join("SKILL.md");
    if !manifest.is_file() {
        return Err(format!("'{}' has no SKILL.md", dir.display()));
    }
    let content = fs::read_to_string(&manifest)
        .map_err(|e| format!("cannot read '{}': {e}", manifest.display()))?;

    let (frontmatter, instructions) = split_frontmatter(&content)?;

    let fallback_name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut scripts: Vec<String> = fs::read_dir(dir)
        .map_err(|e| format!("cannot list '{}': {e}", dir.display()))?
        .filter_map(std::result::Result::ok)
        .filter(|entry| entry.path().is_file())
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            (name != "SKILL.md").then_some(name)
        })
        .collect();
    scripts.sort();

    Ok(Skill {
        name: frontmatter.name.unwrap_or(fallback_name),
        description: frontmatter.description.unwrap_or_default(),
        instructions: instructions.trim().to_string(),
        scripts,
    })
}

/// Split optional `---` YAML frontmatter from a SKILL.md body.
fn split_frontmatter(content: &str) -> Result<(SkillFrontmatter, String), String> {
    let Some(rest) = content.strip_prefix("---\n") else {
        return Ok((SkillFrontmatter::default(), content.to_string()));
    };
    let Some(end) = rest.find("\n---") else {
        return Err("invalid SKILL.md frontmatter: missing closing ---".to_string());
    };
    let frontmatter: SkillFrontmatter = serde_yaml::from_str(&rest[..end])
        .map_err(|e| format!("invalid SKILL.md frontmatter: {e}"))?;
    let body = rest[end + 4..].trim_start_matches('\n').to_string();
    Ok((frontmatter, body))
}

/// Expand a leading `~` against `$HOME`. Applied once per search path.
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/")
        && let Ok(home) = std::env::var("HOME")
    {
        return PathBuf::from(home).join(rest);
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agentfile::parser::Parser;
    use std::fs;

    fn workdir() -> tempfile::TempDir {
        tempfile::tempdir().expect("tempdir")
    }

    fn linked(dir: &Path, source: &str) -> Result<Workflow, ConfigError> {
        let mut workflow = Parser::parse(source).expect("parse");
        Linker::new(dir).link(&mut workflow)?;
        Ok(workflow)
    }

    #[test]
    fn md_file_loads_verbatim() {
        let dir = workdir();
        fs::create_dir(dir.path().join("agents")).unwrap();
        fs::write(dir.path().join("agents/critic.md"), "Be harsh.\n").unwrap();

        let workflow = linked(
            dir.path(),
            "NAME t\nAGENT critic FROM agents/critic.md\nGOAL g \"do\" USING critic\nRUN s USING g",
        )
        .unwrap();
        let critic = workflow.agent("critic").unwrap();
        assert_eq!(critic.prompt.as_deref(), Some("Be harsh.\n"));
        assert!(!critic.is_skill);
    }

    #[test]
    fn skill_directory_composes_prompt() {
        let dir = workdir();
        let skill_dir = dir.path().join("review");
        fs::create_dir(&skill_dir).unwrap();
        fs::write(
            skill_dir.join("SKILL.md"),
            "---\nname: review\ndescription: Reviews diffs carefully.\n---\nAlways read the whole diff first.\n",
        )
        .unwrap();
        fs::write(skill_dir.join("collect.sh"), "#!/bin/sh\n").unwrap();
        fs::write(skill_dir.join("annotate.py"), "pass\n").unwrap();

        let workflow = linked(
            dir.path(),
            "NAME t\nAGENT reviewer FROM review\nGOAL g \"do\" USING reviewer\nRUN s USING g",
        )
        .unwrap();
        let reviewer = workflow.agent("reviewer").unwrap();
        assert!(reviewer.is_skill);
        let prompt = reviewer.prompt.as_deref().unwrap();
        assert!(prompt.starts_with("Reviews diffs carefully."));
        assert!(prompt.contains("Always read the whole diff first."));
        assert!(prompt.contains("## Available Scripts"));
        // Sorted enumeration.
        let annotate = prompt.find("annotate.py").unwrap();
        let collect = prompt.find("collect.sh").unwrap();
        assert!(annotate < collect);
        assert_eq!(
            reviewer.skill_instructions.as_deref(),
            Some("Always read the whole diff first.")
        );
    }

    #[test]
    fn directory_without_skill_md_is_fatal() {
        let dir = workdir();
        fs::create_dir(dir.path().join("empty")).unwrap();
        let err = linked(
            dir.path(),
            "NAME t\nAGENT a FROM empty\nGOAL g \"do\"\nRUN s USING g",
        )
        .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("SKILL.md"));
        assert!(message.contains("line 2"));
    }

    #[test]
    fn non_md_file_is_fatal() {
        let dir = workdir();
        fs::write(dir.path().join("prompt.txt"), "x").unwrap();
        let err = linked(
            dir.path(),
            "NAME t\nAGENT a FROM prompt.txt\nGOAL g \"do\"\nRUN s USING g",
        )
        .unwrap_err();
        assert!(err.to_string().contains("not a .md prompt file"));
    }

    #[test]
    fn search_paths_are_tried_in_order() {
        let dir = workdir();
        let shared = workdir();
        let skill_dir = shared.path().join("triage");
        fs::create_dir(&skill_dir).unwrap();
        fs::write(skill_dir.join("SKILL.md"), "Sort issues by severity.\n").unwrap();

        let mut workflow = Parser::parse(
            "NAME t\nAGENT triager FROM triage\nGOAL g \"do\" USING triager\nRUN s USING g",
        )
        .unwrap();
        Linker::new(dir.path())
            .with_skill_paths([shared.path().to_string_lossy().as_ref()])
            .link(&mut workflow)
            .unwrap();

        let triager = workflow.agent("triager").unwrap();
        assert!(triager.is_skill);
        assert!(
            triager
                .prompt
                .as_deref()
                .unwrap()
                .contains("Sort issues by severity.")
        );
    }

    #[test]
    fn exhaustion_names_the_target() {
        let dir = workdir();
        let err = linked(
            dir.path(),
            "NAME t\nAGENT a FROM nowhere.md\nGOAL g \"do\"\nRUN s USING g",
        )
        .unwrap_err();
        assert!(err.to_string().contains("nowhere.md"));
    }

    #[test]
    fn goal_outcome_loads_from_path() {
        let dir = workdir();
        fs::write(dir.path().join("outcome.txt"), "Ship it.\n").unwrap();
        let workflow = linked(
            dir.path(),
            "NAME t\nGOAL g FROM outcome.txt\nRUN s USING g",
        )
        .unwrap();
        assert_eq!(
            workflow.goal("g").unwrap().outcome.as_deref(),
            Some("Ship it.\n")
        );
    }

    #[test]
    fn skill_md_without_frontmatter_is_instructions_only() {
        let dir = workdir();
        let skill_dir = dir.path().join("plain");
        fs::create_dir(&skill_dir).unwrap();
        fs::write(skill_dir.join("SKILL.md"), "Just do the thing.\n").unwrap();

        let workflow = linked(
            dir.path(),
            "NAME t\nAGENT a FROM plain\nGOAL g \"do\" USING a\nRUN s USING g",
        )
        .unwrap();
        assert_eq!(
            workflow.agent("a").unwrap().prompt.as_deref(),
            Some("Just do the thing.")
        );
    }

    #[test]
    fn tilde_expansion_applies_to_search_paths() {
        let linker = Linker::new(".").with_skill_paths(["~/skills"]);
        if let Ok(home) = std::env::var("HOME") {
            assert!(linker.skill_paths[0].starts_with(home));
        }
    }
}
