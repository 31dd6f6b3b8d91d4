//! The Agentfile language front-end.
//!
//! An Agentfile is a line-oriented declarative program: a `NAME`, typed
//! `INPUT`s, `AGENT` and `GOAL` declarations, and `RUN`/`LOOP` steps that
//! drive the goals. This module turns source text into a validated
//! [`Workflow`]:
//!
//! ```text
//! source ── Lexer ── Parser ── Linker (FROM resolution) ── validate
//! ```
//!
//! The produced AST is read-only for the rest of the runtime.

pub mod ast;
pub mod lexer;
pub mod linker;
pub mod parser;
pub mod token;
pub mod validate;

use std::path::Path;

pub use ast::{
    AgentDecl, DEFAULT_ITERATION_LIMIT, Goal, Input, SecurityMode, Step, StepKind, Supervision,
    Workflow,
};
pub use lexer::Lexer;
pub use linker::{Linker, Skill};
pub use parser::Parser;
pub use token::{Token, TokenKind};
pub use validate::validate;

use crate::error::{Error, Result};

/// Parse and validate an Agentfile from a string.
///
/// `FROM` paths are resolved against the current directory; use
/// [`load`] for file-based workflows so paths resolve against the
/// Agentfile's own directory.
///
/// # Errors
///
/// Returns a parse, link, or validation error.
pub fn parse_str(source: &str) -> Result<Workflow> {
    let mut workflow = Parser::parse(source)?;
    Linker::new(".").link(&mut workflow)?;
    validate(&workflow)?;
    Ok(workflow)
}

/// Load, link, and validate an Agentfile from disk.
///
/// `skill_paths` are searched, in order, for `FROM` targets that do not
/// resolve relative to the Agentfile; each entry is tilde-expanded once.
///
/// # Errors
///
/// Returns a parse, link, or validation error.
pub fn load(path: impl AsRef<Path>, skill_paths: &[String]) -> Result<Workflow> {
    let path = path.as_ref();
    let source = std::fs::read_to_string(path).map_err(Error::Io)?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));

    let mut workflow = Parser::parse(&source)?;
    Linker::new(base_dir)
        .with_skill_paths(skill_paths.iter().map(String::as_str))
        .link(&mut workflow)?;
    validate(&workflow)?;
    Ok(workflow)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_str_runs_the_full_pipeline() {
        let workflow =
            parse_str("NAME t\nAGENT a \"prompt\"\nGOAL g \"do\" USING a\nRUN s USING g").unwrap();
        assert_eq!(workflow.name, "t");
    }

    #[test]
    fn parse_str_surfaces_validation_errors() {
        let err = parse_str("NAME t\nGOAL g \"do\" USING missing\nRUN r USING g").unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn load_resolves_relative_to_agentfile() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("critic.md"), "Criticize.\n").unwrap();
        std::fs::write(
            dir.path().join("wf.agent"),
            "NAME t\nAGENT critic FROM critic.md\nGOAL g \"do\" USING critic\nRUN s USING g\n",
        )
        .unwrap();

        let workflow = load(dir.path().join("wf.agent"), &[]).unwrap();
        assert_eq!(
            workflow.agent("critic").unwrap().prompt.as_deref(),
            Some("Criticize.\n")
        );
    }
}
