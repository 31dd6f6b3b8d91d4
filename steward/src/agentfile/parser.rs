//! The Agentfile parser.
//!
//! Recursive descent with one token of look-ahead. Each declaration is a
//! single logical line; optional clauses (`->`, `USING`, `WITHIN`,
//! `REQUIRES`, supervision modifiers) may appear in any order after the
//! declaration head. Every error carries the line of the token that
//! triggered it.

use std::mem;

use super::ast::{AgentDecl, Goal, Input, SecurityMode, Step, StepKind, Supervision, Workflow};
use super::lexer::Lexer;
use super::token::{Token, TokenKind};
use crate::error::ParseError;

/// Agentfile parser.
#[derive(Debug)]
pub struct Parser {
    lexer: Lexer,
    cur: Token,
    peek: Token,
}

impl Parser {
    /// Create a parser over the given source.
    #[must_use]
    pub fn new(source: &str) -> Self {
        let mut lexer = Lexer::new(source);
        let cur = lexer.next_token();
        let peek = lexer.next_token();
        Self { lexer, cur, peek }
    }

    /// Parse a complete workflow.
    ///
    /// The result is structurally sound but not yet linked or validated;
    /// see [`Linker`](super::linker::Linker) and
    /// [`validate`](super::validate::validate).
    ///
    /// # Errors
    ///
    /// Returns the first [`ParseError`] encountered, with its line.
    pub fn parse(source: &str) -> Result<Workflow, ParseError> {
        Self::new(source).parse_workflow()
    }

    fn bump(&mut self) {
        self.cur = mem::replace(&mut self.peek, self.lexer.next_token());
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::new(self.cur.line, message)
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token, ParseError> {
        if self.cur.kind == kind {
            let token = self.cur.clone();
            self.bump();
            Ok(token)
        } else {
            Err(self.error(format!("expected {kind}, found {}", self.cur.kind)))
        }
    }

    fn expect_ident(&mut self, what: &str) -> Result<String, ParseError> {
        if self.cur.kind == TokenKind::Ident {
            let name = self.cur.literal.clone();
            self.bump();
            Ok(name)
        } else {
            Err(self.error(format!("expected {what}, found {}", self.cur.kind)))
        }
    }

    fn expect_line_end(&mut self) -> Result<(), ParseError> {
        match self.cur.kind {
            TokenKind::Newline => {
                self.bump();
                Ok(())
            }
            TokenKind::Eof => Ok(()),
            _ => Err(self.error(format!("unexpected {} before end of line", self.cur.kind))),
        }
    }

    fn skip_newlines(&mut self) {
        while self.cur.kind == TokenKind::Newline {
            self.bump();
        }
    }

    fn parse_workflow(&mut self) -> Result<Workflow, ParseError> {
        let mut workflow = Workflow::default();

        loop {
            self.skip_newlines();
            match self.cur.kind {
                TokenKind::Eof => break,
                TokenKind::Supervised => {
                    self.bump();
                    workflow.supervised = true;
                    if self.cur.kind == TokenKind::Human {
                        self.bump();
                        workflow.human_only = true;
                    }
                    self.expect_line_end()?;
                }
                TokenKind::Security => self.parse_security(&mut workflow)?,
                TokenKind::Name => {
                    self.bump();
                    workflow.name = self.expect_ident("workflow name")?;
                    self.expect_line_end()?;
                }
                TokenKind::Input => self.parse_input(&mut workflow)?,
                TokenKind::Agent => self.parse_agent(&mut workflow)?,
                TokenKind::Goal => self.parse_goal(&mut workflow, false)?,
                TokenKind::Converge => self.parse_goal(&mut workflow, true)?,
                TokenKind::Run => self.parse_step(&mut workflow, StepKind::Run)?,
                TokenKind::Loop => self.parse_step(&mut workflow, StepKind::Loop)?,
                TokenKind::Illegal => {
                    return Err(self.error(format!(
                        "unrecognized input '{}'",
                        self.cur.literal
                    )));
                }
                other => {
                    return Err(self.error(format!("unexpected {other} at start of declaration")));
                }
            }
        }

        Ok(workflow)
    }

    fn parse_security(&mut self, workflow: &mut Workflow) -> Result<(), ParseError> {
        self.bump();
        let mode = self.expect_ident("security mode")?;
        match mode.as_str() {
            "default" => workflow.security_mode = SecurityMode::Default,
            "paranoid" => workflow.security_mode = SecurityMode::Paranoid,
            "research" => {
                workflow.security_mode = SecurityMode::Research;
                let scope = self.expect(TokenKind::Str).map_err(|_| {
                    ParseError::new(self.cur.line, "SECURITY research requires a scope string")
                })?;
                workflow.security_scope = Some(scope.literal);
            }
            other => {
                return Err(self.error(format!(
                    "unknown security mode '{other}' (expected default, paranoid, or research)"
                )));
            }
        }
        self.expect_line_end()
    }

    fn parse_input(&mut self, workflow: &mut Workflow) -> Result<(), ParseError> {
        let line = self.cur.line;
        self.bump();
        let name = self.expect_ident("input name")?;
        let mut default = None;
        if self.cur.kind == TokenKind::Default {
            self.bump();
            default = Some(match self.cur.kind {
                TokenKind::Str | TokenKind::Number | TokenKind::Ident => {
                    let value = self.cur.literal.clone();
                    self.bump();
                    value
                }
                other => {
                    return Err(self.error(format!("expected default value, found {other}")));
                }
            });
        }
        workflow.inputs.push(Input {
            name,
            default,
            line,
        });
        self.expect_line_end()
    }

    /// Parse the `(STRING | FROM PATH)` source common to agents and goals.
    fn parse_source(&mut self, what: &str) -> Result<(Option<String>, Option<String>), ParseError> {
        match self.cur.kind {
            TokenKind::Str => {
                let text = self.cur.literal.clone();
                self.bump();
                Ok((Some(text), None))
            }
            TokenKind::From => {
                self.bump();
                let path = self.expect(TokenKind::Path).map_err(|_| {
                    ParseError::new(self.cur.line, format!("expected a path after FROM in {what}"))
                })?;
                Ok((None, Some(path.literal)))
            }
            other => Err(self.error(format!(
                "{what} requires an inline string or FROM path, found {other}"
            ))),
        }
    }

    fn parse_ident_list(&mut self, what: &str) -> Result<Vec<String>, ParseError> {
        let mut names = vec![self.expect_ident(what)?];
        while self.cur.kind == TokenKind::Comma {
            self.bump();
            names.push(self.expect_ident(what)?);
        }
        Ok(names)
    }

    /// Parse `WITHIN (NUMBER | VAR)` into a literal limit or a late-bound
    /// input name.
    fn parse_within(&mut self) -> Result<(Option<u32>, Option<String>), ParseError> {
        self.bump();
        match self.cur.kind {
            TokenKind::Number => {
                let limit: u32 = self.cur.literal.parse().map_err(|_| {
                    ParseError::new(
                        self.cur.line,
                        format!("iteration limit '{}' out of range", self.cur.literal),
                    )
                })?;
                self.bump();
                Ok((Some(limit), None))
            }
            TokenKind::Var => {
                let name = self.cur.literal.clone();
                self.bump();
                Ok((None, Some(name)))
            }
            other => Err(self.error(format!(
                "WITHIN requires a number or input variable, found {other}"
            ))),
        }
    }

    /// Parse a trailing `SUPERVISED [HUMAN]` or `UNSUPERVISED` modifier.
    fn parse_supervision(&mut self) -> (Supervision, bool) {
        match self.cur.kind {
            TokenKind::Supervised => {
                self.bump();
                let human = self.cur.kind == TokenKind::Human;
                if human {
                    self.bump();
                }
                (Supervision::Enabled, human)
            }
            TokenKind::Unsupervised => {
                self.bump();
                (Supervision::Disabled, false)
            }
            _ => (Supervision::Inherit, false),
        }
    }

    fn parse_agent(&mut self, workflow: &mut Workflow) -> Result<(), ParseError> {
        let line = self.cur.line;
        self.bump();
        let name = self.expect_ident("agent name")?;
        let (prompt, from_path) = self.parse_source(&format!("agent '{name}'"))?;

        let mut agent = AgentDecl {
            name,
            prompt,
            from_path,
            requires: None,
            outputs: Vec::new(),
            supervision: Supervision::Inherit,
            human_only: false,
            is_skill: false,
            skill_instructions: None,
            line,
        };

        while !self.cur.kind.ends_line() {
            match self.cur.kind {
                TokenKind::Arrow => {
                    self.bump();
                    agent.outputs = self.parse_ident_list("output field name")?;
                }
                TokenKind::Requires => {
                    self.bump();
                    let profile = self.expect(TokenKind::Str)?;
                    agent.requires = Some(profile.literal);
                }
                TokenKind::Supervised | TokenKind::Unsupervised => {
                    let (supervision, human) = self.parse_supervision();
                    agent.supervision = supervision;
                    agent.human_only = human;
                }
                other => {
                    return Err(self.error(format!(
                        "unexpected {other} in AGENT '{}'",
                        agent.name
                    )));
                }
            }
        }

        workflow.agents.push(agent);
        self.expect_line_end()
    }

    fn parse_goal(&mut self, workflow: &mut Workflow, is_converge: bool) -> Result<(), ParseError> {
        let line = self.cur.line;
        let keyword = if is_converge { "CONVERGE" } else { "GOAL" };
        self.bump();
        let name = self.expect_ident("goal name")?;
        let (outcome, from_path) = self.parse_source(&format!("{keyword} '{name}'"))?;

        let mut goal = Goal {
            name,
            outcome,
            from_path,
            outputs: Vec::new(),
            using_agents: Vec::new(),
            is_converge,
            within_limit: None,
            within_var: None,
            supervision: Supervision::Inherit,
            human_only: false,
            line,
        };

        while !self.cur.kind.ends_line() {
            match self.cur.kind {
                TokenKind::Arrow => {
                    self.bump();
                    goal.outputs = self.parse_ident_list("output field name")?;
                }
                TokenKind::Using => {
                    self.bump();
                    goal.using_agents = self.parse_ident_list("agent name")?;
                }
                TokenKind::Within => {
                    if !is_converge {
                        return Err(self.error(format!(
                            "WITHIN is only valid on CONVERGE, not GOAL '{}'",
                            goal.name
                        )));
                    }
                    let (limit, var) = self.parse_within()?;
                    goal.within_limit = limit;
                    goal.within_var = var;
                }
                TokenKind::Supervised | TokenKind::Unsupervised => {
                    let (supervision, human) = self.parse_supervision();
                    goal.supervision = supervision;
                    goal.human_only = human;
                }
                other => {
                    return Err(self.error(format!(
                        "unexpected {other} in {keyword} '{}'",
                        goal.name
                    )));
                }
            }
        }

        if is_converge && goal.within_limit.is_none() && goal.within_var.is_none() {
            return Err(ParseError::new(
                line,
                format!("CONVERGE '{}' requires WITHIN", goal.name),
            ));
        }

        workflow.goals.push(goal);
        self.expect_line_end()
    }

    fn parse_step(&mut self, workflow: &mut Workflow, kind: StepKind) -> Result<(), ParseError> {
        let line = self.cur.line;
        self.bump();
        let name = self.expect_ident("step name")?;
        self.expect(TokenKind::Using).map_err(|_| {
            ParseError::new(line, format!("{} '{name}' requires USING", kind.as_str()))
        })?;
        let using_goals = self.parse_ident_list("goal name")?;

        let mut step = Step {
            kind,
            name,
            using_goals,
            within_limit: None,
            within_var: None,
            supervision: Supervision::Inherit,
            human_only: false,
            line,
        };

        while !self.cur.kind.ends_line() {
            match self.cur.kind {
                TokenKind::Within => {
                    if kind == StepKind::Run {
                        return Err(self.error(format!(
                            "WITHIN is only valid on LOOP, not RUN '{}'",
                            step.name
                        )));
                    }
                    let (limit, var) = self.parse_within()?;
                    step.within_limit = limit;
                    step.within_var = var;
                }
                TokenKind::Supervised | TokenKind::Unsupervised => {
                    let (supervision, human) = self.parse_supervision();
                    step.supervision = supervision;
                    step.human_only = human;
                }
                other => {
                    return Err(self.error(format!(
                        "unexpected {other} in {} '{}'",
                        kind.as_str(),
                        step.name
                    )));
                }
            }
        }

        if kind == StepKind::Loop && step.within_limit.is_none() && step.within_var.is_none() {
            return Err(ParseError::new(
                line,
                format!("LOOP '{}' requires WITHIN", step.name),
            ));
        }

        workflow.steps.push(step);
        self.expect_line_end()
    }
}
