//! The goal loop: one LLM session driven to completion.
//!
//! A goal is a chat conversation that alternates model turns and tool
//! execution until the model answers without tool calls. Tool calls in a
//! single assistant turn run concurrently; their results are reinserted
//! in the original call order before the next turn. Every call passes
//! the security verifier first, and external tool results are registered
//! as untrusted blocks.

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;
use std::time::Instant;

use futures::future::join_all;
use regex::Regex;
use serde_json::Value;
use tracing::{Instrument, debug, info_span};

use crate::chat::{ChatRequest, Message, Provider, Role, ToolCall};
use crate::error::{Error, Result};
use crate::security::SecurityVerifier;
use crate::session::{Event, EventType, SessionLog};
use crate::tool::ToolRegistry;
use crate::usage::Usage;

use super::CancelToken;

/// Upper bound on chat turns per goal; a runaway loop fails the
/// workflow instead of burning tokens forever.
const MAX_TURNS: usize = 50;

/// Tool names whose results are external content and therefore enter
/// the block registry as untrusted.
const EXTERNAL_TOOLS: [&str; 2] = ["web_fetch", "web_search"];

fn skill_sentinel() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\[use-skill:([A-Za-z0-9_-]+)\]").expect("valid regex")
    })
}

fn is_external_source(tool: &str) -> bool {
    tool.starts_with(crate::tool::registry::MCP_PREFIX) || EXTERNAL_TOOLS.contains(&tool)
}

/// Everything a chat loop needs, borrowed from its caller.
pub(crate) struct ChatLoop<'a> {
    /// Provider answering the chat turns.
    pub provider: &'a dyn Provider,
    /// Tools exposed to the model.
    pub registry: &'a ToolRegistry,
    /// Admission control; `None` skips verification entirely.
    pub verifier: Option<&'a SecurityVerifier>,
    /// Session event sink.
    pub log: &'a SessionLog,
    /// Goal name used to tag events.
    pub goal: &'a str,
    /// Skill name → instructions, for `[use-skill:…]` activation.
    pub skills: &'a HashMap<String, String>,
    /// Cooperative cancellation.
    pub cancel: &'a CancelToken,
    /// Sub-agent name when this loop runs inside one.
    pub agent: Option<&'a str>,
}

/// Result of a completed chat loop.
#[derive(Debug, Clone)]
pub(crate) struct ChatOutcome {
    /// The model's final text.
    pub content: String,
    /// Tools dispatched at least once, in first-use order.
    pub tools_used: Vec<String>,
    /// Number of tool calls the model issued.
    pub tool_calls: usize,
    /// Tokens consumed, including security tiers.
    pub usage: Usage,
}

impl ChatLoop<'_> {
    /// Tag an event with the goal and, inside a sub-agent, the agent
    /// name (merged into `meta`).
    fn tag(&self, event: Event) -> Event {
        let mut event = event.goal(self.goal);
        if let Some(agent) = self.agent {
            let mut meta = match event.meta.take() {
                Some(Value::Object(map)) => map,
                _ => serde_json::Map::new(),
            };
            meta.insert("agent".to_string(), Value::String(agent.to_string()));
            event.meta = Some(Value::Object(meta));
        }
        event
    }

    /// Drive the conversation until the model produces a final answer.
    pub async fn run(&self, mut messages: Vec<Message>) -> Result<ChatOutcome> {
        let span = info_span!("goal_loop", goal = self.goal, agent = self.agent.unwrap_or(""));
        self.run_inner(&mut messages).instrument(span).await
    }

    async fn run_inner(&self, messages: &mut Vec<Message>) -> Result<ChatOutcome> {
        for message in messages.iter() {
            let event_type = match message.role {
                Role::System => EventType::System,
                Role::User => EventType::User,
                _ => continue,
            };
            self.log
                .record(self.tag(Event::new(event_type).content(message.content.clone())))?;
        }

        let definitions = self.registry.definitions();
        let mut tools_used: Vec<String> = Vec::new();
        let mut issued_calls = 0usize;
        let mut usage = Usage::zero();
        let mut activated_skills: HashSet<String> = HashSet::new();

        for turn in 0..MAX_TURNS {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let request =
                ChatRequest::with_messages(messages.clone()).tools(definitions.clone());
            let response = tokio::select! {
                () = self.cancel.cancelled() => return Err(Error::Cancelled),
                result = self.provider.chat(&request) => result?,
            };
            usage += response.usage;
            debug!(goal = self.goal, turn, tool_calls = response.tool_calls.len(), "chat turn");

            let mut event = Event::new(EventType::Assistant).content(response.content.clone());
            if let Some(ref thinking) = response.thinking {
                event = event.meta(serde_json::json!({"thinking": thinking.clone()}));
            }
            self.log.record(self.tag(event))?;

            // Skill activation sentinel takes precedence over tool calls.
            if let Some(name) = self.pending_skill(&response.content, &activated_skills) {
                activated_skills.insert(name.clone());
                messages.push(Message::assistant(response.content.clone()));
                let instructions = &self.skills[&name];
                let injection = format!("Skill '{name}' activated:\n\n{instructions}");
                self.log
                    .record(self.tag(Event::new(EventType::User).content(injection.clone())))?;
                messages.push(Message::user(injection));
                continue;
            }

            if !response.has_tool_calls() {
                return Ok(ChatOutcome {
                    content: response.content,
                    tools_used,
                    tool_calls: issued_calls,
                    usage,
                });
            }

            messages.push(Message::assistant_with_calls(
                response.content.clone(),
                response.tool_calls.clone(),
            ));

            // Fan out, join all, reinsert in call order.
            let results = join_all(
                response
                    .tool_calls
                    .iter()
                    .map(|call| self.execute_call(call)),
            )
            .await;

            for result in results {
                let (message, used, call_usage) = result?;
                issued_calls += 1;
                usage += call_usage;
                if let Some(name) = used
                    && !tools_used.contains(&name)
                {
                    tools_used.push(name);
                }
                messages.push(message);
            }
        }

        Err(Error::internal(format!(
            "goal '{}' exceeded {MAX_TURNS} chat turns",
            self.goal
        )))
    }

    /// A skill named by the sentinel that resolves and has not been
    /// activated yet.
    fn pending_skill(&self, content: &str, activated: &HashSet<String>) -> Option<String> {
        let captures = skill_sentinel().captures(content)?;
        let name = captures[1].to_string();
        (self.skills.contains_key(&name) && !activated.contains(&name)).then_some(name)
    }

    /// Verify and dispatch one tool call, producing the tool-role
    /// message for the conversation.
    ///
    /// Tool failures and security denials become `Error: …` message
    /// content; they never cancel sibling calls.
    async fn execute_call(
        &self,
        call: &ToolCall,
    ) -> Result<(Message, Option<String>, Usage)> {
        self.log.record(
            self.tag(
                Event::new(EventType::ToolCall)
                    .tool(&call.name)
                    .args(call.arguments.clone())
                    .meta(serde_json::json!({"call_id": call.id.clone()})),
            ),
        )?;

        let started = Instant::now();
        let mut usage = Usage::zero();
        let mut args = call.arguments.clone();

        if let Some(verifier) = self.verifier {
            let decision = verifier
                .verify(Some(self.goal), &call.name, &args, self.log)
                .await?;
            usage += decision.usage;
            if !decision.admitted() {
                let content = format!("Error: security: {}", decision.reason);
                self.log.record(
                    self.tag(
                        Event::new(EventType::ToolResult)
                            .tool(&call.name)
                            .error(content.clone())
                            .duration_ms(elapsed_ms(started))
                            .meta(serde_json::json!({"call_id": call.id.clone()})),
                    ),
                )?;
                return Ok((Message::tool(&call.id, content), None, usage));
            }
            if let Some(revised) = decision.args {
                args = revised;
            }
        }

        let span = info_span!("tool", tool.name = %call.name, tool.id = %call.id);
        let outcome = tokio::select! {
            () = self.cancel.cancelled() => return Err(Error::Cancelled),
            result = self.registry.dispatch(&call.name, args).instrument(span) => result,
        };

        match outcome {
            Ok(output) => {
                let text = output.to_llm_string();
                if let Some(verifier) = self.verifier
                    && is_external_source(&call.name)
                    && !text.is_empty()
                {
                    verifier.register_untrusted(
                        &format!("tool:{}", call.name),
                        &text,
                        Some(self.goal),
                        self.log,
                    )?;
                }
                self.log.record(
                    self.tag(
                        Event::new(EventType::ToolResult)
                            .tool(&call.name)
                            .content(text.clone())
                            .duration_ms(elapsed_ms(started))
                            .meta(serde_json::json!({"call_id": call.id.clone()})),
                    ),
                )?;
                Ok((Message::tool(&call.id, text), Some(call.name.clone()), usage))
            }
            Err(e) => {
                let content = format!("Error: {e}");
                self.log.record(
                    self.tag(
                        Event::new(EventType::ToolResult)
                            .tool(&call.name)
                            .error(content.clone())
                            .duration_ms(elapsed_ms(started))
                            .meta(serde_json::json!({"call_id": call.id.clone()})),
                    ),
                )?;
                Ok((Message::tool(&call.id, content), Some(call.name.clone()), usage))
            }
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
