//! Deterministic session replay.
//!
//! Replay is pure: it reads a recorded [`Session`] and renders a
//! human-readable timeline grouped by goal. It never re-executes
//! anything and never consults a clock, so a fixed session renders
//! byte-identically at a fixed verbosity.
//!
//! Verbosity levels:
//! - `0` — one line per event
//! - `1` — additionally expands message content, tool args, and results
//! - `2` — additionally expands prompt/response/thinking payloads from
//!   `event.meta`

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::{Event, Session};

/// Render a session timeline at the given verbosity.
#[must_use]
pub fn render(session: &Session, verbosity: u8) -> String {
    let mut out = String::new();
    out.push_str(&format!("session {}\n", session.id));
    out.push_str(&format!("workflow: {}\n", session.workflow_name));
    out.push_str(&format!("status: {}\n", session.status));

    let mut current_group: Option<Option<&str>> = None;
    for event in &session.events {
        let group = event.goal.as_deref();
        if current_group != Some(group) {
            current_group = Some(group);
            match group {
                Some(goal) => out.push_str(&format!("\n== goal {goal} ==\n")),
                None => out.push_str("\n== workflow ==\n"),
            }
        }
        render_event(&mut out, event, verbosity);
    }
    out
}

fn timestamp(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

fn render_event(out: &mut String, event: &Event, verbosity: u8) {
    out.push_str(&format!("[{}] {}", timestamp(&event.timestamp), event.event_type));
    if let Some(ref step) = event.step {
        out.push_str(&format!(" step={step}"));
    }
    if let Some(ref tool) = event.tool {
        out.push_str(&format!(" tool={tool}"));
    }
    if let Some(ms) = event.duration_ms {
        out.push_str(&format!(" ({ms}ms)"));
    }
    if let Some(ref error) = event.error {
        out.push_str(&format!(" error={error}"));
    }
    out.push('\n');

    if verbosity >= 1 {
        if let Some(ref args) = event.args {
            out.push_str(&format!(
                "    args: {}\n",
                serde_json::to_string(args).unwrap_or_default()
            ));
        }
        if let Some(ref content) = event.content {
            push_block(out, "content", content);
        }
    }

    if verbosity >= 2
        && let Some(Value::Object(meta)) = &event.meta
    {
        let mut keys: Vec<&String> = meta.keys().collect();
        keys.sort();
        for key in keys {
            match &meta[key.as_str()] {
                Value::String(text) => push_block(out, &format!("meta.{key}"), text),
                other => out.push_str(&format!(
                    "    meta.{key}: {}\n",
                    serde_json::to_string(other).unwrap_or_default()
                )),
            }
        }
    }
}

/// Print a possibly multi-line payload indented under a label.
fn push_block(out: &mut String, label: &str, text: &str) {
    let mut lines = text.lines();
    match lines.next() {
        Some(first) => out.push_str(&format!("    {label}: {first}\n")),
        None => out.push_str(&format!("    {label}:\n")),
    }
    for line in lines {
        out.push_str(&format!("        {line}\n"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{EventType, SessionStatus};
    use chrono::TimeZone;
    use std::collections::BTreeMap;

    fn at(seconds: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, seconds).unwrap()
    }

    fn stamped(event: Event, seconds: u32) -> Event {
        Event {
            timestamp: at(seconds),
            ..event
        }
    }

    fn fixture() -> Session {
        let mut session = Session::new("demo", BTreeMap::new());
        session.id = "fixed-id".to_string();
        session.status = SessionStatus::Complete;
        session.events = vec![
            stamped(Event::new(EventType::WorkflowStart), 0),
            stamped(Event::new(EventType::GoalStart).goal("analyze"), 1),
            stamped(
                Event::new(EventType::ToolCall)
                    .goal("analyze")
                    .tool("read_file")
                    .args(serde_json::json!({"path": "a.txt"})),
                2,
            ),
            stamped(
                Event::new(EventType::ToolResult)
                    .goal("analyze")
                    .tool("read_file")
                    .content("line one\nline two")
                    .duration_ms(3),
                3,
            ),
            stamped(
                Event::new(EventType::Assistant)
                    .goal("analyze")
                    .content("done")
                    .meta(serde_json::json!({"prompt": "Analyze it", "thinking": "hm"})),
                4,
            ),
            stamped(Event::new(EventType::GoalEnd).goal("analyze"), 5),
            stamped(Event::new(EventType::WorkflowEnd), 6),
        ];
        session
    }

    #[test]
    fn verbosity_zero_is_one_line_per_event() {
        let rendered = render(&fixture(), 0);
        let expected = "session fixed-id\n\
             workflow: demo\n\
             status: complete\n\
             \n\
             == workflow ==\n\
             [2026-03-14T09:26:00.000Z] workflow_start\n\
             \n\
             == goal analyze ==\n\
             [2026-03-14T09:26:01.000Z] goal_start\n\
             [2026-03-14T09:26:02.000Z] tool_call tool=read_file\n\
             [2026-03-14T09:26:03.000Z] tool_result tool=read_file (3ms)\n\
             [2026-03-14T09:26:04.000Z] assistant\n\
             [2026-03-14T09:26:05.000Z] goal_end\n\
             \n\
             == workflow ==\n\
             [2026-03-14T09:26:06.000Z] workflow_end\n";
        assert_eq!(rendered, expected);
    }

    #[test]
    fn verbosity_one_expands_content_and_args() {
        let rendered = render(&fixture(), 1);
        assert!(rendered.contains("    args: {\"path\":\"a.txt\"}\n"));
        assert!(rendered.contains("    content: line one\n        line two\n"));
        // Meta stays hidden below verbosity 2.
        assert!(!rendered.contains("meta.prompt"));
    }

    #[test]
    fn verbosity_two_expands_meta_sorted() {
        let rendered = render(&fixture(), 2);
        let prompt = rendered.find("meta.prompt: Analyze it").unwrap();
        let thinking = rendered.find("meta.thinking: hm").unwrap();
        assert!(prompt < thinking);
    }

    #[test]
    fn replay_is_deterministic() {
        let session = fixture();
        assert_eq!(render(&session, 2), render(&session, 2));
    }
}
