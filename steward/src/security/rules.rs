//! Tier 1: deterministic static rules.
//!
//! Always runs, never calls out. A clean pass admits the call directly;
//! any rule hit produces a non-empty flag list which either escalates to
//! the LLM tiers or, when none are configured, denies outright.

use glob::Pattern;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::trace;
use url::Url;

use super::block::ContentBlock;
use super::policy::SecurityPolicy;
use crate::json_utils::string_leaves;

/// Flag names for the built-in rule families.
pub mod flags {
    /// The tool itself is on the policy denylist.
    pub const POLICY_TOOL: &str = "policy_tool";
    /// A path argument escapes the allow-list.
    pub const POLICY_PATH: &str = "policy_path";
    /// A command argument contains a denied substring.
    pub const COMMAND_DENYLIST: &str = "command_denylist";
    /// A URL argument points at a denied domain.
    pub const DOMAIN_DENYLIST: &str = "domain_denylist";
    /// A high-entropy argument traces back to untrusted content.
    pub const HIGH_ENTROPY: &str = "high_entropy";
}

/// Minimum argument length considered by the high-entropy rule; short
/// strings have too little signal for a byte-distribution estimate.
const ENTROPY_MIN_LEN: usize = 16;

/// The outcome of the static tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticReport {
    /// True when no rule fired.
    pub pass: bool,
    /// Names of the rules that fired, in rule order.
    pub flags: Vec<String>,
}

impl StaticReport {
    fn from_flags(flags: Vec<String>) -> Self {
        Self {
            pass: flags.is_empty(),
            flags,
        }
    }
}

/// Argument keys treated as filesystem paths by the path rule.
fn is_path_key(key: &str) -> bool {
    key == "path" || key == "file" || key.ends_with("_path") || key.ends_with("_file")
}

/// Argument keys treated as shell commands by the command rule.
fn is_command_key(key: &str) -> bool {
    key == "command" || key == "cmd" || key == "script"
}

/// Run every static rule over one tool call.
///
/// `blocks` is the verifier's current registry snapshot; the entropy
/// rule only fires for argument values that trace back to untrusted
/// block content.
#[must_use]
pub fn static_check(
    policy: &SecurityPolicy,
    tool: &str,
    args: &Value,
    blocks: &[ContentBlock],
) -> StaticReport {
    let mut found: Vec<String> = Vec::new();
    let mut hit = |flag: String| {
        if !found.contains(&flag) {
            found.push(flag);
        }
    };

    // Policy denylist.
    if policy.denied_tools.contains(tool) {
        hit(flags::POLICY_TOOL.to_string());
    }

    let entries = object_entries(args);

    // Path allow-list. Only meaningful when an allow-list is configured.
    if !policy.allowed_paths.is_empty() {
        let patterns: Vec<Pattern> = policy
            .allowed_paths
            .iter()
            .filter_map(|p| Pattern::new(p).ok())
            .collect();
        for (key, value) in &entries {
            if !is_path_key(key) {
                continue;
            }
            if let Value::String(path) = value
                && !patterns.iter().any(|p| p.matches(path))
            {
                trace!(tool, path = %path, "path outside allow-list");
                hit(flags::POLICY_PATH.to_string());
            }
        }
    }

    // Command substring denylist. Research mode with a declared scope
    // admits offensive commands that stay inside that scope, so the
    // rule family is suspended there (the LLM prompts still carry the
    // scope as framing).
    if !policy.in_research_scope() {
        for (key, value) in &entries {
            if !is_command_key(key) {
                continue;
            }
            if let Value::String(command) = value
                && policy.denied_commands.iter().any(|d| command.contains(d.as_str()))
            {
                hit(flags::COMMAND_DENYLIST.to_string());
            }
        }
    }

    // URL domain check across every string leaf.
    if !policy.denied_domains.is_empty() {
        for leaf in string_leaves(args) {
            for word in leaf.split_whitespace() {
                if !word.starts_with("http://") && !word.starts_with("https://") {
                    continue;
                }
                let Ok(url) = Url::parse(word) else { continue };
                let Some(host) = url.host_str() else { continue };
                if policy
                    .denied_domains
                    .iter()
                    .any(|d| host == d || host.ends_with(&format!(".{d}")))
                {
                    hit(flags::DOMAIN_DENYLIST.to_string());
                }
            }
        }
    }

    // Operator-supplied literal patterns.
    let rendered = args.to_string();
    for pattern in &policy.patterns {
        if let Ok(re) = Regex::new(&pattern.pattern)
            && re.is_match(&rendered)
        {
            hit(format!("pattern:{}", pattern.name));
        }
    }

    // High-entropy arguments sourced from untrusted blocks.
    let untrusted: Vec<&ContentBlock> = blocks
        .iter()
        .filter(|b| b.trust == super::block::TrustLevel::Untrusted)
        .collect();
    if !untrusted.is_empty() {
        for leaf in string_leaves(args) {
            if leaf.len() < ENTROPY_MIN_LEN {
                continue;
            }
            if super::block::shannon_entropy(leaf) <= policy.entropy_threshold {
                continue;
            }
            if untrusted.iter().any(|b| b.content.contains(leaf)) {
                hit(flags::HIGH_ENTROPY.to_string());
            }
        }
    }

    StaticReport::from_flags(found)
}

/// Flatten the top-level entries of an args object.
fn object_entries(args: &Value) -> Vec<(&String, &Value)> {
    match args {
        Value::Object(map) => map.iter().collect(),
        _ => Vec::new(),
    }
}
