//! Security policy: the configuration the static tier checks against.
//!
//! A policy is explicit state handed to the verifier at construction.
//! There are no ambient globals; custom patterns and denylists arrive
//! here and nowhere else.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::agentfile::SecurityMode;

/// A named literal pattern checked against tool arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyPattern {
    /// Name reported in the static flag (`pattern:<name>`).
    pub name: String,
    /// Regular expression source.
    pub pattern: String,
}

/// Configuration of the tiered verifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityPolicy {
    /// Workflow security mode.
    pub mode: SecurityMode,

    /// Scope string; required in research mode, where it frames the
    /// LLM prompts and relaxes the offensive-command rules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    /// Tools that are never admitted.
    #[serde(default)]
    pub denied_tools: HashSet<String>,

    /// Glob patterns of admissible filesystem paths. Empty means no
    /// path restriction.
    #[serde(default)]
    pub allowed_paths: Vec<String>,

    /// Substrings that flag a command argument.
    #[serde(default)]
    pub denied_commands: Vec<String>,

    /// Domains (including subdomains) that flag a URL argument.
    #[serde(default)]
    pub denied_domains: Vec<String>,

    /// Custom literal patterns supplied by the operator.
    #[serde(default)]
    pub patterns: Vec<PolicyPattern>,

    /// Entropy threshold (bits per byte) above which an argument sourced
    /// from untrusted content is flagged.
    pub entropy_threshold: f64,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            mode: SecurityMode::Default,
            scope: None,
            denied_tools: HashSet::new(),
            allowed_paths: Vec::new(),
            denied_commands: Vec::new(),
            denied_domains: Vec::new(),
            patterns: Vec::new(),
            entropy_threshold: 4.5,
        }
    }
}

impl SecurityPolicy {
    /// Create a policy with the given mode and optional scope, as read
    /// from a workflow's `SECURITY` directive.
    #[must_use]
    pub fn for_mode(mode: SecurityMode, scope: Option<String>) -> Self {
        Self {
            mode,
            scope,
            ..Self::default()
        }
    }

    /// The restrictive policy applied to sub-agents that carry no policy
    /// of their own: destructive shell idioms are flagged and privilege
    /// escalation denied outright.
    #[must_use]
    pub fn restrictive() -> Self {
        Self {
            denied_commands: [
                "rm -rf",
                "mkfs",
                "dd if=",
                "sudo ",
                "chmod 777",
                "> /dev/",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
            ..Self::default()
        }
    }

    /// Deny a tool by (surfaced) name.
    #[must_use]
    pub fn deny_tool(mut self, name: impl Into<String>) -> Self {
        self.denied_tools.insert(name.into());
        self
    }

    /// Restrict admissible paths to the given glob patterns.
    #[must_use]
    pub fn allow_paths<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_paths.extend(patterns.into_iter().map(Into::into));
        self
    }

    /// Flag command arguments containing the substring.
    #[must_use]
    pub fn deny_command(mut self, substring: impl Into<String>) -> Self {
        self.denied_commands.push(substring.into());
        self
    }

    /// Flag URL arguments pointing at the domain (or a subdomain).
    #[must_use]
    pub fn deny_domain(mut self, domain: impl Into<String>) -> Self {
        self.denied_domains.push(domain.into());
        self
    }

    /// Add a custom literal pattern.
    #[must_use]
    pub fn with_pattern(mut self, name: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.patterns.push(PolicyPattern {
            name: name.into(),
            pattern: pattern.into(),
        });
        self
    }

    /// Override the high-entropy threshold.
    #[must_use]
    pub fn with_entropy_threshold(mut self, threshold: f64) -> Self {
        self.entropy_threshold = threshold;
        self
    }

    /// Whether research mode with a scope is active, which relaxes the
    /// offensive-command rule family.
    #[must_use]
    pub fn in_research_scope(&self) -> bool {
        self.mode == SecurityMode::Research && self.scope.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_has_no_denials() {
        let policy = SecurityPolicy::default();
        assert!(policy.denied_tools.is_empty());
        assert!(policy.allowed_paths.is_empty());
        assert_eq!(policy.mode, SecurityMode::Default);
        assert!((policy.entropy_threshold - 4.5).abs() < f64::EPSILON);
    }

    #[test]
    fn restrictive_flags_destructive_commands() {
        let policy = SecurityPolicy::restrictive();
        assert!(policy.denied_commands.iter().any(|c| c == "rm -rf"));
    }

    #[test]
    fn builders_compose() {
        let policy = SecurityPolicy::default()
            .deny_tool("write_file")
            .allow_paths(["workspace/**"])
            .deny_domain("evil.example")
            .with_pattern("exfil", r"curl\s+-d")
            .with_entropy_threshold(5.0);
        assert!(policy.denied_tools.contains("write_file"));
        assert_eq!(policy.allowed_paths, vec!["workspace/**"]);
        assert_eq!(policy.denied_domains, vec!["evil.example"]);
        assert_eq!(policy.patterns[0].name, "exfil");
        assert!((policy.entropy_threshold - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn research_scope_detection() {
        let without_scope = SecurityPolicy::for_mode(SecurityMode::Research, None);
        assert!(!without_scope.in_research_scope());
        let with_scope =
            SecurityPolicy::for_mode(SecurityMode::Research, Some("lab pentest".to_string()));
        assert!(with_scope.in_research_scope());
        let paranoid = SecurityPolicy::for_mode(SecurityMode::Paranoid, None);
        assert!(!paranoid.in_research_scope());
    }
}
