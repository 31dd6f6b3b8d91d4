//! Variable interpolation over goal text.
//!
//! `$name` references resolve against the union of workflow inputs and
//! accumulated goal outputs. Unresolved references stay verbatim, which
//! makes repeated application idempotent once every referenced name is
//! bound.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;

fn variable_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$([A-Za-z_][A-Za-z0-9_]*)").expect("valid regex"))
}

/// Replace every `$name` whose name is bound in `env`; leave the rest
/// untouched.
#[must_use]
pub fn interpolate(text: &str, env: &BTreeMap<String, String>) -> String {
    variable_pattern()
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let name = &caps[1];
            env.get(name)
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}
