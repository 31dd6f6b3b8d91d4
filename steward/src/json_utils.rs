//! JSON manipulation utilities.
//!
//! LLM responses carry JSON in inconvenient shapes: fenced code blocks,
//! prose around an object, stringified values. These helpers centralise
//! the recovery logic used by structured-output coercion, the
//! supervision phases, and the security supervisor tier.

use serde_json::Value;

/// Extract the first balanced JSON object from free-form model output.
///
/// Preference order:
/// 1. A ```` ```json ```` fenced block.
/// 2. Any ```` ``` ```` fenced block containing an object.
/// 3. The first balanced `{…}` substring found by brace matching.
#[must_use]
pub fn extract_object(text: &str) -> Option<Value> {
    for block in fenced_blocks(text) {
        if let Some(value) = first_balanced_object(block) {
            return Some(value);
        }
    }
    first_balanced_object(text)
}

/// Iterate the contents of fenced code blocks, `json`-tagged fences
/// first.
fn fenced_blocks(text: &str) -> Vec<&str> {
    let mut tagged = Vec::new();
    let mut untagged = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find("```") {
        let after = &rest[start + 3..];
        let Some(end) = after.find("```") else { break };
        let block = &after[..end];
        let (tag, body) = match block.split_once('\n') {
            Some((tag, body)) => (tag.trim(), body),
            None => ("", block),
        };
        if tag.eq_ignore_ascii_case("json") {
            tagged.push(body);
        } else {
            untagged.push(body);
        }
        rest = &after[end + 3..];
    }
    tagged.extend(untagged);
    tagged
}

/// Find the first balanced `{…}` substring and parse it.
///
/// Brace matching is string-aware: braces inside JSON string literals do
/// not affect the depth count.
#[must_use]
pub fn first_balanced_object(text: &str) -> Option<Value> {
    let bytes = text.as_bytes();
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    let candidate = &text[start..=start + offset];
                    return serde_json::from_str(candidate).ok();
                }
            }
            _ => {}
        }
    }
    None
}

/// Flatten a JSON value to the string form stored in goal outputs:
/// strings verbatim, everything else re-serialised.
#[must_use]
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string(other).unwrap_or_else(|_| other.to_string()),
    }
}

/// Collect every string leaf in a JSON value, depth-first.
#[must_use]
pub fn string_leaves(value: &Value) -> Vec<&str> {
    let mut leaves = Vec::new();
    collect_strings(value, &mut leaves);
    leaves
}

fn collect_strings<'a>(value: &'a Value, leaves: &mut Vec<&'a str>) {
    match value {
        Value::String(s) => leaves.push(s),
        Value::Array(items) => {
            for item in items {
                collect_strings(item, leaves);
            }
        }
        Value::Object(map) => {
            for item in map.values() {
                collect_strings(item, leaves);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_from_json_fence_first() {
        let text = "Sure:\n```json\n{\"a\": 1}\n```\nand also {\"b\": 2}";
        let value = extract_object(text).unwrap();
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn extracts_from_untagged_fence() {
        let text = "```\n{\"a\": 1}\n```";
        assert_eq!(extract_object(text).unwrap()["a"], 1);
    }

    #[test]
    fn falls_back_to_brace_matching() {
        let text = "The result is {\"nested\": {\"x\": 2}} as requested.";
        let value = extract_object(text).unwrap();
        assert_eq!(value["nested"]["x"], 2);
    }

    #[test]
    fn braces_inside_strings_do_not_break_matching() {
        let text = r#"{"text": "a } inside", "n": 1}"#;
        let value = extract_object(text).unwrap();
        assert_eq!(value["n"], 1);
    }

    #[test]
    fn no_object_yields_none() {
        assert!(extract_object("plain prose only").is_none());
        assert!(extract_object("{broken").is_none());
    }

    #[test]
    fn value_to_string_keeps_strings_verbatim() {
        assert_eq!(value_to_string(&Value::String("x".into())), "x");
        assert_eq!(
            value_to_string(&serde_json::json!(["a", "b"])),
            r#"["a","b"]"#
        );
    }

    #[test]
    fn string_leaves_walks_nested_values() {
        let value = serde_json::json!({
            "a": "one",
            "b": ["two", {"c": "three"}],
            "d": 4
        });
        let mut leaves = string_leaves(&value);
        leaves.sort_unstable();
        assert_eq!(leaves, vec!["one", "three", "two"]);
    }
}
