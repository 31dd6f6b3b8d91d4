//! Structured-output coercion.
//!
//! When a goal declares output fields, the final response is mined for
//! its first balanced JSON object and each declared field is flattened
//! to a string. Coercion failure is deliberately non-fatal: the raw
//! output is always retained as the goal's output.

use crate::json_utils;

/// Extract declared fields from a goal's final response.
///
/// Returns `None` when no JSON object can be recovered; otherwise the
/// declared fields present in the object, in declaration order, each
/// flattened to a string (strings verbatim, arrays and objects
/// re-serialised).
#[must_use]
pub fn coerce_outputs(content: &str, fields: &[String]) -> Option<Vec<(String, String)>> {
    let object = json_utils::extract_object(content)?;
    let map = object.as_object()?;
    Some(
        fields
            .iter()
            .filter_map(|field| {
                map.get(field)
                    .map(|value| (field.clone(), json_utils::value_to_string(value)))
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| (*n).to_string()).collect()
    }

    #[test]
    fn extracts_declared_fields_in_order() {
        let content = r#"Here you go:
```json
{"risks": ["a", "b"], "findings": "two issues", "extra": 1}
```"#;
        let out = coerce_outputs(content, &fields(&["findings", "risks"])).unwrap();
        assert_eq!(
            out,
            vec![
                ("findings".to_string(), "two issues".to_string()),
                ("risks".to_string(), r#"["a","b"]"#.to_string()),
            ]
        );
    }

    #[test]
    fn non_string_values_are_reserialised() {
        let out = coerce_outputs(r#"{"count": 3, "meta": {"k": true}}"#, &fields(&["count", "meta"]))
            .unwrap();
        assert_eq!(out[0].1, "3");
        assert_eq!(out[1].1, r#"{"k":true}"#);
    }

    #[test]
    fn bare_object_without_fence_is_found() {
        let out = coerce_outputs(
            "The answer is {\"result\": \"done\"} overall.",
            &fields(&["result"]),
        )
        .unwrap();
        assert_eq!(out[0].1, "done");
    }

    #[test]
    fn missing_fields_are_skipped() {
        let out = coerce_outputs(r#"{"findings": "x"}"#, &fields(&["findings", "risks"])).unwrap();
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn prose_without_json_is_none() {
        assert!(coerce_outputs("no object here", &fields(&["a"])).is_none());
    }
}
