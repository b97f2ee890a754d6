// crates/vitrina-server/src/assistant/json.rs
// Lenient JSON extraction from model output

use serde_json::Value;
use tracing::warn;

/// Pull a JSON object out of model text that may be wrapped in code fences,
/// prose, or contain several objects. Scans for balanced `{...}` spans
/// (string- and escape-aware) and keeps the longest one that parses; falls
/// back to parsing the whole text. Returns an empty object when nothing
/// parses.
pub fn extract_json_safely(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Object(Default::default());
    }

    let mut best: Option<(usize, Value)> = None;
    let mut depth = 0usize;
    let mut start: Option<usize> = None;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' if depth > 0 => in_string = true,
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0
                    && let Some(s) = start
                {
                    let candidate = &text[s..=i];
                    if candidate.len() > best.as_ref().map_or(0, |(len, _)| *len)
                        && let Ok(parsed) = serde_json::from_str::<Value>(candidate)
                        && parsed.is_object()
                    {
                        best = Some((candidate.len(), parsed));
                    }
                }
            }
            _ => {}
        }
    }

    if let Some((_, value)) = best {
        return value;
    }

    match serde_json::from_str::<Value>(text) {
        Ok(value) if value.is_object() => value,
        _ => {
            warn!("Failed to extract JSON from text: '{:.200}'", text);
            Value::Object(Default::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_object() {
        let v = extract_json_safely(r#"{"action": "greeting"}"#);
        assert_eq!(v["action"], "greeting");
    }

    #[test]
    fn test_code_fenced_object() {
        let text = "Ось відповідь:\n```json\n{\"action\": \"invalid\", \"confidence\": 0.9}\n```";
        let v = extract_json_safely(text);
        assert_eq!(v["action"], "invalid");
        assert_eq!(v["confidence"], 0.9);
    }

    #[test]
    fn test_keeps_longest_of_multiple_objects() {
        let text = r#"{"a": 1} text {"action": "product_search", "semantic_subqueries": ["x", "y"]}"#;
        let v = extract_json_safely(text);
        assert_eq!(v["action"], "product_search");
    }

    #[test]
    fn test_braces_inside_strings_do_not_break_scan() {
        let text = r#"{"assistant_message": "приклад: {не json}", "action": "greeting"}"#;
        let v = extract_json_safely(text);
        assert_eq!(v["action"], "greeting");
    }

    #[test]
    fn test_nested_objects() {
        let text = r#"{"a": {"b": {"c": 1}}, "action": "clarification"}"#;
        let v = extract_json_safely(text);
        assert_eq!(v["a"]["b"]["c"], 1);
    }

    #[test]
    fn test_garbage_returns_empty_object() {
        let v = extract_json_safely("не json взагалі");
        assert!(v.as_object().unwrap().is_empty());
    }

    #[test]
    fn test_escaped_quotes_in_strings() {
        let text = r#"{"reason": "сказав \"так\" {і все}", "action": "greeting"}"#;
        let v = extract_json_safely(text);
        assert_eq!(v["action"], "greeting");
    }
}
