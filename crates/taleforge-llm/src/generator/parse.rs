use crate::RawContent;
use crate::types::truncate_chars;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

/// Previews carried by [`ParseError`] are cut to this many characters.
const PREVIEW_CHARS: usize = 200;

/// Levels of string-literal wrapping unwrapped before giving up.
const MAX_UNESCAPE_DEPTH: usize = 3;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Could not parse model output as JSON: {reason}. Content preview: {original_preview}")]
    Malformed {
        reason: String,
        original_preview: String,
        cleaned_preview: String,
    },

    #[error("Expected a JSON object, got {kind}: {preview}")]
    NotAnObject { kind: &'static str, preview: String },
}

/// Turn extracted model content into a JSON object.
///
/// Structured input passes through. Text goes through the repair layers in
/// order, stopping at the first one that yields valid JSON.
pub fn to_object(content: RawContent) -> Result<Map<String, Value>, ParseError> {
    let value = match content {
        RawContent::Json(Value::String(text)) | RawContent::Text(text) => parse_text(&text)?,
        RawContent::Json(value) => value,
    };
    into_object(value)
}

/// Strip a surrounding ``` fence, ignoring any language tag.
pub(crate) fn strip_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(after_ticks) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match after_ticks.find('\n') {
        Some(newline) => &after_ticks[newline + 1..],
        None => after_ticks.trim_start_matches('`'),
    };
    body.trim_end().trim_end_matches('`').trim()
}

fn parse_text(original: &str) -> Result<Value, ParseError> {
    let mut text = strip_fences(original).to_string();

    if looks_escaped(&text) {
        match unescape(&text) {
            Unescaped::Value(value) => {
                debug!("Decoded model output from an escaped JSON string");
                return Ok(value);
            }
            Unescaped::Text(inner) => text = inner,
        }
    }

    let strict_err = match serde_json::from_str::<Value>(&text) {
        Ok(value) => return Ok(value),
        Err(e) => e,
    };
    debug!("Strict JSON parse failed: {}", strict_err);

    let cleaned = strip_trailing_commas(&strip_line_comments(&text));
    let cleaned_err = match serde_json::from_str::<Value>(&cleaned) {
        Ok(value) => {
            debug!("Parsed JSON after comment and trailing-comma cleanup");
            return Ok(value);
        }
        Err(e) => e,
    };

    // Slice the uncleaned text first: a `//` in surrounding prose would
    // otherwise swallow the object along with the rest of its line.
    for candidate in [text.as_str(), cleaned.as_str()] {
        if let Some(slice) = brace_slice(candidate)
            && let Ok(value) = serde_json::from_str::<Value>(slice)
        {
            debug!("Parsed JSON from the outermost braces");
            return Ok(value);
        }
    }

    Err(ParseError::Malformed {
        reason: cleaned_err.to_string(),
        original_preview: truncate_chars(original, PREVIEW_CHARS),
        cleaned_preview: truncate_chars(&cleaned, PREVIEW_CHARS),
    })
}

fn into_object(value: Value) -> Result<Map<String, Value>, ParseError> {
    match value {
        Value::Object(map) => Ok(map),
        Value::Array(mut items) if matches!(items.first(), Some(Value::Object(_))) => {
            match items.swap_remove(0) {
                Value::Object(map) => Ok(map),
                other => Err(not_an_object(&other)),
            }
        }
        other => Err(not_an_object(&other)),
    }
}

fn not_an_object(value: &Value) -> ParseError {
    ParseError::NotAnObject {
        kind: kind_name(value),
        preview: truncate_chars(&value.to_string(), PREVIEW_CHARS),
    }
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn looks_escaped(text: &str) -> bool {
    (text.len() >= 2 && text.starts_with('"') && text.ends_with('"')) || text.contains("\\\"")
}

enum Unescaped {
    Value(Value),
    Text(String),
}

/// Decode text that is (possibly repeatedly) a JSON string literal.
fn unescape(text: &str) -> Unescaped {
    let mut current = text.to_string();
    for depth in 0..MAX_UNESCAPE_DEPTH {
        match serde_json::from_str::<Value>(&current) {
            Ok(Value::String(inner)) => {
                current = strip_fences(&inner).to_string();
                if !looks_escaped(&current) {
                    return Unescaped::Text(current);
                }
            }
            Ok(value) => return Unescaped::Value(value),
            Err(e) if depth == 0 => {
                debug!("Failed to decode escaped JSON string: {}", e);
                return Unescaped::Text(current.replace("\\\"", "\"").replace("\\n", "\n"));
            }
            Err(_) => return Unescaped::Text(current),
        }
    }
    Unescaped::Text(current)
}

/// Remove `//` comments that start outside string literals.
fn strip_line_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut in_string = false;
    let mut escaped = false;

    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '/' if chars.peek() == Some(&'/') => {
                for skipped in chars.by_ref() {
                    if skipped == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            _ => out.push(c),
        }
    }
    out
}

/// Drop commas that directly precede a closing brace or bracket.
fn strip_trailing_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        if c == '"' {
            in_string = true;
        } else if c == ',' {
            let next = chars[i + 1..].iter().copied().find(|n| !n.is_whitespace());
            if matches!(next, Some('}') | Some(']')) {
                continue;
            }
        }
        out.push(c);
    }
    out
}

fn brace_slice(text: &str) -> Option<&str> {
    let first = text.find('{')?;
    let last = text.rfind('}')?;
    (last > first).then(|| &text[first..=last])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(text: &str) -> Map<String, Value> {
        to_object(RawContent::Text(text.to_string())).unwrap()
    }

    fn obj(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_strip_fences() {
        assert_eq!(strip_fences("```json\n{\"a\": 1}\n```"), r#"{"a": 1}"#);
        assert_eq!(strip_fences("```\n{\"a\": 1}\n```"), r#"{"a": 1}"#);
        assert_eq!(strip_fences("  {\"a\": 1}  "), r#"{"a": 1}"#);
        assert_eq!(strip_fences("```{\"a\": 1}```"), r#"{"a": 1}"#);
    }

    #[test]
    fn test_structured_input_passes_through() {
        let value = json!({"title": "T", "rootNode": {"content": "c"}});
        assert_eq!(
            to_object(RawContent::Json(value.clone())).unwrap(),
            obj(value)
        );
    }

    #[test]
    fn test_plain_json() {
        assert_eq!(parse(r#"{"a": 1}"#), obj(json!({"a": 1})));
    }

    #[test]
    fn test_fenced_commented_trailing_commas_match_clean_input() {
        let clean = r#"{"title": "T", "rootNode": {"content": "see http://example.com", "options": [1, 2]}}"#;
        let messy = "```json\n{\n  // the title\n  \"title\": \"T\",\n  \"rootNode\": {\n    \"content\": \"see http://example.com\", // keep url\n    \"options\": [1, 2,],\n  },\n}\n```";
        assert_eq!(parse(messy), parse(clean));
    }

    #[test]
    fn test_double_encoded_string() {
        let inner = r#"{"title": "T", "note": "say \"hi\""}"#;
        let encoded = serde_json::to_string(inner).unwrap();
        assert_eq!(
            parse(&encoded),
            obj(json!({"title": "T", "note": "say \"hi\""}))
        );
    }

    #[test]
    fn test_triple_encoded_string() {
        let inner = r#"{"a": 1}"#;
        let twice = serde_json::to_string(&serde_json::to_string(inner).unwrap()).unwrap();
        assert_eq!(parse(&twice), obj(json!({"a": 1})));
    }

    #[test]
    fn test_naive_unescape_when_literal_decode_fails() {
        let text = r#"{\"a\": 1,\n \"b\": \"c\"}"#;
        assert_eq!(parse(text), obj(json!({"a": 1, "b": "c"})));
    }

    #[test]
    fn test_prose_around_object() {
        let text = "Sure! Here is your story:\n{\"title\": \"T\"}\nEnjoy the adventure.";
        assert_eq!(parse(text), obj(json!({"title": "T"})));
    }

    #[test]
    fn test_url_in_prose_before_object() {
        let text = "Story per https://example.com/guide: {\"title\": \"T\", \"rootNode\": {\"content\": \"c\", \"isEnding\": true}}";
        assert_eq!(
            parse(text),
            obj(json!({"title": "T", "rootNode": {"content": "c", "isEnding": true}}))
        );
    }

    #[test]
    fn test_brace_slice_falls_back_to_cleaned_text() {
        let text = "Here you go: {\"a\": 1, // count\n \"b\": [2,],} done";
        assert_eq!(parse(text), obj(json!({"a": 1, "b": [2]})));
    }

    #[test]
    fn test_list_of_objects_takes_first() {
        assert_eq!(parse(r#"[{"a": 1}, {"b": 2}]"#), obj(json!({"a": 1})));
    }

    #[test]
    fn test_non_object_values_rejected() {
        for text in ["[1, 2]", "[]", "42", "null"] {
            let err = to_object(RawContent::Text(text.to_string())).unwrap_err();
            assert!(matches!(err, ParseError::NotAnObject { .. }), "{text}");
        }
    }

    #[test]
    fn test_garbage_carries_bounded_previews() {
        let garbage = format!("no json here {}", "x".repeat(500));
        match to_object(RawContent::Text(garbage)).unwrap_err() {
            ParseError::Malformed {
                original_preview,
                cleaned_preview,
                ..
            } => {
                assert!(original_preview.starts_with("no json here"));
                assert!(original_preview.chars().count() <= PREVIEW_CHARS + 3);
                assert!(cleaned_preview.chars().count() <= PREVIEW_CHARS + 3);
            }
            other => panic!("expected malformed error, got {other:?}"),
        }
    }

    #[test]
    fn test_cleanup_leaves_strings_alone() {
        let text = r#"{"a": "x, }", "b": "// not a comment"}"#;
        assert_eq!(strip_trailing_commas(&strip_line_comments(text)), text);
    }
}
