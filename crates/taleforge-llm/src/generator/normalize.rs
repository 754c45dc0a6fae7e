use super::extract::chat_completion_content;
use super::parse::to_object;
use crate::RawContent;
use serde_json::{Map, Value};
use taleforge_core::schema::*;
use tracing::{debug, warn};

/// Keys a model may nest the whole story under.
const WRAPPER_KEYS: &[&str] = &["data", "story", "result", "response", "output"];

/// Bring a parsed payload in line with the canonical schema.
///
/// Only fixes shape drift; type errors are left for validation. Running
/// it on its own output changes nothing.
pub fn normalize_story(mut obj: Map<String, Value>) -> Map<String, Value> {
    // A few rounds cover e.g. a data wrapper around a leaked envelope.
    for _ in 0..3 {
        if has_story_fields(&obj) {
            break;
        }
        match unwrap_once(&obj) {
            Some(inner) => obj = inner,
            None => break,
        }
    }

    if let Some(Value::String(text)) = obj.get(ROOT_NODE) {
        match to_object(RawContent::Text(text.clone())) {
            Ok(node) => {
                debug!("Decoded string-encoded rootNode");
                obj.insert(ROOT_NODE.to_string(), Value::Object(node));
            }
            Err(e) => warn!("rootNode is a string but not decodable: {}", e),
        }
    }

    if let Some(Value::Object(root)) = obj.get_mut(ROOT_NODE) {
        normalize_node(root);
    }
    obj
}

fn has_story_fields(obj: &Map<String, Value>) -> bool {
    obj.contains_key(TITLE) && obj.contains_key(ROOT_NODE)
}

fn unwrap_once(obj: &Map<String, Value>) -> Option<Map<String, Value>> {
    for key in WRAPPER_KEYS {
        if let Some(Value::Object(inner)) = obj.get(*key) {
            debug!("Adopted contents of '{}' wrapper", key);
            return Some(inner.clone());
        }
    }

    if matches!(obj.get("choices"), Some(Value::Array(_))) {
        let content = chat_completion_content(obj)?;
        return match to_object(content) {
            Ok(inner) => {
                debug!("Extracted story from leaked chat completion envelope");
                Some(inner)
            }
            Err(e) => {
                warn!("Failed to parse content of leaked envelope: {}", e);
                None
            }
        };
    }

    // Any other single object field that holds a story.
    obj.iter().find_map(|(key, value)| match value {
        Value::Object(inner) if has_story_fields(inner) => {
            debug!("Adopted contents of '{}' wrapper", key);
            Some(inner.clone())
        }
        _ => None,
    })
}

fn normalize_node(node: &mut Map<String, Value>) {
    rename_next_node(node);
    coerce_flag(node, IS_ENDING);
    coerce_flag(node, IS_WINNING_ENDING);

    if flag(node, IS_ENDING) {
        node.remove(OPTIONS);
        return;
    }

    let raw = match node.remove(OPTIONS) {
        Some(Value::Array(items)) => items,
        _ => Vec::new(),
    };
    let offered = raw.len();
    let options: Vec<Value> = raw.into_iter().filter_map(normalize_option).collect();
    if options.len() < offered {
        warn!(
            dropped = offered - options.len(),
            kept = options.len(),
            "Dropped options without text or next node"
        );
    }

    if options.is_empty() {
        warn!("Non-ending node has no usable options; treating it as an ending");
        node.insert(IS_ENDING.to_string(), Value::Bool(true));
        node.insert(IS_WINNING_ENDING.to_string(), Value::Bool(false));
        return;
    }

    // Winning only means something on an ending.
    node.insert(IS_WINNING_ENDING.to_string(), Value::Bool(false));
    node.insert(OPTIONS.to_string(), Value::Array(options));
}

fn normalize_option(option: Value) -> Option<Value> {
    let Value::Object(mut option) = option else {
        return None;
    };

    let text = std::iter::once(OPTION_TEXT)
        .chain(OPTION_TEXT_VARIANTS.iter().copied())
        .find_map(|key| match option.get(key) {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            _ => None,
        })?;

    let mut next = std::iter::once(NEXT_NODE)
        .chain(NEXT_NODE_VARIANTS.iter().copied())
        .find_map(|key| match option.remove(key) {
            Some(Value::Object(child)) => Some(child),
            _ => None,
        })?;
    normalize_node(&mut next);

    let mut cleaned = Map::new();
    cleaned.insert(OPTION_TEXT.to_string(), Value::String(text));
    cleaned.insert(NEXT_NODE.to_string(), Value::Object(next));
    Some(Value::Object(cleaned))
}

fn rename_next_node(node: &mut Map<String, Value>) {
    for variant in NEXT_NODE_VARIANTS {
        if let Some(value) = node.remove(*variant) {
            node.entry(NEXT_NODE).or_insert(value);
        }
    }
}

/// Default a missing flag to false and accept "true"/"false" strings.
fn coerce_flag(node: &mut Map<String, Value>, key: &str) {
    let coerced = match node.get(key) {
        None | Some(Value::Null) => Some(false),
        Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    };
    if let Some(value) = coerced {
        node.insert(key.to_string(), Value::Bool(value));
    }
}

fn flag(node: &Map<String, Value>, key: &str) -> bool {
    matches!(node.get(key), Some(Value::Bool(true)))
}
