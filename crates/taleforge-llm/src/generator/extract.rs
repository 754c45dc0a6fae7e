use crate::RawContent;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// Generic wrapper some gateways put around the whole completion.
#[derive(Debug, Deserialize)]
struct DataWrapper {
    data: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    #[serde(default)]
    message: Option<ChatMessage>,
    #[serde(default)]
    text: Option<Value>,
    #[serde(default)]
    content: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<Value>,
}

/// Completion-style APIs that put the text at the top level.
#[derive(Debug, Deserialize)]
struct FlatCompletion {
    #[serde(default)]
    output: Option<Value>,
    #[serde(default)]
    text: Option<Value>,
    #[serde(default)]
    content: Option<Value>,
}

/// Known response shapes, tried in declaration order.
#[derive(Debug)]
enum Envelope {
    ChatCompletion(ChatCompletion),
    Flat(FlatCompletion),
}

impl Envelope {
    fn candidates(value: &Value) -> Vec<Envelope> {
        let mut found = Vec::new();
        if let Ok(chat) = ChatCompletion::deserialize(value) {
            found.push(Envelope::ChatCompletion(chat));
        }
        if let Ok(flat) = FlatCompletion::deserialize(value) {
            found.push(Envelope::Flat(flat));
        }
        found
    }

    fn content(self) -> Option<RawContent> {
        match self {
            Envelope::ChatCompletion(chat) => {
                let choice = chat.choices.into_iter().next()?;
                choice
                    .message
                    .and_then(|m| m.content)
                    .and_then(populated)
                    .or_else(|| choice.text.and_then(populated))
                    .or_else(|| choice.content.and_then(populated))
            }
            Envelope::Flat(flat) => flat
                .output
                .and_then(populated)
                .or_else(|| flat.text.and_then(populated))
                .or_else(|| flat.content.and_then(populated)),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Envelope::ChatCompletion(_) => "chat_completion",
            Envelope::Flat(_) => "flat",
        }
    }
}

/// Keep a field only when it actually carries something.
fn populated(value: Value) -> Option<RawContent> {
    let keep = match &value {
        Value::String(s) => !s.trim().is_empty(),
        Value::Object(m) => !m.is_empty(),
        Value::Array(a) => !a.is_empty(),
        _ => false,
    };
    if !keep {
        return None;
    }
    Some(match value {
        Value::String(s) => RawContent::Text(s),
        other => RawContent::Json(other),
    })
}

fn unwrap_data(value: Value) -> Value {
    if let Ok(wrapper) = DataWrapper::deserialize(&value) {
        debug!("Unwrapped 'data' envelope");
        return Value::Object(wrapper.data);
    }
    value
}

/// Locate the assistant's content inside a transport result.
///
/// Falls back to the whole body when no known envelope carries content,
/// so the caller always gets something to parse.
pub fn extract_content(raw: RawContent) -> RawContent {
    let body = match raw {
        RawContent::Text(_) => return raw,
        RawContent::Json(Value::String(s)) => return RawContent::Text(s),
        RawContent::Json(value) => value,
    };

    let inner = unwrap_data(body.clone());
    for envelope in Envelope::candidates(&inner) {
        let name = envelope.name();
        if let Some(content) = envelope.content() {
            debug!(
                envelope = name,
                len = content.len(),
                "Extracted assistant content"
            );
            return content;
        }
    }

    if !looks_like_story(&inner) {
        warn!("No content-bearing field in response envelope; using raw body");
    }
    RawContent::Json(body)
}

/// Content of a chat-completion envelope that leaked into parsed output.
pub(crate) fn chat_completion_content(obj: &Map<String, Value>) -> Option<RawContent> {
    let chat = ChatCompletion::deserialize(&Value::Object(obj.clone())).ok()?;
    Envelope::ChatCompletion(chat).content()
}

fn looks_like_story(value: &Value) -> bool {
    value.get(taleforge_core::schema::TITLE).is_some()
        && value.get(taleforge_core::schema::ROOT_NODE).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_chat_completion_message_content() {
        let raw = RawContent::Json(json!({
            "id": "x",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "{\"title\":\"T\"}"}}]
        }));
        assert_eq!(
            extract_content(raw),
            RawContent::Text("{\"title\":\"T\"}".to_string())
        );
    }

    #[test]
    fn test_data_wrapped_chat_completion() {
        let raw = RawContent::Json(json!({
            "data": {"choices": [{"message": {"content": "inner"}}]}
        }));
        assert_eq!(extract_content(raw), RawContent::Text("inner".to_string()));
    }

    #[test]
    fn test_choice_level_text_when_message_empty() {
        let raw = RawContent::Json(json!({
            "choices": [{"message": {"content": ""}, "text": "from text"}]
        }));
        assert_eq!(
            extract_content(raw),
            RawContent::Text("from text".to_string())
        );
    }

    #[test]
    fn test_structured_message_content_passes_through() {
        let raw = RawContent::Json(json!({
            "choices": [{"message": {"content": {"title": "T", "rootNode": {}}}}]
        }));
        assert_eq!(
            extract_content(raw),
            RawContent::Json(json!({"title": "T", "rootNode": {}}))
        );
    }

    #[test]
    fn test_flat_output_field() {
        let raw = RawContent::Json(json!({"output": "out", "text": "ignored"}));
        assert_eq!(extract_content(raw), RawContent::Text("out".to_string()));
    }

    #[test]
    fn test_empty_choices_fall_back_to_flat_fields() {
        let raw = RawContent::Json(json!({"choices": [], "content": "flat"}));
        assert_eq!(extract_content(raw), RawContent::Text("flat".to_string()));
    }

    #[test]
    fn test_falls_back_to_raw_body() {
        let body = json!({"title": "T", "rootNode": {"content": "c"}});
        assert_eq!(
            extract_content(RawContent::Json(body.clone())),
            RawContent::Json(body)
        );

        let odd = json!({"status": "ok"});
        assert_eq!(
            extract_content(RawContent::Json(odd.clone())),
            RawContent::Json(odd)
        );
    }

    #[test]
    fn test_text_and_string_bodies_are_content() {
        assert_eq!(
            extract_content(RawContent::Text("```json\n{}\n```".to_string())),
            RawContent::Text("```json\n{}\n```".to_string())
        );
        assert_eq!(
            extract_content(RawContent::Json(json!("{\"a\":1}"))),
            RawContent::Text("{\"a\":1}".to_string())
        );
    }

    #[test]
    fn test_chat_completion_content_helper() {
        let obj = json!({"choices": [{"message": {"content": "x"}}]});
        let Value::Object(map) = obj else { unreachable!() };
        assert_eq!(
            chat_completion_content(&map),
            Some(RawContent::Text("x".to_string()))
        );
    }
}
