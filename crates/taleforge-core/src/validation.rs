use crate::schema::*;
use crate::{ChoiceTree, NodeKind, NodeTree, StoryTree};
use serde_json::{Map, Value};
use thiserror::Error;

/// Deepest tree accepted. Bounds recursion in the persister.
pub const MAX_TREE_DEPTH: usize = 64;

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Missing required field '{0}'")]
    MissingField(String),

    #[error("Field '{path}' must be {expected}")]
    WrongType { path: String, expected: &'static str },

    #[error("Non-ending node '{0}' has no options")]
    EmptyOptions(String),

    #[error("Story tree exceeds maximum depth at '{0}'")]
    TooDeep(String),
}

/// Check a normalized payload against the canonical schema and build the
/// typed tree. Unknown fields are ignored.
pub fn validate_story(obj: &Map<String, Value>) -> Result<StoryTree, ValidationError> {
    let title = required_str(obj, TITLE, "")?;
    let root = match obj.get(ROOT_NODE) {
        None | Some(Value::Null) => return Err(ValidationError::MissingField(ROOT_NODE.into())),
        Some(Value::Object(node)) => validate_node(node, ROOT_NODE, 1)?,
        Some(_) => {
            return Err(ValidationError::WrongType {
                path: ROOT_NODE.into(),
                expected: "an object",
            });
        }
    };
    Ok(StoryTree { title, root })
}

fn validate_node(
    node: &Map<String, Value>,
    path: &str,
    depth: usize,
) -> Result<NodeTree, ValidationError> {
    if depth > MAX_TREE_DEPTH {
        return Err(ValidationError::TooDeep(path.to_string()));
    }

    let content = required_str(node, CONTENT, path)?;
    let image_prompt_1 = optional_str(node, IMAGE_PROMPT_1, path)?;
    let image_prompt_2 = optional_str(node, IMAGE_PROMPT_2, path)?;
    let is_ending = required_bool(node, IS_ENDING, path)?;
    let is_winning = required_bool(node, IS_WINNING_ENDING, path)?;

    let kind = if is_ending {
        NodeKind::Ending {
            winning: is_winning,
        }
    } else {
        let options_path = join(path, OPTIONS);
        let raw = match node.get(OPTIONS) {
            None | Some(Value::Null) => &[][..],
            Some(Value::Array(items)) => items.as_slice(),
            Some(_) => {
                return Err(ValidationError::WrongType {
                    path: options_path,
                    expected: "an array",
                });
            }
        };
        if raw.is_empty() {
            return Err(ValidationError::EmptyOptions(path.to_string()));
        }

        let mut options = Vec::with_capacity(raw.len());
        for (i, item) in raw.iter().enumerate() {
            let item_path = format!("{options_path}[{i}]");
            let Value::Object(opt) = item else {
                return Err(ValidationError::WrongType {
                    path: item_path,
                    expected: "an object",
                });
            };
            let text = required_str(opt, OPTION_TEXT, &item_path)?;
            let next_path = join(&item_path, NEXT_NODE);
            let next = match opt.get(NEXT_NODE) {
                None | Some(Value::Null) => return Err(ValidationError::MissingField(next_path)),
                Some(Value::Object(child)) => validate_node(child, &next_path, depth + 1)?,
                Some(_) => {
                    return Err(ValidationError::WrongType {
                        path: next_path,
                        expected: "an object",
                    });
                }
            };
            options.push(ChoiceTree { text, next });
        }
        NodeKind::Branch { options }
    };

    Ok(NodeTree {
        content,
        image_prompt_1,
        image_prompt_2,
        kind,
    })
}

fn join(path: &str, field: &str) -> String {
    if path.is_empty() {
        field.to_string()
    } else {
        format!("{path}.{field}")
    }
}

fn required_str(obj: &Map<String, Value>, field: &str, path: &str) -> Result<String, ValidationError> {
    match obj.get(field) {
        None | Some(Value::Null) => Err(ValidationError::MissingField(join(path, field))),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(ValidationError::WrongType {
            path: join(path, field),
            expected: "a string",
        }),
    }
}

fn optional_str(
    obj: &Map<String, Value>,
    field: &str,
    path: &str,
) -> Result<Option<String>, ValidationError> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(ValidationError::WrongType {
            path: join(path, field),
            expected: "a string",
        }),
    }
}

fn required_bool(obj: &Map<String, Value>, field: &str, path: &str) -> Result<bool, ValidationError> {
    match obj.get(field) {
        None | Some(Value::Null) => Err(ValidationError::MissingField(join(path, field))),
        Some(Value::Bool(b)) => Ok(*b),
        Some(_) => Err(ValidationError::WrongType {
            path: join(path, field),
            expected: "a boolean",
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn as_map(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => panic!("expected object"),
        }
    }

    fn ending(content: &str, winning: bool) -> Value {
        json!({"content": content, "isEnding": true, "isWinningEnding": winning})
    }

    #[test]
    fn test_validate_builds_typed_tree() {
        let obj = as_map(json!({
            "title": "T",
            "rootNode": {
                "content": "c",
                "image_prompt_1": "a foggy road",
                "isEnding": false,
                "isWinningEnding": false,
                "options": [
                    {"text": "Go left", "nextNode": ending("left", false)},
                    {"text": "Go right", "nextNode": ending("right", true)}
                ]
            }
        }));
        let tree = validate_story(&obj).unwrap();
        assert_eq!(tree.title, "T");
        assert_eq!(tree.root.image_prompt_1.as_deref(), Some("a foggy road"));
        assert_eq!(tree.root.image_prompt_2, None);
        let opts = tree.root.options();
        assert_eq!(opts.len(), 2);
        assert_eq!(opts[0].text, "Go left");
        assert!(opts[1].next.is_winning_ending());
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let obj = as_map(json!({
            "title": "T",
            "genre": "noir",
            "rootNode": {"content": "c", "isEnding": true, "isWinningEnding": false, "mood": 3}
        }));
        assert!(validate_story(&obj).is_ok());
    }

    #[test]
    fn test_missing_title() {
        let obj = as_map(json!({"rootNode": ending("c", false)}));
        assert_eq!(
            validate_story(&obj).unwrap_err(),
            ValidationError::MissingField("title".into())
        );
    }

    #[test]
    fn test_wrong_type_reports_nested_path() {
        let obj = as_map(json!({
            "title": "T",
            "rootNode": {
                "content": "c",
                "isEnding": false,
                "isWinningEnding": false,
                "options": [
                    {"text": "a", "nextNode": ending("a", false)},
                    {"text": "b", "nextNode": {"content": 7, "isEnding": true, "isWinningEnding": false}}
                ]
            }
        }));
        assert_eq!(
            validate_story(&obj).unwrap_err(),
            ValidationError::WrongType {
                path: "rootNode.options[1].nextNode.content".into(),
                expected: "a string",
            }
        );
    }

    #[test]
    fn test_non_ending_without_options_rejected() {
        let obj = as_map(json!({
            "title": "T",
            "rootNode": {"content": "c", "isEnding": false, "isWinningEnding": false, "options": []}
        }));
        assert_eq!(
            validate_story(&obj).unwrap_err(),
            ValidationError::EmptyOptions("rootNode".into())
        );
    }

    #[test]
    fn test_ending_options_not_carried_into_tree() {
        let obj = as_map(json!({
            "title": "T",
            "rootNode": {
                "content": "c",
                "isEnding": true,
                "isWinningEnding": true,
                "options": [{"text": "x", "nextNode": ending("x", false)}]
            }
        }));
        let tree = validate_story(&obj).unwrap();
        assert!(tree.root.options().is_empty());
        assert!(tree.root.is_winning_ending());
    }

    #[test]
    fn test_rejects_pathological_depth() {
        let mut node = ending("bottom", false);
        for _ in 0..MAX_TREE_DEPTH {
            node = json!({
                "content": "step",
                "isEnding": false,
                "isWinningEnding": false,
                "options": [{"text": "down", "nextNode": node}]
            });
        }
        let obj = as_map(json!({"title": "deep", "rootNode": node}));
        assert!(matches!(
            validate_story(&obj),
            Err(ValidationError::TooDeep(_))
        ));
    }
}
