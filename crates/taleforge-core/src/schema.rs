//! Canonical field names for generated story payloads, and the
//! machine-readable schema description handed to the model.

use serde_json::{Value, json};

pub const TITLE: &str = "title";
pub const ROOT_NODE: &str = "rootNode";
pub const CONTENT: &str = "content";
pub const IMAGE_PROMPT_1: &str = "image_prompt_1";
pub const IMAGE_PROMPT_2: &str = "image_prompt_2";
pub const IS_ENDING: &str = "isEnding";
pub const IS_WINNING_ENDING: &str = "isWinningEnding";
pub const OPTIONS: &str = "options";
pub const OPTION_TEXT: &str = "text";
pub const NEXT_NODE: &str = "nextNode";

/// Spellings of `nextNode` the model has been seen to produce.
pub const NEXT_NODE_VARIANTS: &[&str] = &["Nextnode", "nextnode", "NextNode", "next_node"];

/// Alternate names for an option's display text.
pub const OPTION_TEXT_VARIANTS: &[&str] = &["label", "option"];

/// JSON Schema for the story payload.
///
/// `image_words` caps the length of each image description.
pub fn story_schema(image_words: u32) -> Value {
    json!({
        "title": "StoryResponse",
        "type": "object",
        "properties": {
            TITLE: {
                "type": "string",
                "description": "The title of the story"
            },
            ROOT_NODE: {
                "$ref": "#/$defs/StoryNode",
                "description": "The root node of the story"
            }
        },
        "required": [TITLE, ROOT_NODE],
        "$defs": {
            "StoryNode": {
                "type": "object",
                "properties": {
                    CONTENT: {
                        "type": "string",
                        "description": "The main content of the story node"
                    },
                    IMAGE_PROMPT_1: {
                        "type": "string",
                        "description": format!(
                            "A detailed, visually descriptive prompt (maximum {image_words} words) for the scene's first image."
                        )
                    },
                    IMAGE_PROMPT_2: {
                        "type": "string",
                        "description": format!(
                            "A detailed, visually descriptive prompt (maximum {image_words} words) for the scene's second image. Must be distinctly different from {IMAGE_PROMPT_1}."
                        )
                    },
                    IS_ENDING: {
                        "type": "boolean",
                        "description": "Whether this node is an ending node"
                    },
                    IS_WINNING_ENDING: {
                        "type": "boolean",
                        "description": "Whether this node is a winning ending node"
                    },
                    OPTIONS: {
                        "type": "array",
                        "items": { "$ref": "#/$defs/StoryOption" },
                        "description": "The options for this node; omitted on ending nodes"
                    }
                },
                "required": [CONTENT, IS_ENDING, IS_WINNING_ENDING]
            },
            "StoryOption": {
                "type": "object",
                "properties": {
                    OPTION_TEXT: {
                        "type": "string",
                        "description": "The text of the option shown to the user"
                    },
                    NEXT_NODE: {
                        "$ref": "#/$defs/StoryNode",
                        "description": "The node this option leads to"
                    }
                },
                "required": [OPTION_TEXT, NEXT_NODE]
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_names_required_fields() {
        let schema = story_schema(20);
        assert_eq!(schema["required"], json!(["title", "rootNode"]));
        let node = &schema["$defs"]["StoryNode"];
        assert_eq!(node["properties"]["isEnding"]["type"], "boolean");
        assert!(
            node["properties"]["image_prompt_1"]["description"]
                .as_str()
                .unwrap()
                .contains("maximum 20 words")
        );
    }
}
