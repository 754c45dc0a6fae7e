use crate::Message;
use taleforge_core::schema::story_schema;

/// Knobs for the story prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptSettings {
    pub min_options: u32,
    pub max_options: u32,
    pub min_depth: u32,
    pub max_depth: u32,
    pub image_prompt_words: u32,
}

impl Default for PromptSettings {
    fn default() -> Self {
        Self {
            min_options: 2,
            max_options: 3,
            min_depth: 3,
            max_depth: 4,
            image_prompt_words: 20,
        }
    }
}

/// The finished prompt for one generation.
#[derive(Debug, Clone)]
pub struct StoryPrompt {
    /// System instruction, with the schema description embedded.
    pub instruction: String,
    /// The schema description on its own.
    pub schema: String,
    pub user: String,
}

impl StoryPrompt {
    pub fn messages(&self) -> Vec<Message> {
        vec![Message::system(&self.instruction), Message::user(&self.user)]
    }
}

pub fn assemble_prompt(settings: &PromptSettings, theme: &str) -> StoryPrompt {
    let schema = format_instructions(settings);
    let instruction = story_system_prompt(settings, &schema);
    StoryPrompt {
        instruction,
        schema,
        user: format!("Create the story with this theme: {theme}. Respond with JSON only."),
    }
}

fn range(lo: u32, hi: u32) -> String {
    if lo >= hi {
        lo.to_string()
    } else {
        format!("{lo}–{hi}")
    }
}

pub(crate) fn format_instructions(settings: &PromptSettings) -> String {
    let schema = serde_json::to_string_pretty(&story_schema(settings.image_prompt_words))
        .unwrap_or_default();
    format!(
        "The output should be formatted as a JSON instance that conforms to the JSON schema below.\n\n```\n{schema}\n```"
    )
}

pub(crate) fn story_system_prompt(settings: &PromptSettings, format_instructions: &str) -> String {
    include_str!("../../prompts/story.md")
        .replace(
            "{{option_range}}",
            &range(settings.min_options, settings.max_options),
        )
        .replace(
            "{{depth_range}}",
            &range(settings.min_depth, settings.max_depth),
        )
        .replace(
            "{{image_words}}",
            &settings.image_prompt_words.to_string(),
        )
        .replace("{{format_instructions}}", format_instructions)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_fills_every_placeholder() {
        let prompt = assemble_prompt(&PromptSettings::default(), "space opera");
        assert!(!prompt.instruction.contains("{{"));
        assert!(prompt.instruction.contains("2–3 options"));
        assert!(prompt.instruction.contains("Depth 3–4 levels"));
        assert!(prompt.instruction.contains("at most 20 words"));
        assert!(prompt.instruction.contains(&prompt.schema));
        assert!(prompt.user.contains("space opera"));
    }

    #[test]
    fn test_fixed_option_count_renders_single_number() {
        let settings = PromptSettings {
            min_options: 2,
            max_options: 2,
            ..Default::default()
        };
        let prompt = assemble_prompt(&settings, "noir");
        assert!(prompt.instruction.contains("must have 2 options"));
    }

    #[test]
    fn test_schema_description_lists_canonical_fields() {
        let prompt = assemble_prompt(&PromptSettings::default(), "x");
        for field in ["title", "rootNode", "isEnding", "isWinningEnding", "nextNode"] {
            assert!(prompt.schema.contains(field), "schema should mention {field}");
        }
    }

    #[test]
    fn test_messages_are_system_then_user() {
        let prompt = assemble_prompt(&PromptSettings::default(), "x");
        let messages = prompt.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[1].role, "user");
    }
}
