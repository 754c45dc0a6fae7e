//! Story generation pipeline.
//!
//! One model call, then extraction, repair, normalization and validation of
//! the reply, then a single atomic write of the story tree.

mod extract;
mod normalize;
mod parse;
mod prompt;


pub use extract::extract_content;
pub use normalize::normalize_story;
pub use parse::{ParseError, to_object};
pub use prompt::{PromptSettings, StoryPrompt, assemble_prompt};

use crate::{ChatBackend, LlmClient, LlmConfig, RawContent, TransportError};
use serde_json::{Map, Value};
use taleforge_core::{Story, StoreError, StoryStore, StoryTree, ValidationError, validate_story};
use thiserror::Error;
use tracing::{debug, error, info};

/// Failures that abort a generation. Anything else is repaired in place.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("Story failed schema validation: {0}")]
    Validation(#[from] ValidationError),

    #[error("Failed to persist story: {0}")]
    Persistence(#[from] StoreError),
}

/// Parameters of one generation request.
#[derive(Debug, Clone)]
pub struct StoryRequest {
    pub session_id: String,
    pub theme: String,
    pub user_id: Option<i64>,
}

impl StoryRequest {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            theme: "fantasy".to_string(),
            user_id: None,
        }
    }

    pub fn theme(mut self, theme: impl Into<String>) -> Self {
        self.theme = theme.into();
        self
    }

    pub fn user(mut self, user_id: i64) -> Self {
        self.user_id = Some(user_id);
        self
    }
}

/// A model reply after repair: the normalized payload and the typed tree
/// built from it.
#[derive(Debug, Clone)]
pub struct ParsedStory {
    pub normalized: Map<String, Value>,
    pub tree: StoryTree,
}

/// Generate and persist a story using an [`LlmClient`] built from `config`.
pub async fn generate_story(
    config: LlmConfig,
    store: &impl StoryStore,
    request: &StoryRequest,
    settings: &PromptSettings,
) -> Result<Story, GenerationError> {
    let client = LlmClient::new(config);
    generate_story_with_backend(&client, store, request, settings).await
}

/// Generate and persist a story using a given ChatBackend (for testability).
///
/// Never retries; a failed call is reported to the caller as is.
pub async fn generate_story_with_backend(
    backend: &impl ChatBackend,
    store: &impl StoryStore,
    request: &StoryRequest,
    settings: &PromptSettings,
) -> Result<Story, GenerationError> {
    let result = run_pipeline(backend, store, request, settings).await;
    if let Err(e) = &result {
        error!(session_id = %request.session_id, "Story generation failed: {}", e);
    }
    result
}

async fn run_pipeline(
    backend: &impl ChatBackend,
    store: &impl StoryStore,
    request: &StoryRequest,
    settings: &PromptSettings,
) -> Result<Story, GenerationError> {
    let prompt = assemble_prompt(settings, &request.theme);
    info!(
        model = backend.model_name(),
        theme = %request.theme,
        "Generating story"
    );
    debug!("Story system prompt length: {} chars", prompt.instruction.len());

    let raw = backend.complete(prompt.messages()).await?;
    debug!("LLM raw response len={} preview={}", raw.len(), raw.preview(500));

    let parsed = parse_story_response(raw)?;
    info!(
        title = %parsed.tree.title,
        nodes = parsed.tree.root.node_count(),
        depth = parsed.tree.root.depth(),
        "Story validated"
    );

    let story = store.persist(&parsed.tree, &request.session_id, request.user_id)?;
    info!(story_id = story.id, "Story generation completed");
    Ok(story)
}

/// Everything between the transport and the store: extract, repair,
/// normalize, validate.
pub fn parse_story_response(raw: RawContent) -> Result<ParsedStory, GenerationError> {
    let content = extract_content(raw);
    let obj = to_object(content)?;
    debug!(
        "Parsed content keys={:?}",
        obj.keys().take(5).collect::<Vec<_>>()
    );

    let normalized = normalize_story(obj);
    let tree = validate_story(&normalized)?;
    Ok(ParsedStory { normalized, tree })
}
