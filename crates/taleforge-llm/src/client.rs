use crate::types::*;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};

const ENV_BASE_URL: &str = "TALEFORGE_LLM_BASE_URL";
const ENV_API_KEY: &str = "TALEFORGE_LLM_API_KEY";
const ENV_MODEL: &str = "TALEFORGE_LLM_MODEL";
const ENV_TIMEOUT_SECS: &str = "TALEFORGE_LLM_TIMEOUT_SECS";

/// Bodies quoted in errors are cut to this many characters.
const ERROR_BODY_PREVIEW: usize = 500;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to reach the LLM service: {0}")]
    Network(String),

    #[error("LLM request timed out after {0:?}")]
    Timeout(Duration),

    #[error("LLM request failed ({status}): {body}")]
    Status { status: u16, body: String },

    #[error("LLM service returned an empty body")]
    EmptyBody,
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub timeout: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "gpt-4.1-nano".to_string(),
            // Low temperature keeps the model closer to the schema.
            temperature: Some(0.2),
            max_tokens: Some(4096),
            timeout: Duration::from_secs(60),
        }
    }
}

impl LlmConfig {
    /// Defaults overridden by `TALEFORGE_LLM_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(url) = lookup(ENV_BASE_URL).filter(|v| !v.trim().is_empty()) {
            config.base_url = url;
        }
        if let Some(key) = lookup(ENV_API_KEY).filter(|v| !v.trim().is_empty()) {
            config.api_key = Some(key);
        }
        if let Some(model) = lookup(ENV_MODEL).filter(|v| !v.trim().is_empty()) {
            config.model = model;
        }
        if let Some(secs) = lookup(ENV_TIMEOUT_SECS).and_then(|v| v.trim().parse::<u64>().ok()) {
            config.timeout = Duration::from_secs(secs);
        }
        config
    }
}

pub struct LlmClient {
    config: LlmConfig,
    http: reqwest::Client,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut LlmConfig {
        &mut self.config
    }

    /// Send one chat completion request and return the decoded body.
    ///
    /// Non-success statuses and blank bodies fail without looking at the
    /// payload.
    pub async fn chat(&self, messages: Vec<Message>) -> Result<RawContent, TransportError> {
        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );

        let request = ChatRequest {
            model: self.config.model.clone(),
            messages,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            response_format: Some(ResponseFormat::json_object()),
        };

        debug!("LLM request to {}: {} messages", url, request.messages.len());

        let mut req_builder = self
            .http
            .post(&url)
            .timeout(self.config.timeout)
            .json(&request);

        if let Some(api_key) = &self.config.api_key {
            req_builder = req_builder.bearer_auth(api_key);
        }

        let started = Instant::now();
        let response = req_builder
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| self.transport_error(e))?;
        let latency_ms = started.elapsed().as_millis() as u64;

        info!(
            status = status.as_u16(),
            latency_ms,
            body_len = body.len(),
            "LLM response received"
        );
        debug!("LLM response body preview: {}", truncate_chars(&body, 500));

        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: truncate_chars(&body, ERROR_BODY_PREVIEW),
            });
        }
        if body.trim().is_empty() {
            return Err(TransportError::EmptyBody);
        }

        Ok(RawContent::from_body(body))
    }

    fn transport_error(&self, err: reqwest::Error) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout(self.config.timeout)
        } else {
            TransportError::Network(err.to_string())
        }
    }
}
