mod client;
pub mod generator;
mod types;

pub use client::*;
pub use types::*;

use std::future::Future;

/// Transport to the generative-text service.
///
/// One call per generation; implementations must not retry on their own.
pub trait ChatBackend: Send + Sync {
    fn model_name(&self) -> &str;

    fn complete(
        &self,
        messages: Vec<Message>,
    ) -> impl Future<Output = Result<RawContent, TransportError>> + Send;
}

impl ChatBackend for LlmClient {
    fn model_name(&self) -> &str {
        &self.config().model
    }

    async fn complete(&self, messages: Vec<Message>) -> Result<RawContent, TransportError> {
        self.chat(messages).await
    }
}
