//! Inference provider trait. Ollama implements this; tests plug in scripted providers.

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::ollama::InferenceError;
use crate::session::Message;

/// Lazy, finite, non-restartable sequence of content fragments. End of stream is completion.
pub type FragmentStream = BoxStream<'static, Result<String, InferenceError>>;

#[async_trait]
pub trait InferenceProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn health(&self) -> Result<bool, InferenceError>;

    async fn list_models(&self) -> Result<Vec<String>, InferenceError>;

    /// Chat over the full history, waiting for the complete answer.
    async fn chat(&self, model: &str, messages: &[Message]) -> Result<String, InferenceError>;

    /// Chat over the full history, yielding content fragments as they arrive.
    async fn chat_stream(
        &self,
        model: &str,
        messages: &[Message],
    ) -> Result<FragmentStream, InferenceError>;

    /// Single prompt, no history, complete answer only.
    async fn generate(&self, model: &str, prompt: &str) -> Result<String, InferenceError>;
}
