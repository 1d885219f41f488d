//! Generation gateway
//!
//! Turns a prompt into an answer string. [`ChatCompletionsGateway`] talks to
//! any OpenAI-compatible `/chat/completions` endpoint (Hugging Face router,
//! Groq, vLLM, OpenAI).

mod chat;

pub use chat::ChatCompletionsGateway;

use crate::error::Result;
use async_trait::async_trait;

/// Produces an answer for a fully rendered prompt
#[async_trait]
pub trait GenerationGateway: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// Provider name used in logs and errors
    fn name(&self) -> &str;
}
