//! OpenAI-compatible chat completions client

use super::GenerationGateway;
use crate::config::GenerationConfig;
use crate::error::{RagError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

const PROVIDER: &str = "chat-completions";

/// A [`GenerationGateway`] backed by a `/chat/completions` endpoint
///
/// The prompt is sent as a single user message; the first choice's content
/// is the answer.
pub struct ChatCompletionsGateway {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl ChatCompletionsGateway {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(RagError::Generation {
                provider: PROVIDER.to_string(),
                message: "API key must not be empty".to_string(),
            });
        }

        Ok(Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key,
            model: model.into(),
            max_tokens: 200,
            temperature: 0.5,
        })
    }

    /// Build from configuration, reading the API key from `api_key_env`
    pub fn from_config(config: &GenerationConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| RagError::Generation {
            provider: PROVIDER.to_string(),
            message: format!("{} environment variable not set", config.api_key_env),
        })?;

        Ok(Self::new(&config.endpoint, api_key, &config.model)?
            .with_max_tokens(config.max_new_tokens)
            .with_temperature(config.temperature))
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

// ── API request/response types ─────────────────────────────────────

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ErrorDetail {
    Structured { message: String },
    Plain(String),
}

impl ErrorDetail {
    fn into_message(self) -> String {
        match self {
            ErrorDetail::Structured { message } | ErrorDetail::Plain(message) => message,
        }
    }
}

fn extract_answer(response: ChatResponse) -> Result<String> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .map(|content| content.trim().to_string())
        .ok_or_else(|| RagError::Generation {
            provider: PROVIDER.to_string(),
            message: "response contained no answer".to_string(),
        })
}

#[async_trait]
impl GenerationGateway for ChatCompletionsGateway {
    async fn generate(&self, prompt: &str) -> Result<String> {
        debug!(
            provider = PROVIDER,
            model = %self.model,
            prompt_len = prompt.len(),
            "requesting completion"
        );

        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!(provider = PROVIDER, error = %e, "request failed");
                RagError::Generation {
                    provider: PROVIDER.to_string(),
                    message: format!("request failed: {}", e),
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error.into_message())
                .unwrap_or(body);

            error!(provider = PROVIDER, %status, "API error");
            return Err(RagError::Generation {
                provider: PROVIDER.to_string(),
                message: format!("API returned {}: {}", status, detail),
            });
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| {
            error!(provider = PROVIDER, error = %e, "failed to parse response");
            RagError::Generation {
                provider: PROVIDER.to_string(),
                message: format!("failed to parse response: {}", e),
            }
        })?;

        extract_answer(parsed)
    }

    fn name(&self) -> &str {
        PROVIDER
    }
}
