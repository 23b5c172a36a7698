use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::LlmConfig;
use crate::error::AnalysisError;

/// System instructions plus user content for one generation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

impl Prompt {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
        }
    }
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(&self, prompt: &Prompt) -> Result<String, AnalysisError>;

    fn name(&self) -> &str;
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Value,
}

/// Client for chat-completions style HTTP APIs (Mistral, OpenAI-compatible).
pub struct ChatCompletionsClient {
    config: LlmConfig,
    client: reqwest::Client,
}

impl ChatCompletionsClient {
    pub fn new(config: LlmConfig) -> Result<Self, AnalysisError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AnalysisError::ConfigError {
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self::with_http_client(config, client))
    }

    /// Uses a caller-built HTTP client, e.g. one with custom proxy or TLS settings.
    pub fn with_http_client(config: LlmConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }

    pub fn parse_response(body: &str) -> Result<String, AnalysisError> {
        let response: ChatCompletionResponse =
            serde_json::from_str(body).map_err(|e| AnalysisError::UpstreamTransport {
                message: format!("Malformed completion response: {}", e),
            })?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AnalysisError::UpstreamTransport {
                message: "Completion response contained no choices".to_string(),
            })?;

        match choice.message.content {
            Value::String(text) => Ok(text),
            // Some providers return content as a list of typed parts.
            Value::Array(parts) => Ok(parts
                .iter()
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("")),
            other => Err(AnalysisError::UpstreamTransport {
                message: format!("Unexpected completion content: {}", other),
            }),
        }
    }
}

#[async_trait]
impl LanguageModel for ChatCompletionsClient {
    async fn generate(&self, prompt: &Prompt) -> Result<String, AnalysisError> {
        let endpoint = self
            .config
            .base_url
            .join("chat/completions")
            .map_err(|e| AnalysisError::ConfigError {
                message: format!("Invalid completions endpoint: {}", e),
            })?;

        let request = ChatCompletionRequest {
            model: &self.config.model,
            temperature: self.config.temperature,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &prompt.system,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt.user,
                },
            ],
        };

        debug!("Calling {} with model {}", endpoint, self.config.model);

        let response = self
            .client
            .post(endpoint)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            warn!("Language model rate limited the request");
            return Err(AnalysisError::UpstreamRateLimited {
                message: format!("HTTP {}", status),
            });
        }

        let body = response.text().await?;
        if !status.is_success() {
            warn!("Language model returned HTTP {}: {}", status, body);
            return Err(AnalysisError::UpstreamTransport {
                message: format!("HTTP {}: {}", status, body),
            });
        }

        Self::parse_response(&body)
    }

    fn name(&self) -> &str {
        &self.config.model
    }
}
