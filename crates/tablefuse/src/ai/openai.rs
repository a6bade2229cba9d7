//! Client for OpenAI-compatible chat-completions endpoints.
//!
//! Works against any server speaking the `/v1/chat/completions` dialect
//! (hosted OpenAI, Azure-style gateways, local vLLM/Ollama proxies). Images
//! are sent inline as base64 data URLs; JSON mode is requested so the reply
//! is usually a bare object, but the pipeline still runs every reply through
//! [`decode_json_object`](crate::ai::decode_json_object).

use crate::ai::{AiClient, AiRequest, AiResponse};
use crate::plugins::Plugin;
use crate::{Result, TableFuseError};
use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "gpt-4o";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    temperature: f64,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    r#type: &'static str,
}

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: Vec<Content>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Content {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
    detail: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Async client for an OpenAI-compatible endpoint.
///
/// # Example
///
/// ```no_run
/// use tablefuse::ai::openai::OpenAiCompatibleClient;
///
/// let client = OpenAiCompatibleClient::new(std::env::var("OPENAI_API_KEY").unwrap_or_default())
///     .with_model("gpt-4o-mini");
/// ```
pub struct OpenAiCompatibleClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl OpenAiCompatibleClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Falling back to default HTTP client: {}", e);
                reqwest::Client::new()
            });
        Self {
            client,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
        }
    }

    /// Read the key from `OPENAI_API_KEY`, and optionally the endpoint and
    /// model from `TABLEFUSE_AI_ENDPOINT` / `TABLEFUSE_AI_MODEL`.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| TableFuseError::validation("OPENAI_API_KEY is not set"))?;
        let mut client = Self::new(api_key);
        if let Ok(endpoint) = std::env::var("TABLEFUSE_AI_ENDPOINT") {
            client.endpoint = endpoint;
        }
        if let Ok(model) = std::env::var("TABLEFUSE_AI_MODEL") {
            client.model = model;
        }
        Ok(client)
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_body<'a>(&'a self, request: &AiRequest) -> ChatRequest<'a> {
        let mut content = vec![Content::Text {
            text: request.prompt.clone(),
        }];
        if let Some(image) = &request.image {
            let encoded = base64::engine::general_purpose::STANDARD.encode(&image.bytes);
            content.push(Content::ImageUrl {
                image_url: ImageUrl {
                    url: format!("data:{};base64,{}", image.mime_type, encoded),
                    detail: "high",
                },
            });
        }

        ChatRequest {
            model: &self.model,
            messages: vec![Message { role: "user", content }],
            max_tokens: request.max_output_tokens,
            temperature: 0.0,
            response_format: ResponseFormat { r#type: "json_object" },
        }
    }
}

fn classify_send_error(err: reqwest::Error) -> TableFuseError {
    if err.is_timeout() {
        TableFuseError::Timeout(format!("HTTP request timed out: {}", err))
    } else {
        TableFuseError::network_with_source("HTTP request failed", err)
    }
}

impl Plugin for OpenAiCompatibleClient {
    fn name(&self) -> &str {
        "openai-compatible"
    }

    fn version(&self) -> String {
        env!("CARGO_PKG_VERSION").to_string()
    }

    fn description(&self) -> &str {
        "OpenAI-compatible chat-completions client"
    }
}

#[async_trait]
impl AiClient for OpenAiCompatibleClient {
    #[cfg_attr(feature = "otel", tracing::instrument(skip(self, request), fields(model = %self.model)))]
    async fn complete(&self, request: &AiRequest) -> Result<AiResponse> {
        let body = self.build_body(request);

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(classify_send_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = format!("Endpoint returned {}: {}", status, text.chars().take(500).collect::<String>());
            return if status.as_u16() == 429 || status.is_server_error() {
                Err(TableFuseError::network(message))
            } else {
                Err(TableFuseError::ai(message))
            };
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| TableFuseError::ai_with_source("Malformed chat-completions response", e))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| TableFuseError::ai("Chat-completions response has no content"))?;

        Ok(AiResponse { text })
    }
}
