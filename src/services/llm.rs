//! Language-model backends for receipt normalization.
//!
//! - `OllamaClient`: local Ollama server, `/api/chat` in JSON mode
//! - `MinimaxClient`: MiniMax cloud API (OpenAI-style chat completions)

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{AppConfig, LlmProviderKind};
use crate::models::image::ImageData;

const MINIMAX_TIMEOUT: Duration = Duration::from_secs(120);

/// A chat-style language model that answers with text.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send a system and a user message, optionally with the receipt image.
    async fn chat(
        &self,
        system: &str,
        user: &str,
        image: Option<&ImageData>,
    ) -> Result<String, NormalizationError>;

    /// Provider name for logging.
    fn name(&self) -> &str;

    fn model(&self) -> &str;
}

/// Build the provider selected by `LLM_PROVIDER`.
pub fn provider_from_config(config: &AppConfig) -> Arc<dyn LlmProvider> {
    match config.llm_provider {
        LlmProviderKind::Ollama => Arc::new(OllamaClient::new(
            config.ollama_url.clone(),
            config.ollama_model.clone(),
        )),
        LlmProviderKind::Minimax => Arc::new(MinimaxClient::new(
            config.minimax_base_url.clone(),
            config.minimax_model.clone(),
            config.minimax_api_key.clone(),
        )),
    }
}

pub struct OllamaClient {
    http: Client,
    base_url: String,
    model: String,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: Option<OllamaMessage>,
}

#[derive(Deserialize)]
struct OllamaMessage {
    #[serde(default)]
    content: String,
}

impl OllamaClient {
    pub fn new(base_url: String, model: String) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
        }
    }
}

#[async_trait]
impl LlmProvider for OllamaClient {
    async fn chat(
        &self,
        system: &str,
        user: &str,
        image: Option<&ImageData>,
    ) -> Result<String, NormalizationError> {
        let mut user_message = json!({ "role": "user", "content": user });
        if let Some(image) = image {
            user_message["images"] = json!([image.to_base64()]);
        }

        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system },
                user_message,
            ],
            "format": "json",
            "stream": false,
        });

        let response = self
            .http
            .post(format!("{}/api/chat", self.base_url))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            if status == StatusCode::NOT_FOUND || detail.to_lowercase().contains("not found") {
                return Err(NormalizationError::ModelNotFound {
                    model: self.model.clone(),
                });
            }
            return Err(NormalizationError::Api {
                provider: "Ollama",
                message: format!("HTTP {}: {}", status.as_u16(), detail.trim()),
            });
        }

        let parsed: OllamaChatResponse = response.json().await?;
        let text = parsed.message.map(|m| m.content).unwrap_or_default();
        if text.trim().is_empty() {
            return Err(NormalizationError::EmptyResponse { provider: "Ollama" });
        }
        Ok(text)
    }

    fn name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }
}

pub struct MinimaxClient {
    http: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: Option<ChatChoiceMessage>,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl MinimaxClient {
    pub fn new(base_url: String, model: String, api_key: Option<String>) -> Self {
        Self {
            http: Client::builder()
                .timeout(MINIMAX_TIMEOUT)
                .build()
                .unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        }
    }
}

#[async_trait]
impl LlmProvider for MinimaxClient {
    async fn chat(
        &self,
        system: &str,
        user: &str,
        image: Option<&ImageData>,
    ) -> Result<String, NormalizationError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(NormalizationError::MissingApiKey("MINIMAX_API_KEY"))?;

        let user_content = match image {
            Some(image) => json!([
                { "type": "text", "text": user },
                {
                    "type": "image_url",
                    "image_url": {
                        "url": format!("data:{};base64,{}", image.mime_type(), image.to_base64())
                    }
                },
            ]),
            None => json!(user),
        };

        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user_content },
            ],
        });

        let response = self
            .http
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(NormalizationError::Api {
                provider: "Minimax",
                message: format!("HTTP {}: {}", status.as_u16(), detail.trim()),
            });
        }

        let parsed: ChatCompletionResponse = response.json().await?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or(NormalizationError::NoChoices { provider: "Minimax" })?;

        let text = choice.message.and_then(|m| m.content).unwrap_or_default();
        if text.trim().is_empty() {
            return Err(NormalizationError::EmptyResponse { provider: "Minimax" });
        }
        Ok(text)
    }

    fn name(&self) -> &str {
        "minimax"
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NormalizationError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Ollama model '{model}' not found. Set OLLAMA_MODEL to a model you have (run 'ollama list').")]
    ModelNotFound { model: String },

    #[error("{provider} error: {message}")]
    Api {
        provider: &'static str,
        message: String,
    },

    #[error("{0} not set")]
    MissingApiKey(&'static str),

    #[error("No choices in {provider} response")]
    NoChoices { provider: &'static str },

    #[error("Empty response from {provider}")]
    EmptyResponse { provider: &'static str },

    #[error("Invalid JSON from LLM: {0}")]
    InvalidJson(String),

    #[error("LLM did not return a JSON object")]
    NotAnObject,

    #[error("Normalizer failed: {0}")]
    Failed(String),
}
