//! Chat completion providers.
//!
//! | Config value | Provider |
//! |--------------|----------|
//! | `"disabled"` | [`DisabledChat`] |
//! | `"openai"` | [`OpenAIChat`] (`OPENAI_API_KEY`) |
//! | `"ollama"` | [`OllamaChat`] |

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::config::ChatConfig;
use crate::models::ChatMessage;

#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;

    /// Reply text for the given conversation, trimmed.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;
}

pub struct DisabledChat;

#[async_trait]
impl ChatModel for DisabledChat {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _messages: &[ChatMessage]) -> Result<String> {
        bail!("Chat provider is disabled. Set [chat] provider in config.")
    }
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// `POST {url}/v1/chat/completions`, `https://api.openai.com` unless
/// `[chat].url` says otherwise.
pub struct OpenAIChat {
    model: String,
    temperature: f32,
    api_key: String,
    url: String,
    client: reqwest::Client,
}

impl OpenAIChat {
    pub fn new(config: &ChatConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model: config.model.clone(),
            temperature: config.temperature,
            api_key,
            url: config.base_url(),
            client,
        })
    }
}

#[async_trait]
impl ChatModel for OpenAIChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let request = CompletionRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
        };

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("OpenAI chat API error {}: {}", status, body);
        }

        let parsed: CompletionResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|s| s.trim().to_string())
            .ok_or_else(|| anyhow::anyhow!("OpenAI chat response had no content"))
    }
}

#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: ResponseMessage,
}

/// `POST {url}/api/chat` on a local Ollama instance.
pub struct OllamaChat {
    model: String,
    temperature: f32,
    url: String,
    client: reqwest::Client,
}

impl OllamaChat {
    pub fn new(config: &ChatConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            model: config.model.clone(),
            temperature: config.temperature,
            url: config.base_url(),
            client,
        })
    }
}

#[async_trait]
impl ChatModel for OllamaChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let request = OllamaChatRequest {
            model: &self.model,
            messages,
            stream: false,
            options: OllamaOptions {
                temperature: self.temperature,
            },
        };

        let response = self
            .client
            .post(format!("{}/api/chat", self.url))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                anyhow::anyhow!(
                    "Ollama connection error (is Ollama running at {}?): {}",
                    self.url,
                    e
                )
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("Ollama chat API error {}: {}", status, body);
        }

        let parsed: OllamaChatResponse = response.json().await?;
        parsed
            .message
            .content
            .map(|s| s.trim().to_string())
            .ok_or_else(|| anyhow::anyhow!("Ollama chat response had no content"))
    }
}

pub fn create_chat_model(config: &ChatConfig) -> Result<Arc<dyn ChatModel>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledChat)),
        "openai" => Ok(Arc::new(OpenAIChat::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaChat::new(config)?)),
        other => bail!("Unknown chat provider: {}", other),
    }
}
