use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::AppConfig;

#[derive(Debug, Clone, Serialize)]
struct CompletionMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
    usage: Option<CompletionUsage>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessageContent,
}

#[derive(Debug, Deserialize)]
struct CompletionMessageContent {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CompletionUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A simple (role, content) pair for building the messages array.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug)]
pub struct LlmResponse {
    pub text: String,
    pub usage: Option<CompletionUsage>,
}

/// Anything that can answer a chat-completions request.
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    async fn chat(&self, messages: &[ChatMessage]) -> anyhow::Result<LlmResponse>;
}

/// Client for an OpenAI-compatible `/chat/completions` endpoint.
pub struct LlmClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl LlmClient {
    /// `None` when no API key is configured.
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Option<Self>> {
        let Some(api_key) = config.llm_api_key.clone() else {
            return Ok(None);
        };
        let client = Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()?;
        Ok(Some(Self {
            client,
            base_url: config.llm_base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.llm_model.clone(),
        }))
    }
}

#[async_trait]
impl ChatCompletion for LlmClient {
    async fn chat(&self, messages: &[ChatMessage]) -> anyhow::Result<LlmResponse> {
        let body_messages: Vec<CompletionMessage<'_>> = messages
            .iter()
            .map(|m| CompletionMessage {
                role: &m.role,
                content: &m.content,
            })
            .collect();

        let body = serde_json::json!({
            "model": self.model,
            "messages": body_messages,
            "temperature": 0.7,
            "max_tokens": 300,
        });

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let err_body = resp.text().await.unwrap_or_default();
            anyhow::bail!("LLM API error ({}): {}", status, err_body);
        }

        let completion: CompletionResponse = resp.json().await?;

        let text = completion
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();

        Ok(LlmResponse {
            text,
            usage: completion.usage,
        })
    }
}
