use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::OllamaConfig;
use crate::error::{ConfigError, ProviderError, Result};
use crate::source::ImageBytes;

use super::non_empty;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    stream: bool,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
    images: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatMessageResponse,
}

#[derive(Debug, Deserialize)]
struct ChatMessageResponse {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
}

/// Client for an Ollama server's `/api/chat` endpoint.
#[derive(Clone, Debug)]
pub struct LocalServerAdapter {
    client: Client,
    base_url: String,
}

impl LocalServerAdapter {
    pub fn new(config: &OllamaConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                key: "OLLAMA_TIMEOUT".to_string(),
                reason: format!("Failed to create HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub async fn transcribe(&self, image: &ImageBytes, prompt: &str, model: &str) -> Result<String> {
        let request = ChatRequest {
            model,
            stream: false,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
                images: vec![image.to_base64()],
            }],
        };

        let url = format!("{}/api/chat", self.base_url);
        debug!(url = %url, model, "Sending image to Ollama");

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                let reason = if e.is_timeout() {
                    "request timed out".to_string()
                } else {
                    e.to_string()
                };
                ProviderError::ServerUnreachable(format!("Ollama at {}: {reason}", self.base_url))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error)
                .unwrap_or(body);
            return Err(ProviderError::InferenceFailed(format!(
                "Ollama returned {status}: {detail}"
            ))
            .into());
        }

        let chat: ChatResponse = response.json().await.map_err(|e| {
            ProviderError::InferenceFailed(format!("Failed to parse Ollama response: {e}"))
        })?;

        Ok(non_empty(&chat.message.content)?)
    }
}
