use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{OpenAiConfig, ProviderKind};
use crate::error::{ConfigError, ProviderError, Result};
use crate::source::ImageBytes;

use super::non_empty;

const INITIAL_RETRY_INTERVAL: Duration = Duration::from_millis(500);
const MAX_RETRY_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: Vec<ContentPart>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Debug, Deserialize)]
struct ChatMessageResponse {
    content: Option<String>,
}

/// OpenAI chat completions with an inline `data:` image.
#[derive(Clone, Debug)]
pub struct RemoteApiAdapter {
    client: Client,
    base_url: String,
    max_retries: u32,
    max_tokens: u32,
}

impl RemoteApiAdapter {
    pub fn new(config: &OpenAiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                key: "OPENAI_TIMEOUT".to_string(),
                reason: format!("Failed to create HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            max_retries: config.max_retries,
            max_tokens: config.max_tokens,
        })
    }

    pub async fn transcribe(
        &self,
        image: &ImageBytes,
        prompt: &str,
        model: &str,
        credential: Option<&str>,
    ) -> Result<String> {
        let api_key = credential
            .filter(|k| !k.trim().is_empty())
            .ok_or(ConfigError::MissingCredential {
                provider: ProviderKind::RemoteApi.as_str(),
                env_var: "OPENAI_API_KEY",
            })?;

        let request = ChatRequest {
            model,
            messages: vec![ChatMessage {
                role: "user",
                content: vec![
                    ContentPart::Text {
                        text: prompt.to_string(),
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: image.to_data_url(),
                        },
                    },
                ],
            }],
            max_tokens: self.max_tokens,
        };

        let response = self.send_with_retry(&request, api_key).await?;

        let chat: ChatResponse = response.json().await.map_err(|e| {
            ProviderError::InferenceFailed(format!("Failed to parse OpenAI response: {e}"))
        })?;

        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        Ok(non_empty(&content)?)
    }

    /// POST the request, retrying only on 429 up to `max_retries` times.
    async fn send_with_retry(
        &self,
        request: &ChatRequest<'_>,
        api_key: &str,
    ) -> std::result::Result<Response, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(INITIAL_RETRY_INTERVAL)
            .with_max_interval(MAX_RETRY_INTERVAL)
            .with_max_elapsed_time(None)
            .build();
        let mut retries = 0;

        loop {
            debug!(url = %url, model = request.model, attempt = retries + 1, "Sending image to OpenAI");

            let response = self
                .client
                .post(&url)
                .bearer_auth(api_key)
                .json(request)
                .send()
                .await
                .map_err(|e| {
                    let reason = if e.is_timeout() {
                        "request timed out".to_string()
                    } else {
                        e.to_string()
                    };
                    ProviderError::ServerUnreachable(format!("OpenAI at {}: {reason}", self.base_url))
                })?;

            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }

            match status {
                StatusCode::TOO_MANY_REQUESTS => {
                    let retry_after = retry_after_secs(&response);
                    if retries >= self.max_retries {
                        return Err(ProviderError::RateLimited { retry_after });
                    }
                    retries += 1;

                    let delay = match retry_after {
                        Some(secs) => Duration::from_secs(secs).min(MAX_RETRY_INTERVAL),
                        None => backoff.next_backoff().unwrap_or(MAX_RETRY_INTERVAL),
                    };
                    warn!(
                        retry = retries,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "OpenAI rate limit hit, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    let body = response.text().await.unwrap_or_default();
                    return Err(ProviderError::AuthFailed(format!(
                        "OpenAI returned {status}: {}",
                        error_message(&body)
                    )));
                }
                _ => {
                    let body = response.text().await.unwrap_or_default();
                    return Err(ProviderError::InferenceFailed(format!(
                        "OpenAI returned {status}: {}",
                        error_message(&body)
                    )));
                }
            }
        }
    }
}

fn retry_after_secs(response: &Response) -> Option<u64> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// `error.message` from an OpenAI error body, or the raw body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(String::from))
        .unwrap_or_else(|| body.to_string())
}
