//! Provider Routing
//!
//! A request names one of three backends. The [`Router`] owns one adapter per
//! backend and dispatches on [`ProviderKind`]; every adapter takes the same
//! inputs and returns trimmed text, so callers never see which calling
//! convention was used.
//!
//! - `huggingface` -> [`LocalModelAdapter`]: in-process TrOCR or Tesseract
//! - `ollama` -> [`LocalServerAdapter`]: `/api/chat` on a local Ollama server
//! - `openai` -> [`RemoteApiAdapter`]: OpenAI chat completions with image input
//!
//! ```rust,ignore
//! let config = Config::from_env();
//! let provider = ProviderConfig::new("ollama", None, None)?;
//! let request = TranscriptionRequest::new(image, "", provider);
//! let transcription = Router::new(&config)?.dispatch(request).await?;
//! ```

mod local_model;
mod local_server;
mod remote_api;

pub use local_model::LocalModelAdapter;
pub use local_server::LocalServerAdapter;
pub use remote_api::RemoteApiAdapter;

use std::time::Instant;

use tracing::info;

use crate::config::{Config, ProviderKind, DEFAULT_PROMPT};
use crate::error::{ConfigError, ProviderError, Result};
use crate::source::ImageBytes;

/// Which backend to use, with which model and credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub provider: ProviderKind,
    pub model: String,
    pub credential: Option<String>,
}

impl ProviderConfig {
    /// Parse `provider` and fill in the provider's default model when `model`
    /// is absent or blank.
    pub fn new(
        provider: &str,
        model: Option<String>,
        credential: Option<String>,
    ) -> std::result::Result<Self, ConfigError> {
        let provider: ProviderKind = provider.parse()?;
        let model = model
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| provider.default_model().to_string());
        let credential = credential.filter(|c| !c.trim().is_empty());

        Ok(Self {
            provider,
            model,
            credential,
        })
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        match self.provider.credential_env_var() {
            Some(env_var) if self.credential.is_none() => Err(ConfigError::MissingCredential {
                provider: self.provider.as_str(),
                env_var,
            }),
            _ => Ok(()),
        }
    }
}

/// One image, one prompt, one provider. Immutable once built.
#[derive(Debug, Clone)]
pub struct TranscriptionRequest {
    image: ImageBytes,
    prompt: String,
    provider: ProviderConfig,
}

impl TranscriptionRequest {
    pub fn new(image: ImageBytes, prompt: impl Into<String>, provider: ProviderConfig) -> Self {
        let prompt = prompt.into();
        let prompt = if prompt.trim().is_empty() {
            DEFAULT_PROMPT.to_string()
        } else {
            prompt
        };

        Self {
            image,
            prompt,
            provider,
        }
    }

    pub fn image(&self) -> &ImageBytes {
        &self.image
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn provider(&self) -> &ProviderConfig {
        &self.provider
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcription {
    pub text: String,
    pub provider: ProviderKind,
    pub model: String,
}

pub type TranscriptionResult = Result<Transcription>;

enum Adapter {
    LocalModel(LocalModelAdapter),
    LocalServer(LocalServerAdapter),
    RemoteApi(RemoteApiAdapter),
}

impl Adapter {
    async fn transcribe(
        &self,
        image: &ImageBytes,
        prompt: &str,
        model: &str,
        credential: Option<&str>,
    ) -> Result<String> {
        match self {
            Adapter::LocalModel(a) => a.transcribe(image, prompt, model).await,
            Adapter::LocalServer(a) => a.transcribe(image, prompt, model).await,
            Adapter::RemoteApi(a) => a.transcribe(image, prompt, model, credential).await,
        }
    }
}

pub struct Router {
    local_model: Adapter,
    local_server: Adapter,
    remote_api: Adapter,
}

impl Router {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            local_model: Adapter::LocalModel(LocalModelAdapter::new(&config.local_model)),
            local_server: Adapter::LocalServer(LocalServerAdapter::new(&config.ollama)?),
            remote_api: Adapter::RemoteApi(RemoteApiAdapter::new(&config.openai)?),
        })
    }

    fn adapter(&self, provider: ProviderKind) -> &Adapter {
        match provider {
            ProviderKind::LocalModel => &self.local_model,
            ProviderKind::LocalServer => &self.local_server,
            ProviderKind::RemoteApi => &self.remote_api,
        }
    }

    /// Send the request to its provider. Errors come back unchanged; there is
    /// no fallback to another provider.
    pub async fn dispatch(&self, request: TranscriptionRequest) -> TranscriptionResult {
        let provider = request.provider();
        provider.validate()?;

        info!(
            provider = %provider.provider,
            model = %provider.model,
            media_type = %request.image().media_type(),
            image_bytes = request.image().len(),
            "Dispatching transcription"
        );

        let started = Instant::now();
        let text = self
            .adapter(provider.provider)
            .transcribe(
                request.image(),
                request.prompt(),
                &provider.model,
                provider.credential.as_deref(),
            )
            .await?;

        info!(
            provider = %provider.provider,
            elapsed_ms = started.elapsed().as_millis() as u64,
            text_length = text.len(),
            "Transcription completed"
        );

        Ok(Transcription {
            text,
            provider: provider.provider,
            model: provider.model.clone(),
        })
    }
}

/// Trim adapter output; blank output is a failure.
pub(crate) fn non_empty(text: &str) -> std::result::Result<String, ProviderError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ProviderError::InferenceFailed("empty response".to_string()));
    }
    Ok(text.to_string())
}
