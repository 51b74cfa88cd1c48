use thiserror::Error;

/// Failures while turning a path or URL into image bytes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InputError {
    #[error("Image file not found: {0}")]
    NotFound(String),

    #[error("Cannot read {path}: {reason}")]
    Unreadable { path: String, reason: String },

    #[error("Cannot download {url}: {reason}")]
    Unreachable { url: String, reason: String },

    #[error("Not an image: {0}")]
    NotAnImage(String),

    #[error("Image is too large: {size} bytes, limit is {limit} bytes")]
    TooLarge { size: u64, limit: u64 },
}

/// Bad provider, model or credential configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Unsupported provider '{0}'. Use: 'huggingface', 'ollama', 'openai'")]
    UnknownProvider(String),

    #[error("No credential configured for provider '{provider}' (set {env_var})")]
    MissingCredential {
        provider: &'static str,
        env_var: &'static str,
    },

    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
}

/// Failures during the transcription call itself.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Model load failed: {0}")]
    ModelLoadFailed(String),

    #[error("Inference failed: {0}")]
    InferenceFailed(String),

    #[error("Server unreachable: {0}")]
    ServerUnreachable(String),

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("API rate limit exceeded, retry after {retry_after:?} seconds")]
    RateLimited { retry_after: Option<u64> },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OcrError {
    #[error(transparent)]
    Input(#[from] InputError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl OcrError {
    /// Stable identifier for the error kind, e.g. `input.not_found`.
    pub fn kind(&self) -> &'static str {
        match self {
            OcrError::Input(e) => match e {
                InputError::NotFound(_) => "input.not_found",
                InputError::Unreadable { .. } => "input.unreadable",
                InputError::Unreachable { .. } => "input.unreachable",
                InputError::NotAnImage(_) => "input.not_an_image",
                InputError::TooLarge { .. } => "input.too_large",
            },
            OcrError::Config(e) => match e {
                ConfigError::UnknownProvider(_) => "config.unknown_provider",
                ConfigError::MissingCredential { .. } => "config.missing_credential",
                ConfigError::InvalidValue { .. } => "config.invalid_value",
            },
            OcrError::Provider(e) => match e {
                ProviderError::ModelLoadFailed(_) => "provider.model_load_failed",
                ProviderError::InferenceFailed(_) => "provider.inference_failed",
                ProviderError::ServerUnreachable(_) => "provider.server_unreachable",
                ProviderError::AuthFailed(_) => "provider.auth_failed",
                ProviderError::RateLimited { .. } => "provider.rate_limited",
            },
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            OcrError::Input(_) => 1,
            OcrError::Config(_) => 2,
            OcrError::Provider(_) => 3,
        }
    }
}

pub type Result<T> = std::result::Result<T, OcrError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_is_stable_per_variant() {
        let err: OcrError = InputError::NotFound("missing.png".to_string()).into();
        assert_eq!(err.kind(), "input.not_found");
        assert_eq!(err.exit_code(), 1);

        let err: OcrError = ConfigError::UnknownProvider("bedrock".to_string()).into();
        assert_eq!(err.kind(), "config.unknown_provider");
        assert_eq!(err.exit_code(), 2);

        let err: OcrError = ProviderError::RateLimited { retry_after: Some(3) }.into();
        assert_eq!(err.kind(), "provider.rate_limited");
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_display_is_transparent() {
        let err: OcrError = ConfigError::MissingCredential {
            provider: "openai",
            env_var: "OPENAI_API_KEY",
        }
        .into();
        assert_eq!(
            err.to_string(),
            "No credential configured for provider 'openai' (set OPENAI_API_KEY)"
        );
    }

    #[test]
    fn test_unknown_provider_message_lists_supported() {
        let err = ConfigError::UnknownProvider("bedrock".to_string());
        let message = err.to_string();
        assert!(message.contains("bedrock"));
        assert!(message.contains("huggingface"));
        assert!(message.contains("ollama"));
        assert!(message.contains("openai"));
    }
}
