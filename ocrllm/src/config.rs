use std::env;
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

pub const DEFAULT_PROMPT: &str = "Please transcribe the provided image.";

const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";

/// Mimics a desktop browser; some image hosts reject unknown agents.
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

pub(crate) fn parse_env_or<T: FromStr>(var: &str, default: T) -> T
where
    T::Err: fmt::Display,
{
    match env::var(var) {
        Ok(val) => match val.parse() {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!("Invalid value '{}' for {}: {}. Using default.", val, var, e);
                default
            }
        },
        Err(_) => default,
    }
}

pub(crate) fn parse_env_opt<T: FromStr>(var: &str) -> Option<T>
where
    T::Err: fmt::Display,
{
    match env::var(var) {
        Ok(val) if val.trim().is_empty() => None,
        Ok(val) => match val.trim().parse() {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                tracing::warn!("Invalid value '{}' for {}: {}. Ignoring.", val, var, e);
                None
            }
        },
        Err(_) => None,
    }
}

/// The three interchangeable vision backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProviderKind {
    /// In-process model (`huggingface`).
    #[default]
    LocalModel,
    /// Locally hosted model server (`ollama`).
    LocalServer,
    /// Cloud API (`openai`).
    RemoteApi,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::LocalModel => "huggingface",
            ProviderKind::LocalServer => "ollama",
            ProviderKind::RemoteApi => "openai",
        }
    }

    pub fn all() -> &'static [ProviderKind] {
        &[
            ProviderKind::LocalModel,
            ProviderKind::LocalServer,
            ProviderKind::RemoteApi,
        ]
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderKind::LocalModel => "HuggingFaceTB/SmolVLM-Instruct",
            ProviderKind::LocalServer => "llava:7b",
            ProviderKind::RemoteApi => "gpt-4o",
        }
    }

    /// Environment variable holding the credential, for providers that need one.
    pub fn credential_env_var(&self) -> Option<&'static str> {
        match self {
            ProviderKind::RemoteApi => Some("OPENAI_API_KEY"),
            ProviderKind::LocalModel | ProviderKind::LocalServer => None,
        }
    }

    pub fn requires_credential(&self) -> bool {
        self.credential_env_var().is_some()
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "huggingface" | "local-model" => Ok(ProviderKind::LocalModel),
            "ollama" | "local-server" => Ok(ProviderKind::LocalServer),
            "openai" | "remote-api" => Ok(ProviderKind::RemoteApi),
            _ => Err(ConfigError::UnknownProvider(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub fetch: FetchConfig,
    pub local_model: LocalModelConfig,
    pub ollama: OllamaConfig,
    pub openai: OpenAiConfig,
    pub preprocessing: PreprocessingConfig,
}

/// Settings for downloading images given as URLs.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub timeout_secs: u64,
    pub max_image_bytes: u64,
    pub user_agent: String,
}

#[derive(Debug, Clone, Default)]
pub struct LocalModelConfig {
    /// Directory holding Tesseract `*.traineddata` files. Uses the system default when unset.
    pub tessdata_dir: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OllamaConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub timeout_secs: u64,
    /// Retries after a 429 response. Other failures are never retried.
    pub max_retries: u32,
    pub max_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct PreprocessingConfig {
    /// Images narrower than this are upscaled before thresholding.
    pub target_width: u32,
    pub max_image_dimension: u32,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_image_bytes: 20 * 1024 * 1024,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_OLLAMA_URL.to_string(),
            timeout_secs: 300,
        }
    }
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_OPENAI_URL.to_string(),
            timeout_secs: 120,
            max_retries: 1,
            max_tokens: 1000,
        }
    }
}

impl Default for PreprocessingConfig {
    fn default() -> Self {
        Self {
            target_width: 1600,
            max_image_dimension: 4096,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            fetch: FetchConfig {
                timeout_secs: parse_env_or("FETCH_TIMEOUT", 30),
                max_image_bytes: parse_env_or("MAX_IMAGE_BYTES", 20 * 1024 * 1024),
                user_agent: env::var("FETCH_USER_AGENT")
                    .unwrap_or_else(|_| DEFAULT_USER_AGENT.to_string()),
            },
            local_model: LocalModelConfig {
                tessdata_dir: parse_env_opt("TESSDATA_DIR"),
            },
            ollama: OllamaConfig {
                base_url: env::var("OLLAMA_BASE_URL")
                    .unwrap_or_else(|_| DEFAULT_OLLAMA_URL.to_string()),
                timeout_secs: parse_env_or("OLLAMA_TIMEOUT", 300),
            },
            openai: OpenAiConfig {
                api_key: parse_env_opt("OPENAI_API_KEY"),
                base_url: env::var("OPENAI_BASE_URL")
                    .unwrap_or_else(|_| DEFAULT_OPENAI_URL.to_string()),
                timeout_secs: parse_env_or("OPENAI_TIMEOUT", 120),
                max_retries: parse_env_or("OPENAI_MAX_RETRIES", 1),
                max_tokens: parse_env_or("OPENAI_MAX_TOKENS", 1000),
            },
            preprocessing: PreprocessingConfig {
                target_width: parse_env_or("PREPROCESS_TARGET_WIDTH", 1600),
                max_image_dimension: parse_env_or("PREPROCESS_MAX_DIMENSION", 4096),
            },
        }
    }

    /// Rejects settings that would make a pipeline stage meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let dimensions = [
            ("PREPROCESS_TARGET_WIDTH", self.preprocessing.target_width),
            ("PREPROCESS_MAX_DIMENSION", self.preprocessing.max_image_dimension),
        ];
        for (key, value) in dimensions {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    reason: "must be at least 1 pixel".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Credential for `provider`, if it uses one and one is configured.
    pub fn credential_for(&self, provider: ProviderKind) -> Option<String> {
        match provider {
            ProviderKind::RemoteApi => self.openai.api_key.clone(),
            ProviderKind::LocalModel | ProviderKind::LocalServer => None,
        }
    }
}
