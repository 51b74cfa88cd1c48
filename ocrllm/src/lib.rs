//! Extract text from an image with one of three interchangeable vision backends.
//!
//! The image comes from a local path or an http(s) URL ([`source`]), may be
//! cleaned up first ([`preprocessing`]), and is then sent to a local in-process
//! model, a local Ollama server or the OpenAI API ([`provider`]).
//! [`transcribe`] chains those steps.

pub mod config;
pub mod error;
pub mod pipeline;
pub mod preprocessing;
pub mod provider;
pub mod source;

pub use config::{Config, ProviderKind, DEFAULT_PROMPT};
pub use error::{ConfigError, InputError, OcrError, ProviderError, Result};
pub use pipeline::transcribe;
pub use preprocessing::{preprocess, PreprocessOp};
pub use provider::{
    ProviderConfig, Router, Transcription, TranscriptionRequest, TranscriptionResult,
};
pub use source::{ImageBytes, ImageSource, Resolver};
