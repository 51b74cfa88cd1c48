//! Source to text in one call: validate, resolve, preprocess, dispatch.

use tracing::info;

use crate::config::Config;
use crate::preprocessing::{preprocess, PreprocessOp};
use crate::provider::{ProviderConfig, Router, TranscriptionRequest, TranscriptionResult};
use crate::source::Resolver;

/// Run one transcription.
///
/// Configuration problems, including a missing credential, are reported
/// before the image is touched, so they win over any input error.
/// When `provider` carries no credential, the one from `config` is used.
pub async fn transcribe(
    config: &Config,
    source: &str,
    prompt: &str,
    mut provider: ProviderConfig,
    op: PreprocessOp,
) -> TranscriptionResult {
    config.validate()?;
    if provider.credential.is_none() {
        provider.credential = config.credential_for(provider.provider);
    }
    provider.validate()?;

    info!(
        source,
        prompt,
        provider = %provider.provider,
        model = %provider.model,
        "Processing image"
    );

    let resolver = Resolver::new(&config.fetch)?;
    let image = resolver.resolve(source).await?;
    let image = preprocess(&image, op, &config.preprocessing)?;

    let router = Router::new(config)?;
    router
        .dispatch(TranscriptionRequest::new(image, prompt, provider))
        .await
}
