use std::sync::Arc;

use kalosm_ocr::{Ocr, OcrInferenceSettings, OcrSource};
use leptess::LepTess;
use mistralrs::{Model, TextMessageRole, VisionLoaderType, VisionMessages, VisionModelBuilder};
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

use crate::config::{LocalModelConfig, DEFAULT_PROMPT};
use crate::error::{ProviderError, Result};
use crate::source::ImageBytes;

use super::non_empty;

const DEFAULT_TESSERACT_LANGUAGES: &str = "eng";

/// Hub organisations whose checkpoints load with the Idefics3 architecture.
const IDEFICS3_PREFIXES: &[&str] = &["huggingfacetb/smolvlm", "huggingfacem4/idefics3"];

/// TrOCR checkpoints published under `microsoft/` on the Hugging Face hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrOcrCheckpoint {
    BasePrinted,
    BaseHandwritten,
    LargePrinted,
    LargeHandwritten,
}

impl TrOcrCheckpoint {
    fn source(self) -> OcrSource {
        match self {
            TrOcrCheckpoint::BasePrinted => OcrSource::base_printed(),
            TrOcrCheckpoint::BaseHandwritten => OcrSource::base(),
            TrOcrCheckpoint::LargePrinted => OcrSource::large_printed(),
            TrOcrCheckpoint::LargeHandwritten => OcrSource::large(),
        }
    }
}

/// Engine selected by a model identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
enum EngineSpec {
    /// Instruction-tuned vision-language model; `model_id` keeps the hub casing.
    Vision { model_id: String },
    TrOcr(TrOcrCheckpoint),
    Tesseract { languages: String },
}

impl EngineSpec {
    fn parse(model: &str) -> std::result::Result<Self, ProviderError> {
        let model_id = model.trim();
        let model = model_id.to_lowercase();

        if IDEFICS3_PREFIXES.iter().any(|prefix| model.starts_with(prefix)) {
            return Ok(EngineSpec::Vision {
                model_id: model_id.to_string(),
            });
        }

        let checkpoint = match model.as_str() {
            "microsoft/trocr-base" | "microsoft/trocr-base-printed" => {
                Some(TrOcrCheckpoint::BasePrinted)
            }
            "microsoft/trocr-base-handwritten" => Some(TrOcrCheckpoint::BaseHandwritten),
            "microsoft/trocr-large" | "microsoft/trocr-large-printed" => {
                Some(TrOcrCheckpoint::LargePrinted)
            }
            "microsoft/trocr-large-handwritten" => Some(TrOcrCheckpoint::LargeHandwritten),
            _ => None,
        };
        if let Some(checkpoint) = checkpoint {
            return Ok(EngineSpec::TrOcr(checkpoint));
        }

        if model == "tesseract" {
            return Ok(EngineSpec::Tesseract {
                languages: DEFAULT_TESSERACT_LANGUAGES.to_string(),
            });
        }

        if let Some(languages) = model.strip_prefix("tesseract:") {
            let valid = !languages.is_empty()
                && languages.split('+').all(|l| {
                    !l.is_empty() && l.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
                });
            if valid {
                return Ok(EngineSpec::Tesseract {
                    languages: languages.to_string(),
                });
            }
        }

        Err(ProviderError::ModelLoadFailed(format!(
            "Unsupported local model '{model_id}'. Use a HuggingFaceTB/SmolVLM-* or \
             HuggingFaceM4/Idefics3-* model, a microsoft/trocr-* checkpoint, \
             'tesseract' or 'tesseract:<langs>'"
        )))
    }

    fn uses_prompt(&self) -> bool {
        matches!(self, EngineSpec::Vision { .. })
    }
}

/// Prompt-less recognizers; both need `&mut self` and run on the blocking pool.
enum Recognizer {
    TrOcr(Ocr),
    Tesseract(LepTess),
}

enum Engine {
    Vision(Arc<Model>),
    Recognizer(Arc<Mutex<Recognizer>>),
}

struct LoadedEngine {
    spec: EngineSpec,
    engine: Engine,
}

/// In-process model. The engine is loaded on first use and kept for the
/// lifetime of the adapter; a failed load leaves the cell empty.
pub struct LocalModelAdapter {
    config: LocalModelConfig,
    loaded: OnceCell<LoadedEngine>,
}

impl LocalModelAdapter {
    pub fn new(config: &LocalModelConfig) -> Self {
        Self {
            config: config.clone(),
            loaded: OnceCell::new(),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.initialized()
    }

    pub async fn transcribe(&self, image: &ImageBytes, prompt: &str, model: &str) -> Result<String> {
        let spec = EngineSpec::parse(model)?;

        if !spec.uses_prompt() && prompt.trim() != DEFAULT_PROMPT {
            warn!(
                model,
                "This model only recognizes text and cannot follow a prompt; the prompt is not used"
            );
        }

        let loaded = self
            .loaded
            .get_or_try_init(|| self.load(spec.clone()))
            .await?;

        if loaded.spec != spec {
            return Err(ProviderError::ModelLoadFailed(format!(
                "Local engine already loaded as {:?}; cannot switch to '{model}'",
                loaded.spec
            ))
            .into());
        }

        let text = match &loaded.engine {
            Engine::Vision(model) => ask_vision_model(model, image, prompt).await?,
            Engine::Recognizer(recognizer) => {
                let recognizer = Arc::clone(recognizer);
                let bytes = image.bytes().to_vec();

                tokio::task::spawn_blocking(move || {
                    let mut recognizer = recognizer.blocking_lock();
                    recognize(&mut recognizer, &bytes)
                })
                .await
                .map_err(|e| {
                    ProviderError::InferenceFailed(format!("Inference task panicked: {e}"))
                })??
            }
        };

        Ok(non_empty(&text)?)
    }

    async fn load(&self, spec: EngineSpec) -> std::result::Result<LoadedEngine, ProviderError> {
        info!(engine = ?spec, "Loading local model");

        let engine = match &spec {
            EngineSpec::Vision { model_id } => {
                let model = VisionModelBuilder::new(model_id, VisionLoaderType::Idefics3)
                    .build()
                    .await
                    .map_err(|e| {
                        ProviderError::ModelLoadFailed(format!(
                            "Failed to load vision model {model_id}: {e}"
                        ))
                    })?;
                Engine::Vision(Arc::new(model))
            }
            EngineSpec::TrOcr(checkpoint) => {
                let model = Ocr::builder()
                    .with_source(checkpoint.source())
                    .build()
                    .await
                    .map_err(|e| {
                        ProviderError::ModelLoadFailed(format!("Failed to load TrOCR model: {e}"))
                    })?;
                Engine::Recognizer(Arc::new(Mutex::new(Recognizer::TrOcr(model))))
            }
            EngineSpec::Tesseract { languages } => {
                let tessdata_dir = self.config.tessdata_dir.clone();
                let languages = languages.clone();
                let tesseract = tokio::task::spawn_blocking(move || {
                    LepTess::new(tessdata_dir.as_deref(), &languages)
                })
                .await
                .map_err(|e| ProviderError::ModelLoadFailed(format!("Load task panicked: {e}")))?
                .map_err(|e| {
                    ProviderError::ModelLoadFailed(format!("Tesseract not available: {e}"))
                })?;
                Engine::Recognizer(Arc::new(Mutex::new(Recognizer::Tesseract(tesseract))))
            }
        };

        info!(engine = ?spec, "Local model ready");

        Ok(LoadedEngine { spec, engine })
    }
}

/// One user turn holding the prompt and the image; returns the reply text.
async fn ask_vision_model(
    model: &Model,
    image: &ImageBytes,
    prompt: &str,
) -> std::result::Result<String, ProviderError> {
    let bytes = image.bytes().to_vec();
    let decoded = tokio::task::spawn_blocking(move || image::load_from_memory(&bytes))
        .await
        .map_err(|e| ProviderError::InferenceFailed(format!("Decode task panicked: {e}")))?
        .map_err(|e| ProviderError::InferenceFailed(format!("Failed to decode image: {e}")))?;

    let messages = VisionMessages::new()
        .add_image_message(TextMessageRole::User, prompt, vec![decoded], model)
        .map_err(|e| ProviderError::InferenceFailed(format!("Failed to build request: {e}")))?;

    debug!(prompt, "Sending prompt to vision model");

    let response = model
        .send_chat_request(messages)
        .await
        .map_err(|e| ProviderError::InferenceFailed(format!("Generation failed: {e}")))?;

    Ok(response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .unwrap_or_default())
}

fn recognize(recognizer: &mut Recognizer, bytes: &[u8]) -> std::result::Result<String, ProviderError> {
    match recognizer {
        Recognizer::TrOcr(model) => {
            let image = image::load_from_memory(bytes)
                .map_err(|e| ProviderError::InferenceFailed(format!("Failed to decode image: {e}")))?;
            let settings = OcrInferenceSettings::new(image).map_err(|e| {
                ProviderError::InferenceFailed(format!("Failed to prepare image: {e}"))
            })?;
            model
                .recognize_text(settings)
                .map_err(|e| ProviderError::InferenceFailed(format!("Recognition failed: {e}")))
        }
        Recognizer::Tesseract(tesseract) => {
            tesseract
                .set_image_from_mem(bytes)
                .map_err(|e| ProviderError::InferenceFailed(format!("Failed to set image: {e}")))?;
            tesseract
                .get_utf8_text()
                .map_err(|e| ProviderError::InferenceFailed(format!("Failed to extract text: {e}")))
        }
    }
}
