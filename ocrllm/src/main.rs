use std::ffi::OsString;
use std::path::Path;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ocrllm::{
    Config, ConfigError, OcrError, PreprocessOp, ProviderConfig, ProviderError, ProviderKind,
    DEFAULT_PROMPT,
};

#[derive(Parser)]
#[command(name = "ocrllm")]
#[command(about = "Extract text from an image with a local model, an Ollama server or the OpenAI API")]
#[command(version)]
struct Args {
    /// Path to a local image file or an http(s) URL
    #[arg(value_name = "IMAGE")]
    image: String,

    /// Prompt sent along with the image
    #[arg(short, long, default_value = DEFAULT_PROMPT)]
    prompt: String,

    /// Backend: huggingface, ollama or openai
    #[arg(short = 'm', long, env = "OCR_PROVIDER", default_value = "huggingface")]
    provider: String,

    /// Model identifier; each provider has its own default
    #[arg(long, env = "OCR_MODEL")]
    model: Option<String>,

    /// Image cleanup before sending
    #[arg(long, value_enum, default_value_t = PreprocessOp::None)]
    preprocess: PreprocessOp,

    /// Debug logging on stderr
    #[arg(short, long)]
    verbose: bool,
}

/// Load `.env` (from `env_file`, or searched upward from the working
/// directory) before parsing, so `OCR_PROVIDER` and `OCR_MODEL` can come from it.
fn parse_args<I, T>(env_file: Option<&Path>, argv: I) -> Result<Args, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    if let Some(path) = env_file {
        dotenvy::from_path(path).ok();
    } else {
        dotenvy::dotenv().ok();
    }
    Args::try_parse_from(argv)
}

fn main() -> ExitCode {
    let args = match parse_args(None, std::env::args_os()) {
        Ok(args) => args,
        Err(e) => e.exit(),
    };

    init_tracing(args.verbose);

    let runtime = match build_runtime() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("error: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(&args)) {
        Ok(text) => {
            println!("{text}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error[{}]: {e}", e.kind());
            for hint in hints(&e, &args.provider, args.model.as_deref()) {
                eprintln!("hint: {hint}");
            }
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("ocrllm=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| "ocrllm=warn".into())
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn build_runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")
}

async fn run(args: &Args) -> ocrllm::Result<String> {
    let config = Config::from_env();
    let provider = ProviderConfig::new(&args.provider, args.model.clone(), None)?;

    let transcription =
        ocrllm::transcribe(&config, &args.image, &args.prompt, provider, args.preprocess).await?;

    Ok(transcription.text)
}

/// Follow-up suggestions for failures with a well-known fix.
fn hints(error: &OcrError, provider: &str, model: Option<&str>) -> Vec<String> {
    let kind = provider.parse::<ProviderKind>().ok();

    match error {
        OcrError::Config(ConfigError::MissingCredential { env_var, .. }) => vec![format!(
            "Set {env_var} in your environment or in a .env file"
        )],
        OcrError::Provider(ProviderError::ServerUnreachable(_))
            if kind == Some(ProviderKind::LocalServer) =>
        {
            let model = model.unwrap_or(ProviderKind::LocalServer.default_model());
            vec![
                "Make sure Ollama is running: 'ollama serve'".to_string(),
                format!("And that the model is available: 'ollama pull {model}'"),
            ]
        }
        OcrError::Provider(ProviderError::InferenceFailed(message))
            if kind == Some(ProviderKind::LocalServer) && message.contains("not found") =>
        {
            let model = model.unwrap_or(ProviderKind::LocalServer.default_model());
            vec![format!("Pull the model first: 'ollama pull {model}'")]
        }
        OcrError::Provider(ProviderError::RateLimited { .. }) => vec![
            "API quota or billing issue; check your OpenAI account".to_string(),
            "Or run locally with '--provider ollama' or '--provider huggingface'".to_string(),
        ],
        OcrError::Provider(ProviderError::AuthFailed(_)) => {
            vec!["Check that OPENAI_API_KEY holds a valid key".to_string()]
        }
        OcrError::Provider(ProviderError::ModelLoadFailed(_)) => vec![
            "Supported local models: HuggingFaceTB/SmolVLM-*, HuggingFaceM4/Idefics3-*, microsoft/trocr-{base,large}-{printed,handwritten}, tesseract, tesseract:<langs>".to_string(),
            "Hugging Face weights are downloaded on first use; Tesseract needs its traineddata files (TESSDATA_DIR)".to_string(),
        ],
        _ => Vec::new(),
    }
}
