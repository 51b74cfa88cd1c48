//! Image Source Resolution
//!
//! Turns the user-supplied image argument into an in-memory payload that any
//! provider can consume. The argument is either a filesystem path or an
//! http(s) URL; which one is decided purely from the string, never from the
//! filesystem.
//!
//! ```rust,ignore
//! let resolver = Resolver::new(&config.fetch)?;
//! let image = resolver.resolve("https://example.com/receipt.jpg").await?;
//! assert!(image.media_type().starts_with("image/"));
//! ```

mod resolver;

pub use resolver::Resolver;

use std::fmt;
use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD, Engine};
use url::Url;

use crate::error::InputError;

/// Where an image comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    Path(PathBuf),
    Url(Url),
}

impl ImageSource {
    /// Classify `source` as a URL when it is an absolute http/https URI with a
    /// host, otherwise as a local path.
    pub fn classify(source: &str) -> Self {
        match Url::parse(source.trim()) {
            Ok(url)
                if matches!(url.scheme(), "http" | "https")
                    && url.host_str().is_some_and(|host| !host.is_empty()) =>
            {
                ImageSource::Url(url)
            }
            _ => ImageSource::Path(PathBuf::from(source)),
        }
    }

    pub fn is_url(&self) -> bool {
        matches!(self, ImageSource::Url(_))
    }
}

impl fmt::Display for ImageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageSource::Path(path) => write!(f, "{}", path.display()),
            ImageSource::Url(url) => write!(f, "{url}"),
        }
    }
}

/// Raw image bytes plus their media type. Never empty.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageBytes {
    bytes: Vec<u8>,
    media_type: String,
}

impl ImageBytes {
    pub fn new(bytes: Vec<u8>, media_type: impl Into<String>) -> Result<Self, InputError> {
        if bytes.is_empty() {
            return Err(InputError::NotAnImage("image payload is empty".to_string()));
        }
        Ok(Self {
            bytes,
            media_type: media_type.into(),
        })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }

    /// `data:` URL suitable for OpenAI-style `image_url` content parts.
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.media_type, self.to_base64())
    }
}

impl fmt::Debug for ImageBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageBytes")
            .field("len", &self.bytes.len())
            .field("media_type", &self.media_type)
            .finish()
    }
}

/// Media type sniffed from magic bytes, if the bytes look like an image.
pub fn sniff_media_type(bytes: &[u8]) -> Option<&'static str> {
    infer::get(bytes)
        .filter(|kind| kind.matcher_type() == infer::MatcherType::Image)
        .map(|kind| kind.mime_type())
}

/// Best media type for `bytes`: magic bytes first, then the declared
/// content type, then the file extension, then `image/png`.
pub(crate) fn media_type_for(bytes: &[u8], declared: Option<&str>, path: Option<&Path>) -> String {
    if let Some(sniffed) = sniff_media_type(bytes) {
        return sniffed.to_string();
    }

    if let Some(declared) = declared.map(essence).filter(|ct| ct.starts_with("image/")) {
        return declared;
    }

    path.and_then(|p| mime_guess::from_path(p).first())
        .filter(|mime| mime.type_() == mime_guess::mime::IMAGE)
        .map(|mime| mime.essence_str().to_string())
        .unwrap_or_else(|| "image/png".to_string())
}

/// `image/png; charset=binary` -> `image/png`
pub(crate) fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_lowercase()
}
