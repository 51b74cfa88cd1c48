use std::io::{Cursor, ErrorKind};
use std::path::Path;
use std::time::Duration;

use image::{ImageFormat, ImageReader};
use reqwest::Client;
use tracing::{debug, info};
use url::Url;

use crate::config::FetchConfig;
use crate::error::{ConfigError, InputError, Result};

use super::{essence, media_type_for, sniff_media_type, ImageBytes, ImageSource};

const SUPPORTED_FORMATS: &[ImageFormat] = &[
    ImageFormat::Png,
    ImageFormat::Jpeg,
    ImageFormat::Gif,
    ImageFormat::Bmp,
    ImageFormat::Tiff,
    ImageFormat::WebP,
];

/// Content types that say nothing about the payload; the body is sniffed instead.
const GENERIC_CONTENT_TYPES: &[&str] = &["application/octet-stream", "binary/octet-stream"];

#[derive(Clone, Debug)]
pub struct Resolver {
    client: Client,
    max_image_bytes: u64,
}

impl Resolver {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                key: "FETCH_USER_AGENT".to_string(),
                reason: format!("Failed to create HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            max_image_bytes: config.max_image_bytes,
        })
    }

    /// Resolve a path or URL into image bytes.
    pub async fn resolve(&self, source: &str) -> std::result::Result<ImageBytes, InputError> {
        match ImageSource::classify(source) {
            ImageSource::Url(url) => {
                info!(url = %url, "Downloading image");
                self.fetch(url).await
            }
            ImageSource::Path(path) => {
                info!(path = %path.display(), "Reading image file");
                self.read_file(&path).await
            }
        }
    }

    async fn fetch(&self, url: Url) -> std::result::Result<ImageBytes, InputError> {
        let unreachable = |reason: String| InputError::Unreachable {
            url: url.to_string(),
            reason,
        };

        let mut response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| unreachable(describe_request_error(&e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(unreachable(format!("HTTP {status}")));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(essence);

        if let Some(ct) = content_type.as_deref() {
            if !ct.starts_with("image/") && !GENERIC_CONTENT_TYPES.contains(&ct) {
                return Err(InputError::NotAnImage(format!(
                    "{url} returned content type '{ct}'"
                )));
            }
        }

        if let Some(length) = response.content_length() {
            self.check_size(length)?;
        }

        // Content-Length may be absent or wrong; enforce the cap while reading.
        let mut bytes = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| unreachable(describe_request_error(&e)))?
        {
            self.check_size((bytes.len() + chunk.len()) as u64)?;
            bytes.extend_from_slice(&chunk);
        }

        let declared_image = content_type
            .as_deref()
            .is_some_and(|ct| ct.starts_with("image/"));
        if !declared_image && sniff_media_type(&bytes).is_none() {
            return Err(InputError::NotAnImage(format!(
                "{url} did not return image data"
            )));
        }

        let media_type = media_type_for(&bytes, content_type.as_deref(), Some(Path::new(url.path())));
        debug!(bytes = bytes.len(), media_type = %media_type, "Image downloaded");

        ImageBytes::new(bytes, media_type)
    }

    async fn read_file(&self, path: &Path) -> std::result::Result<ImageBytes, InputError> {
        let display = path.display().to_string();

        let metadata = tokio::fs::metadata(path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => InputError::NotFound(display.clone()),
            _ => InputError::Unreadable {
                path: display.clone(),
                reason: e.to_string(),
            },
        })?;

        if !metadata.is_file() {
            return Err(InputError::Unreadable {
                path: display,
                reason: "not a regular file".to_string(),
            });
        }
        self.check_size(metadata.len())?;

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| InputError::Unreadable {
                path: display.clone(),
                reason: e.to_string(),
            })?;

        let bytes = tokio::task::spawn_blocking(move || validate_image(&bytes).map(|()| bytes))
            .await
            .map_err(|e| InputError::NotAnImage(format!("Image validation task panicked: {e}")))??;

        let media_type = media_type_for(&bytes, None, Some(path));
        debug!(bytes = bytes.len(), media_type = %media_type, "Image file loaded");

        ImageBytes::new(bytes, media_type)
    }

    fn check_size(&self, size: u64) -> std::result::Result<(), InputError> {
        if size > self.max_image_bytes {
            return Err(InputError::TooLarge {
                size,
                limit: self.max_image_bytes,
            });
        }
        Ok(())
    }
}

/// Check that `bytes` decode as one of the supported image formats.
pub(crate) fn validate_image(bytes: &[u8]) -> std::result::Result<(), InputError> {
    if bytes.is_empty() {
        return Err(InputError::NotAnImage("file is empty".to_string()));
    }

    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| InputError::NotAnImage(format!("Failed to read image: {e}")))?;

    let format = reader
        .format()
        .ok_or_else(|| InputError::NotAnImage("unrecognized image format".to_string()))?;

    if !SUPPORTED_FORMATS.contains(&format) {
        return Err(InputError::NotAnImage(format!(
            "unsupported image format {format:?}"
        )));
    }

    reader
        .decode()
        .map_err(|e| InputError::NotAnImage(format!("Failed to decode image: {e}")))?;

    Ok(())
}

fn describe_request_error(error: &reqwest::Error) -> String {
    if error.is_timeout() {
        "request timed out".to_string()
    } else if error.is_connect() {
        format!("connection failed: {error}")
    } else {
        error.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::DynamicImage;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::new_rgb8(width, height);
        let mut output = Vec::new();
        img.write_to(&mut Cursor::new(&mut output), ImageFormat::Png)
            .unwrap();
        output
    }

    #[test]
    fn test_validate_png() {
        assert!(validate_image(&png_bytes(8, 8)).is_ok());
    }

    #[test]
    fn test_validate_rejects_text() {
        let result = validate_image(b"just some notes, not a picture");
        assert!(matches!(result, Err(InputError::NotAnImage(_))));
    }

    #[test]
    fn test_validate_rejects_truncated_png() {
        let mut bytes = png_bytes(32, 32);
        bytes.truncate(20);
        assert!(matches!(
            validate_image(&bytes),
            Err(InputError::NotAnImage(_))
        ));
    }

    #[test]
    fn test_validate_rejects_empty() {
        assert!(matches!(validate_image(&[]), Err(InputError::NotAnImage(_))));
    }

    #[test]
    fn test_check_size() {
        let resolver = Resolver::new(&FetchConfig {
            max_image_bytes: 10,
            ..FetchConfig::default()
        })
        .unwrap();

        assert!(resolver.check_size(10).is_ok());
        assert_eq!(
            resolver.check_size(11),
            Err(InputError::TooLarge { size: 11, limit: 10 })
        );
    }
}
