#![allow(dead_code)]

use std::io::Cursor;

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use serde_json::json;

use ocrllm::config::{FetchConfig, OllamaConfig, OpenAiConfig};
use ocrllm::ImageBytes;

/// Small light page with dark horizontal rules, encoded as `format`.
pub fn sample_image(format: ImageFormat) -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(RgbImage::from_fn(64, 32, |_, y| {
        if y % 8 < 2 {
            Rgb([20, 20, 20])
        } else {
            Rgb([240, 240, 240])
        }
    }));

    let mut output = Vec::new();
    img.write_to(&mut Cursor::new(&mut output), format)
        .unwrap_or_else(|e| panic!("Failed to encode {format:?} fixture: {e}"));
    output
}

pub fn sample_png() -> Vec<u8> {
    sample_image(ImageFormat::Png)
}

pub fn png_payload() -> ImageBytes {
    ImageBytes::new(sample_png(), "image/png").expect("sample image is not empty")
}

pub fn fetch_config() -> FetchConfig {
    FetchConfig {
        timeout_secs: 5,
        ..FetchConfig::default()
    }
}

pub fn ollama_config(base_url: String) -> OllamaConfig {
    OllamaConfig {
        base_url,
        timeout_secs: 5,
    }
}

pub fn openai_config(base_url: String, max_retries: u32) -> OpenAiConfig {
    OpenAiConfig {
        api_key: None,
        base_url,
        timeout_secs: 5,
        max_retries,
        max_tokens: 1000,
    }
}

/// Base URL with nothing listening on it.
pub fn closed_port_url() -> String {
    "http://127.0.0.1:1".to_string()
}

pub fn ollama_chat_body(content: &str) -> serde_json::Value {
    json!({
        "model": "llava:7b",
        "created_at": "2024-05-01T12:00:00Z",
        "message": {
            "role": "assistant",
            "content": content
        },
        "done": true
    })
}

pub fn completion_body(content: &str) -> serde_json::Value {
    json!({
        "id": "chatcmpl-test",
        "object": "chat.completion",
        "created": 1,
        "model": "gpt-4o",
        "choices": [
            {
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": content
                },
                "finish_reason": "stop"
            }
        ],
        "usage": {
            "prompt_tokens": 1,
            "completion_tokens": 1,
            "total_tokens": 2
        }
    })
}

pub fn api_error_body(message: &str, error_type: &str, code: &str) -> serde_json::Value {
    json!({
        "error": {
            "message": message,
            "type": error_type,
            "param": serde_json::Value::Null,
            "code": code
        }
    })
}
