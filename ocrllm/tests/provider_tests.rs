mod common;

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use pretty_assertions::assert_eq;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

use ocrllm::provider::{LocalServerAdapter, RemoteApiAdapter};
use ocrllm::{ConfigError, OcrError, ProviderError};

use common::{
    api_error_body, closed_port_url, completion_body, ollama_chat_body, ollama_config,
    openai_config, png_payload,
};

const PROMPT: &str = "Please transcribe the provided image.";

#[tokio::test]
async fn test_ollama_returns_trimmed_content() {
    let server = MockServer::start().await;
    let image = png_payload();

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(serde_json::json!({
            "model": "llava:7b",
            "stream": false,
            "messages": [{
                "role": "user",
                "content": PROMPT,
                "images": [image.to_base64()]
            }]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(ollama_chat_body("\n  Hello world  \n")))
        .expect(1)
        .mount(&server)
        .await;

    let adapter = LocalServerAdapter::new(&ollama_config(server.uri())).unwrap();
    let text = adapter.transcribe(&image, PROMPT, "llava:7b").await.unwrap();

    assert_eq!(text, "Hello world");
}

#[tokio::test]
async fn test_ollama_missing_model_is_inference_failure() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(
            ResponseTemplate::new(404)
                .set_body_json(serde_json::json!({"error": "model 'llava:13b' not found"})),
        )
        .mount(&server)
        .await;

    let adapter = LocalServerAdapter::new(&ollama_config(server.uri())).unwrap();
    let result = adapter.transcribe(&png_payload(), PROMPT, "llava:13b").await;

    match result {
        Err(OcrError::Provider(ProviderError::InferenceFailed(message))) => {
            assert!(message.contains("404"));
            assert!(message.contains("model 'llava:13b' not found"));
        }
        other => panic!("Expected InferenceFailed, got: {other:?}"),
    }
}

#[tokio::test]
async fn test_ollama_empty_content_is_inference_failure() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ollama_chat_body("   ")))
        .mount(&server)
        .await;

    let adapter = LocalServerAdapter::new(&ollama_config(server.uri())).unwrap();
    let result = adapter.transcribe(&png_payload(), PROMPT, "llava:7b").await;

    assert_eq!(
        result,
        Err(ProviderError::InferenceFailed("empty response".to_string()).into())
    );
}

#[tokio::test]
async fn test_ollama_connection_refused() {
    let adapter = LocalServerAdapter::new(&ollama_config(closed_port_url())).unwrap();
    let result = adapter.transcribe(&png_payload(), PROMPT, "llava:7b").await;

    assert!(matches!(
        result,
        Err(OcrError::Provider(ProviderError::ServerUnreachable(_)))
    ));
}

#[tokio::test]
async fn test_openai_sends_bearer_and_data_url() {
    let server = MockServer::start().await;
    let image = png_payload();

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(serde_json::json!({
            "model": "gpt-4o",
            "max_tokens": 1000,
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "text", "text": PROMPT},
                    {"type": "image_url", "image_url": {"url": image.to_data_url()}}
                ]
            }]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("Total: $42.00\n")))
        .expect(1)
        .mount(&server)
        .await;

    let adapter = RemoteApiAdapter::new(&openai_config(format!("{}/v1", server.uri()), 1)).unwrap();
    let text = adapter
        .transcribe(&image, PROMPT, "gpt-4o", Some("sk-test"))
        .await
        .unwrap();

    assert_eq!(text, "Total: $42.00");
}

#[tokio::test]
async fn test_openai_without_credential_makes_no_request() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("unreachable")))
        .expect(0)
        .mount(&server)
        .await;

    let adapter = RemoteApiAdapter::new(&openai_config(format!("{}/v1", server.uri()), 1)).unwrap();
    let result = adapter.transcribe(&png_payload(), PROMPT, "gpt-4o", None).await;

    assert_eq!(
        result,
        Err(OcrError::Config(ConfigError::MissingCredential {
            provider: "openai",
            env_var: "OPENAI_API_KEY",
        }))
    );
}

#[tokio::test]
async fn test_openai_unauthorized_and_forbidden_are_auth_failures() {
    for status in [401, 403] {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(status).set_body_json(api_error_body(
                "Incorrect API key provided",
                "invalid_request_error",
                "invalid_api_key",
            )))
            .expect(1)
            .mount(&server)
            .await;

        let adapter =
            RemoteApiAdapter::new(&openai_config(format!("{}/v1", server.uri()), 3)).unwrap();
        let result = adapter
            .transcribe(&png_payload(), PROMPT, "gpt-4o", Some("sk-wrong"))
            .await;

        match result {
            Err(OcrError::Provider(ProviderError::AuthFailed(message))) => {
                assert!(message.contains("Incorrect API key provided"), "{status}: {message}");
            }
            other => panic!("Expected AuthFailed for {status}, got: {other:?}"),
        }

        server.verify().await;
    }
}

#[tokio::test]
async fn test_openai_rate_limit_retries_then_gives_up() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("retry-after", "0")
                .set_body_json(api_error_body(
                    "Rate limit exceeded",
                    "requests",
                    "rate_limit_exceeded",
                )),
        )
        .expect(3)
        .mount(&server)
        .await;

    let adapter = RemoteApiAdapter::new(&openai_config(format!("{}/v1", server.uri()), 2)).unwrap();
    let result = adapter
        .transcribe(&png_payload(), PROMPT, "gpt-4o", Some("sk-test"))
        .await;

    assert_eq!(
        result,
        Err(ProviderError::RateLimited {
            retry_after: Some(0)
        }
        .into())
    );
}

#[tokio::test]
async fn test_openai_rate_limit_recovers() {
    let server = MockServer::start().await;
    let attempts = Arc::new(AtomicUsize::new(0));
    let attempts_for_mock = Arc::clone(&attempts);

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(move |_request: &Request| {
            if attempts_for_mock.fetch_add(1, Ordering::SeqCst) == 0 {
                ResponseTemplate::new(429).insert_header("retry-after", "0")
            } else {
                ResponseTemplate::new(200).set_body_json(completion_body("Recovered"))
            }
        })
        .mount(&server)
        .await;

    let adapter = RemoteApiAdapter::new(&openai_config(format!("{}/v1", server.uri()), 1)).unwrap();
    let text = adapter
        .transcribe(&png_payload(), PROMPT, "gpt-4o", Some("sk-test"))
        .await
        .unwrap();

    assert_eq!(text, "Recovered");
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_openai_server_error_is_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream temporary failure"))
        .expect(1)
        .mount(&server)
        .await;

    let adapter = RemoteApiAdapter::new(&openai_config(format!("{}/v1", server.uri()), 3)).unwrap();
    let result = adapter
        .transcribe(&png_payload(), PROMPT, "gpt-4o", Some("sk-test"))
        .await;

    match result {
        Err(OcrError::Provider(ProviderError::InferenceFailed(message))) => {
            assert!(message.contains("500"));
            assert!(message.contains("upstream temporary failure"));
        }
        other => panic!("Expected InferenceFailed, got: {other:?}"),
    }
}

#[tokio::test]
async fn test_openai_connection_refused() {
    let adapter = RemoteApiAdapter::new(&openai_config(closed_port_url(), 1)).unwrap();
    let result = adapter
        .transcribe(&png_payload(), PROMPT, "gpt-4o", Some("sk-test"))
        .await;

    assert!(matches!(
        result,
        Err(OcrError::Provider(ProviderError::ServerUnreachable(_)))
    ));
}
