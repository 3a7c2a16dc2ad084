use std::time::Duration;

use image::DynamicImage;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use ocrlay::recognition::error::{ErrorKind, RecognitionError};
use ocrlay::recognition::{RecognitionClient, RetryPolicy};

fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        backoff_factor: 2.0,
    }
}

fn client_for(server: &MockServer, retry: RetryPolicy, timeout: Duration) -> RecognitionClient {
    RecognitionClient::new(server.uri(), "llava:7b", timeout, retry, 4096)
}

fn test_image() -> DynamicImage {
    DynamicImage::new_rgb8(32, 32)
}

fn structured_body(text: &str) -> serde_json::Value {
    json!({
        "response": json!({
            "text": text,
            "blocks": [
                { "text": text, "x": 2.0, "y": 2.0, "width": 20.0, "height": 8.0, "confidence": 0.9 }
            ]
        })
        .to_string()
    })
}

#[tokio::test]
async fn success_on_final_attempt_reports_exact_attempt_count() {
    let server = MockServer::start().await;

    // Two transient failures, then a good answer.
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(structured_body("Invoice #42")))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, fast_retry(3), Duration::from_secs(5));
    let page = client.recognize(&test_image(), 0).await.unwrap();

    assert_eq!(page.attempts, 3);
    assert_eq!(page.regions.len(), 1);
    assert_eq!(page.regions[0].text, "Invoice #42");
    assert!((page.average_confidence - 0.9).abs() < 1e-9);
}

#[tokio::test]
async fn attempt_budget_is_spent_exactly_never_exceeded() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let client = client_for(&server, fast_retry(3), Duration::from_secs(5));
    let failure = client.recognize(&test_image(), 0).await.unwrap_err();

    assert_eq!(failure.attempts, 3);
    assert_eq!(failure.error.kind(), ErrorKind::TransportError);
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn malformed_response_is_not_retried() {
    let server = MockServer::start().await;

    // Well-formed HTTP, empty model output. Retrying would return the
    // same thing, so exactly one request goes out.
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "response": "" })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, fast_retry(3), Duration::from_secs(5));
    let failure = client.recognize(&test_image(), 0).await.unwrap_err();

    assert_eq!(failure.attempts, 1);
    assert_eq!(failure.error.kind(), ErrorKind::MalformedResponse);
    assert!(!failure.error.is_retryable());
}

#[tokio::test]
async fn slow_backend_times_out_and_retries_until_budget() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(structured_body("too late"))
                .set_delay(Duration::from_millis(400)),
        )
        .mount(&server)
        .await;

    let client = client_for(&server, fast_retry(2), Duration::from_millis(50));
    let failure = client.recognize(&test_image(), 0).await.unwrap_err();

    assert_eq!(failure.attempts, 2);
    assert_eq!(failure.error.kind(), ErrorKind::Timeout);
    assert!(failure.error.is_retryable());
}

#[tokio::test]
async fn flat_text_answer_becomes_whole_page_region() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": "The quick brown fox jumps over the lazy dog"
        })))
        .mount(&server)
        .await;

    let client = client_for(&server, fast_retry(1), Duration::from_secs(5));
    let page = client.recognize(&test_image(), 0).await.unwrap();

    assert_eq!(page.regions.len(), 1);
    assert!(page.regions[0].is_whole_page());
    assert!(page.regions[0].confidence <= 0.7);
    assert_eq!(page.attempts, 1);
}

#[tokio::test]
async fn model_listing_matches_exact_and_base_names() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "models": [
                { "name": "llava:7b" },
                { "name": "qwen2.5vl:3b" }
            ]
        })))
        .mount(&server)
        .await;

    let exact = RecognitionClient::new(
        server.uri(),
        "llava:7b",
        Duration::from_secs(5),
        fast_retry(1),
        4096,
    );
    exact.ensure_model_available().await.unwrap();

    // Asking for the bare base name matches any tagged variant.
    let base = RecognitionClient::new(
        server.uri(),
        "qwen2.5vl",
        Duration::from_secs(5),
        fast_retry(1),
        4096,
    );
    base.ensure_model_available().await.unwrap();

    let missing = RecognitionClient::new(
        server.uri(),
        "moondream",
        Duration::from_secs(5),
        fast_retry(1),
        4096,
    );
    let err = missing.ensure_model_available().await.unwrap_err();
    assert!(matches!(err, RecognitionError::ModelUnavailable { .. }));
    assert!(err.is_configuration_error());
}

#[tokio::test]
async fn tagged_model_request_requires_exact_tag_match() {
    let server = MockServer::start().await;

    // Only the 13b variant is loaded; a request pinned to 7b must fail
    // here, not later as per-page 404s.
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "models": [{ "name": "llava:13b" }]
        })))
        .mount(&server)
        .await;

    let client = RecognitionClient::new(
        server.uri(),
        "llava:7b",
        Duration::from_secs(5),
        fast_retry(1),
        4096,
    );
    let err = client.ensure_model_available().await.unwrap_err();
    assert!(matches!(err, RecognitionError::ModelUnavailable { .. }));
    assert!(err.is_configuration_error());
}

#[tokio::test]
async fn missing_model_error_lists_available_models() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "models": [{ "name": "llava:7b" }]
        })))
        .mount(&server)
        .await;

    let client = RecognitionClient::new(
        server.uri(),
        "moondream",
        Duration::from_secs(5),
        fast_retry(1),
        4096,
    );
    let err = client.ensure_model_available().await.unwrap_err();
    let message = err.to_string();
    assert!(message.contains("moondream"));
    assert!(message.contains("llava:7b"));
}
