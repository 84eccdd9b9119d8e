//! HTTP-level tests for the Ollama and Gemini backends against a mock server

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use rust_decimal_macros::dec;
use runcoach::backend::{CloudBackend, LocalBackend};
use runcoach::{
    Activity, AggregationConfig, AnalyticsPipeline, AthleteProfile, BackendConfig, BackendError,
    BackendErrorKind, Coach, CoachBackend, CoachIntent, DataScope, MetricsConfig, PredictionConfig,
    RetryPolicy, SummaryConfig,
};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const GENERATE_PATH: &str = "/models/gemini-2.0-flash:generateContent";

fn local_config(server: &MockServer) -> BackendConfig {
    BackendConfig {
        local_endpoint: server.uri(),
        ..BackendConfig::local()
    }
}

fn cloud_config(server: &MockServer) -> BackendConfig {
    BackendConfig {
        cloud_endpoint: server.uri(),
        ..BackendConfig::cloud("test-key")
    }
}

fn gemini_reply(text: &str) -> serde_json::Value {
    json!({
        "candidates": [{
            "content": {"parts": [{"text": text}], "role": "model"},
            "finishReason": "STOP"
        }]
    })
}

#[tokio::test]
async fn test_ollama_warms_once_then_generates() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "models": [{"name": "mistral:latest"}, {"name": "llama3.2:latest"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    // Warm load: empty prompt with keep_alive
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_partial_json(json!({
            "model": "llama3.2",
            "prompt": "",
            "stream": false,
            "keep_alive": "30m"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"response": ""})))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_partial_json(json!({"prompt": "How was my week?"})))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"response": "Solid week.", "done": true})),
        )
        .expect(2)
        .mount(&server)
        .await;

    let backend = LocalBackend::from_config(&local_config(&server)).unwrap();
    assert!(!backend.is_warm());

    assert_eq!(backend.generate("How was my week?").await.unwrap(), "Solid week.");
    assert!(backend.is_warm());
    assert_eq!(backend.generate("How was my week?").await.unwrap(), "Solid week.");
}

#[tokio::test]
async fn test_ollama_missing_model_is_unavailable() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"models": [{"name": "mistral:latest"}]})),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"response": "unused"})))
        .expect(0)
        .mount(&server)
        .await;

    let backend = LocalBackend::from_config(&local_config(&server)).unwrap();
    match backend.generate("hi").await {
        Err(BackendError::ModelUnavailable(message)) => {
            assert!(message.contains("ollama pull llama3.2"))
        }
        other => panic!("unexpected result: {:?}", other),
    }
    assert!(!backend.is_warm());
}

#[tokio::test]
async fn test_ollama_http_error_maps_status() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"models": [{"name": "llama3.2:latest"}]})),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": "model \"llama3.2\" not found, try pulling it first"
        })))
        .mount(&server)
        .await;

    let backend = LocalBackend::from_config(&local_config(&server)).unwrap();
    let err = backend.generate("hi").await.unwrap_err();
    assert_eq!(err.kind(), BackendErrorKind::ModelUnavailable);
    assert!(err.to_string().contains("try pulling"));
}

#[tokio::test]
async fn test_gemini_success_sends_key_in_header() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .and(header("x-goog-api-key", "test-key"))
        .and(body_partial_json(json!({
            "contents": [{"role": "user", "parts": [{"text": "Explain my 10K prediction"}]}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(gemini_reply("Aim for 52 minutes.")))
        .expect(1)
        .mount(&server)
        .await;

    let backend = CloudBackend::from_config(&cloud_config(&server)).unwrap();
    let text = backend.generate("Explain my 10K prediction").await.unwrap();
    assert_eq!(text, "Aim for 52 minutes.");

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert!(!requests[0].url.as_str().contains("test-key"));
}

#[tokio::test]
async fn test_gemini_status_mapping() {
    let cases = [
        (
            ResponseTemplate::new(401).set_body_json(json!({"error": {"message": "API key expired"}})),
            BackendErrorKind::Auth,
            None,
        ),
        (
            ResponseTemplate::new(403).set_body_json(json!({"error": {"message": "API key not valid"}})),
            BackendErrorKind::Auth,
            None,
        ),
        (
            ResponseTemplate::new(404).set_body_json(json!({"error": {"message": "models/x is not found"}})),
            BackendErrorKind::ModelUnavailable,
            None,
        ),
        (
            ResponseTemplate::new(429)
                .insert_header("Retry-After", "12")
                .set_body_json(json!({"error": {"message": "Resource exhausted"}})),
            BackendErrorKind::RateLimit,
            Some(Duration::from_secs(12)),
        ),
        (
            ResponseTemplate::new(429).set_body_json(json!({
                "error": {"message": "Quota exceeded. Please retry in 6.4s."}
            })),
            BackendErrorKind::RateLimit,
            Some(Duration::from_secs(7)),
        ),
        (
            ResponseTemplate::new(503).set_body_json(json!({"error": {"message": "overloaded"}})),
            BackendErrorKind::Network,
            None,
        ),
        (
            ResponseTemplate::new(200).set_body_string("<html>not json</html>"),
            BackendErrorKind::InvalidResponse,
            None,
        ),
    ];

    for (response, kind, retry_after) in cases {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(GENERATE_PATH))
            .respond_with(response)
            .mount(&server)
            .await;

        let backend = CloudBackend::from_config(&cloud_config(&server)).unwrap();
        let err = backend.generate("hi").await.unwrap_err();
        assert_eq!(err.kind(), kind, "unexpected mapping for {:?}", err);
        assert_eq!(err.retry_after(), retry_after);
    }
}

#[tokio::test]
async fn test_coach_retries_rate_limited_cloud_call() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("Retry-After", "0")
                .set_body_json(json!({"error": {"message": "Resource exhausted"}})),
        )
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(gemini_reply("Keep the easy runs easy.")))
        .expect(1)
        .mount(&server)
        .await;

    let pipeline = AnalyticsPipeline::new(
        AthleteProfile::new(190).with_resting_hr(50),
        MetricsConfig::default(),
        AggregationConfig::default(),
        PredictionConfig::default(),
    )
    .unwrap();
    let start = NaiveDate::from_ymd_opt(2024, 6, 3)
        .unwrap()
        .and_hms_opt(7, 0, 0)
        .unwrap();
    let analytics = pipeline.run(
        &[Activity::summary("easy-1", start, 1800, dec!(6000))],
        NaiveDate::from_ymd_opt(2024, 6, 5).unwrap(),
    );

    let coach = Coach::new(
        Arc::new(analytics),
        SummaryConfig::default(),
        RetryPolicy::default(),
        cloud_config(&server),
    )
    .unwrap();

    let response = coach
        .ask(CoachIntent::WeeklyAnalysis { weeks: 1 }, DataScope::all())
        .await
        .unwrap();
    assert_eq!(response.text, "Keep the easy runs easy.");
    assert_eq!(response.attempts, 2);
    assert_eq!(coach.rate_limiter().in_flight_window(), 2);

    // Both attempts carried the same prompt
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].body, requests[1].body);
}
