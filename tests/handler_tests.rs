mod common;

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use common::{storage_with_org, MemoryStore, ScriptedInference, ORG_ID};
use rust_hsds_analysis::config::Config;
use rust_hsds_analysis::handlers::{router, AppState};
use rust_hsds_analysis::inference::InferenceClient;
use rust_hsds_analysis::orchestrator::AnalyzerRegistry;
use rust_hsds_analysis::processor::{PipelineRunner, TranscriptProcessor};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn test_config() -> Config {
    Config {
        database_url: "postgresql://test".to_string(),
        port: 8080,
        anthropic_api_key: "test-key".to_string(),
        anthropic_api_url: "https://inference.invalid/v1/messages".to_string(),
        anthropic_model: "test-model".to_string(),
        max_tokens: 1500,
        overload_retries: 0,
        retry_delay_secs: 0,
        pipeline_workers: 1,
        audit_actor: "BearHug".to_string(),
        breaker_failure_threshold: 5,
        breaker_backoff_min_secs: 10,
        breaker_backoff_max_secs: 60,
    }
}

fn app() -> Router {
    let store = MemoryStore::new();
    let storage = storage_with_org(store);
    let client: Arc<dyn InferenceClient> = ScriptedInference::new();
    let registry = AnalyzerRegistry::with_defaults(client.clone(), storage.clone());
    let runner = PipelineRunner::new(TranscriptProcessor::new(client, storage, registry), 1);
    router(Arc::new(AppState::new(test_config(), runner)))
}

fn post_transcript(body: String) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/transcript")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn transcript_body(transcript: &str) -> String {
    json!({
        "organization_id": ORG_ID,
        "room_url": "https://rooms.example/abc",
        "transcript": transcript
    })
    .to_string()
}

#[tokio::test]
async fn test_transcript_is_accepted() {
    let response = app()
        .oneshot(post_transcript(transcript_body("We have 5 beds.")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = json_body(response).await;
    assert_eq!(body["status"], json!("accepted"));
    assert_eq!(
        body["message"],
        json!("Transcript received and processing started")
    );
    assert!(body["request_id"].as_str().is_some_and(|id| !id.is_empty()));
}

#[tokio::test]
async fn test_duplicate_transcript_reuses_request_id() {
    let app = app();

    let first = json_body(
        app.clone()
            .oneshot(post_transcript(transcript_body("Same call twice")))
            .await
            .unwrap(),
    )
    .await;
    let second_response = app
        .oneshot(post_transcript(transcript_body("Same call twice")))
        .await
        .unwrap();

    assert_eq!(second_response.status(), StatusCode::ACCEPTED);
    let second = json_body(second_response).await;
    assert_eq!(second["request_id"], first["request_id"]);
    assert_ne!(second["message"], first["message"]);
}

#[tokio::test]
async fn test_malformed_body_is_bad_request() {
    let response = app()
        .oneshot(post_transcript("{not json".to_string()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app()
        .oneshot(post_transcript(json!({"organization_id": ORG_ID}).to_string()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_empty_transcript_is_bad_request() {
    let response = app()
        .oneshot(post_transcript(transcript_body("   ")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_non_post_is_method_not_allowed() {
    let response = app()
        .oneshot(
            Request::builder()
                .method(Method::GET)
                .uri("/transcript")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_health() {
    let response = app()
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["status"], json!("healthy"));
}
