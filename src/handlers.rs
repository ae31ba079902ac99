use crate::config::Config;
use crate::errors::AppError;
use crate::models::{TranscriptAccepted, TranscriptRequest};
use crate::processor::PipelineRunner;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use moka::future::Cache;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    /// Background pipeline pool.
    pub runner: PipelineRunner,
    /// Fingerprint of organization + transcript -> request id of the run that took it.
    pub recent_transcripts: Cache<String, String>,
}

impl AppState {
    pub fn new(config: Config, runner: PipelineRunner) -> Self {
        // Covers a typical run; resubmissions after that start a fresh run
        let recent_transcripts = Cache::builder()
            .time_to_live(Duration::from_secs(300))
            .max_capacity(10_000)
            .build();

        Self {
            config,
            runner,
            recent_transcripts,
        }
    }
}

/// Routes without the rate limiter, which needs peer addresses and is layered on in `main`.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/transcript", post(submit_transcript))
        .with_state(state)
}

/// Health check endpoint.
pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "rust-hsds-analysis",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

fn transcript_fingerprint(request: &TranscriptRequest) -> String {
    let mut hasher = Sha256::new();
    hasher.update(request.organization_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(request.transcript.as_bytes());
    hex::encode(hasher.finalize())
}

/// POST /transcript
///
/// Acknowledges with 202 and hands the run to the background pool. The caller never
/// sees the outcome; failures are logged with the returned `request_id`.
pub async fn submit_transcript(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<TranscriptRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<TranscriptAccepted>), AppError> {
    let Json(request) = payload.map_err(|rejection| {
        tracing::warn!("Rejected transcript body: {}", rejection.body_text());
        AppError::BadRequest(format!("Invalid request body: {}", rejection.body_text()))
    })?;

    if request.organization_id.trim().is_empty() {
        return Err(AppError::BadRequest("organization_id is required".to_string()));
    }
    if request.transcript.trim().is_empty() {
        return Err(AppError::BadRequest("transcript is required".to_string()));
    }

    let request_id = Uuid::new_v4().to_string();
    let fingerprint = transcript_fingerprint(&request);

    let entry = state
        .recent_transcripts
        .entry(fingerprint)
        .or_insert_with(async { request_id.clone() })
        .await;

    if !entry.is_fresh() {
        let original = entry.into_value();
        tracing::warn!(
            "⏭ Duplicate transcript for organization {} ignored (already accepted as {})",
            request.organization_id,
            original
        );
        return Ok((
            StatusCode::ACCEPTED,
            Json(TranscriptAccepted {
                status: "accepted".to_string(),
                message: "Transcript already received and being processed".to_string(),
                request_id: original,
            }),
        ));
    }

    tracing::info!(
        request_id = %request_id,
        organization_id = %request.organization_id,
        "POST /transcript accepted ({} chars)",
        request.transcript.len()
    );

    // Detached; the run logs its own outcome
    let _ = state.runner.submit(request_id.clone(), request);

    Ok((
        StatusCode::ACCEPTED,
        Json(TranscriptAccepted {
            status: "accepted".to_string(),
            message: "Transcript received and processing started".to_string(),
            request_id,
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(org: &str, transcript: &str) -> TranscriptRequest {
        TranscriptRequest {
            organization_id: org.to_string(),
            room_url: "https://rooms.example/abc".to_string(),
            transcript: transcript.to_string(),
        }
    }

    #[test]
    fn test_fingerprint_ignores_room_url() {
        let a = request("org-1", "hello");
        let mut b = request("org-1", "hello");
        b.room_url = "https://rooms.example/other".to_string();
        assert_eq!(transcript_fingerprint(&a), transcript_fingerprint(&b));
        assert_eq!(transcript_fingerprint(&a).len(), 64);
    }

    #[test]
    fn test_fingerprint_separates_org_and_transcript() {
        assert_ne!(
            transcript_fingerprint(&request("org-1", "0hello")),
            transcript_fingerprint(&request("org-10", "hello"))
        );
    }
}
