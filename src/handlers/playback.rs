//! Streaming service routes.

use std::sync::Arc;

use axum::{extract::State, routing::post, Json, Router};
use serde::{Deserialize, Serialize};

use super::{ApiError, ApiJson};
use crate::orchestration::PlaybackOrchestrator;
use crate::playback::PlaybackStartRequest;

pub const STARTED_MESSAGE: &str = "Playback started and playback event published.";

#[derive(Debug, Serialize, Deserialize)]
pub struct StartedResponse {
    pub message: String,
}

/// POST /playback/start
async fn start_playback(
    State(orchestrator): State<Arc<PlaybackOrchestrator>>,
    ApiJson(request): ApiJson<PlaybackStartRequest>,
) -> Result<Json<StartedResponse>, ApiError> {
    orchestrator.start_playback(request).await?;
    Ok(Json(StartedResponse {
        message: STARTED_MESSAGE.to_string(),
    }))
}

pub fn router() -> Router<Arc<PlaybackOrchestrator>> {
    Router::new().route("/playback/start", post(start_playback))
}
