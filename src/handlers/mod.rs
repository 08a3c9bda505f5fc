//! HTTP surface of the three services.
//!
//! One router per binary. Each carries `/health` and a request trace layer.

use std::sync::Arc;

use axum::Router;
use tower_http::trace::TraceLayer;

pub mod error;
pub mod extract;
pub mod health;
pub mod movies;
pub mod playback;
pub mod users;

pub use error::ApiError;
pub use extract::{ApiJson, ApiPath};
pub use users::UserState;

use crate::orchestration::PlaybackOrchestrator;
use crate::services::MovieCatalog;

pub fn streaming_router(orchestrator: Arc<PlaybackOrchestrator>) -> Router {
    Router::new()
        .merge(health::router("Streaming Service Healthy"))
        .merge(playback::router())
        .with_state(orchestrator)
        .layer(TraceLayer::new_for_http())
}

pub fn user_router(state: UserState) -> Router {
    Router::new()
        .merge(health::router("User Service Healthy"))
        .merge(users::router())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

pub fn catalog_router(catalog: Arc<MovieCatalog>) -> Router {
    Router::new()
        .merge(health::router("Catalog Service Healthy"))
        .merge(movies::router())
        .with_state(catalog)
        .layer(TraceLayer::new_for_http())
}
