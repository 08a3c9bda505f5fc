//! User service routes.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};

use super::{ApiError, ApiJson, ApiPath};
use crate::playback::UserId;
use crate::services::{NewUser, PlaybackHistory, PlaybackRecord, User, UserStore};

#[derive(Clone)]
pub struct UserState {
    pub store: Arc<dyn UserStore>,
    pub history: PlaybackHistory,
}

/// POST /users
async fn create_user(
    State(state): State<UserState>,
    ApiJson(user): ApiJson<NewUser>,
) -> Result<(StatusCode, Json<User>), ApiError> {
    let user = state.store.create(user).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

/// GET /users/{id}
async fn get_user(
    State(state): State<UserState>,
    ApiPath(id): ApiPath<UserId>,
) -> Result<Json<User>, ApiError> {
    Ok(Json(state.store.get(id).await?))
}

/// GET /users/{id}/playbacks
async fn list_playbacks(
    State(state): State<UserState>,
    ApiPath(id): ApiPath<UserId>,
) -> Result<Json<Vec<PlaybackRecord>>, ApiError> {
    state.store.get(id).await?;
    Ok(Json(state.history.for_user(id).await))
}

pub fn router() -> Router<UserState> {
    Router::new()
        .route("/users", post(create_user))
        .route("/users/{id}", get(get_user))
        .route("/users/{id}/playbacks", get(list_playbacks))
}
