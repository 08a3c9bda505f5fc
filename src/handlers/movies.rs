//! Catalog service routes.

use std::sync::Arc;

use axum::{
    extract::State,
    routing::get,
    Json, Router,
};

use super::{ApiError, ApiPath};
use crate::services::{MovieCatalog, MovieDetail};

/// GET /movies/{id}
async fn get_movie(
    State(catalog): State<Arc<MovieCatalog>>,
    ApiPath(id): ApiPath<String>,
) -> Result<Json<MovieDetail>, ApiError> {
    Ok(Json(catalog.lookup(&id).await?))
}

pub fn router() -> Router<Arc<MovieCatalog>> {
    Router::new().route("/movies/{id}", get(get_movie))
}
