//! HTTP error mapping.
//!
//! Every failure leaves the service as `{"detail": "..."}` with a status
//! that depends only on the cause.

use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::orchestration::{Dependency, PlaybackError};
use crate::services::{CatalogError, RegistryError};

/// JSON body returned for error responses.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: StatusCode,
    pub detail: String,
}

impl ApiError {
    pub fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, detail)
    }
}

impl From<PlaybackError> for ApiError {
    fn from(err: PlaybackError) -> Self {
        match err {
            PlaybackError::NotFound {
                dependency: Dependency::User,
                id,
            } => Self::not_found(format!("User ID {} not found.", id)),
            PlaybackError::NotFound {
                dependency: Dependency::Movie,
                id,
            } => Self::not_found(format!("Movie ID {} not found in catalog.", id)),
            PlaybackError::DependencyUnavailable(Dependency::User) => {
                Self::new(StatusCode::SERVICE_UNAVAILABLE, "User service unavailable.")
            }
            PlaybackError::DependencyUnavailable(Dependency::Movie) => {
                Self::new(StatusCode::SERVICE_UNAVAILABLE, "Catalog service unavailable.")
            }
            PlaybackError::BrokerUnavailable => {
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Broker connection failed.")
            }
            PlaybackError::PublishFailed(_) => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to publish playback event.",
            ),
        }
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::DuplicateEmail(_) => {
                Self::new(StatusCode::BAD_REQUEST, "Email already registered.")
            }
            RegistryError::NotFound(_) => Self::not_found("User not found."),
        }
    }
}

impl From<CatalogError> for ApiError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::Upstream { status, body } => Self::new(
                StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY),
                format!("Unexpected IMDb API error: {}", body),
            ),
            CatalogError::InvalidResponse(message) => Self::new(
                StatusCode::BAD_GATEWAY,
                format!("Invalid IMDb API response: {}", message),
            ),
            CatalogError::Client(message) => Self::new(StatusCode::INTERNAL_SERVER_ERROR, message),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(rejection.status(), rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::new(rejection.status(), rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { detail: self.detail })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(err: impl Into<ApiError>) -> StatusCode {
        err.into().into_response().status()
    }

    #[test]
    fn test_not_found_maps_to_404_with_which_id() {
        let err = ApiError::from(PlaybackError::NotFound {
            dependency: Dependency::User,
            id: "999".to_string(),
        });
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(err.detail, "User ID 999 not found.");

        let err = ApiError::from(PlaybackError::NotFound {
            dependency: Dependency::Movie,
            id: "tt404".to_string(),
        });
        assert_eq!(err.detail, "Movie ID tt404 not found in catalog.");
    }

    #[test]
    fn test_dependency_unavailable_maps_to_503() {
        assert_eq!(
            status_of(PlaybackError::DependencyUnavailable(Dependency::User)),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(PlaybackError::DependencyUnavailable(Dependency::Movie)),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_broker_failures_map_to_500() {
        assert_eq!(
            status_of(PlaybackError::BrokerUnavailable),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_of(PlaybackError::PublishFailed("nack".to_string())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_registry_errors() {
        assert_eq!(
            status_of(RegistryError::DuplicateEmail("a@b.c".to_string())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status_of(RegistryError::NotFound(1)), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_upstream_status_is_propagated() {
        assert_eq!(
            status_of(CatalogError::Upstream {
                status: 429,
                body: "slow down".to_string()
            }),
            StatusCode::TOO_MANY_REQUESTS
        );
    }
}
