//! Dependency verification for playback starts.
//!
//! Two existence checks, user first. The first failing check decides the
//! outcome and the other is never made. No retries here.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::clients::{Presence, ResourceLookup};
use crate::playback::PlaybackStartRequest;

/// Which peer a verification failure is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dependency {
    User,
    Movie,
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dependency::User => f.write_str("user"),
            Dependency::Movie => f.write_str("movie"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    /// The peer answered, and not with 2xx.
    #[error("{dependency} {id} not found")]
    NotFound { dependency: Dependency, id: String },

    /// The peer could not be reached or timed out.
    #[error("{0} service unavailable")]
    Unavailable(Dependency),
}

/// A request whose user and movie were both confirmed to exist.
///
/// Only [`DependencyVerifier::verify`] constructs one, so holding a
/// `VerifiedRequest` proves both checks passed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedRequest(PlaybackStartRequest);

impl VerifiedRequest {
    pub fn request(&self) -> &PlaybackStartRequest {
        &self.0
    }

    pub(crate) fn into_request(self) -> PlaybackStartRequest {
        self.0
    }

    #[cfg(test)]
    pub(crate) fn for_test(request: PlaybackStartRequest) -> Self {
        Self(request)
    }
}

pub struct DependencyVerifier {
    users: Arc<dyn ResourceLookup>,
    movies: Arc<dyn ResourceLookup>,
}

impl DependencyVerifier {
    pub fn new(users: Arc<dyn ResourceLookup>, movies: Arc<dyn ResourceLookup>) -> Self {
        Self { users, movies }
    }

    #[tracing::instrument(
        name = "playback.verify",
        skip_all,
        fields(user_id = request.user_id, movie_id = %request.movie_id)
    )]
    pub async fn verify(
        &self,
        request: PlaybackStartRequest,
    ) -> Result<VerifiedRequest, VerifyError> {
        Self::check(Dependency::User, self.users.as_ref(), &request.user_id.to_string()).await?;
        Self::check(Dependency::Movie, self.movies.as_ref(), &request.movie_id).await?;
        Ok(VerifiedRequest(request))
    }

    async fn check(
        dependency: Dependency,
        lookup: &dyn ResourceLookup,
        id: &str,
    ) -> Result<(), VerifyError> {
        match lookup.check(id).await {
            Ok(Presence::Found) => {
                debug!(%dependency, id, "Dependency exists");
                Ok(())
            }
            Ok(Presence::Missing { status }) => {
                debug!(%dependency, id, status, "Dependency not found");
                Err(VerifyError::NotFound {
                    dependency,
                    id: id.to_string(),
                })
            }
            Err(e) => {
                warn!(%dependency, peer = %lookup.describe(), error = %e, "Dependency check failed");
                Err(VerifyError::Unavailable(dependency))
            }
        }
    }
}
