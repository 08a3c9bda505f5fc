//! Playback orchestration.
//!
//! `PlaybackOrchestrator::start_playback` is the one externally visible
//! workflow of the streaming service: verify the user and the movie, then
//! publish a playback event. Verification failures stop the workflow before
//! anything touches the broker. A publish failure after a successful
//! verification has no compensation; the caller retries the whole call and
//! may produce a duplicate event.

use std::sync::Arc;

use tracing::{info, warn};

pub mod verifier;

pub use verifier::{Dependency, DependencyVerifier, VerifiedRequest, VerifyError};

use crate::bus::{EventPublisher, PublishError};
use crate::playback::{PlaybackEvent, PlaybackStartRequest};

/// Caller-facing outcome of a failed playback start.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlaybackError {
    /// Terminal. The caller supplied an unknown id.
    #[error("{dependency} {id} not found")]
    NotFound { dependency: Dependency, id: String },

    /// Transient. A peer service could not be reached.
    #[error("{0} service unavailable")]
    DependencyUnavailable(Dependency),

    /// Transient. No broker connection; nothing was sent.
    #[error("Broker connection unavailable")]
    BrokerUnavailable,

    /// Ambiguous. The event may or may not have been stored.
    #[error("Failed to publish playback event: {0}")]
    PublishFailed(String),
}

impl From<VerifyError> for PlaybackError {
    fn from(err: VerifyError) -> Self {
        match err {
            VerifyError::NotFound { dependency, id } => PlaybackError::NotFound { dependency, id },
            VerifyError::Unavailable(dependency) => PlaybackError::DependencyUnavailable(dependency),
        }
    }
}

impl From<PublishError> for PlaybackError {
    fn from(err: PublishError) -> Self {
        match err {
            PublishError::BrokerUnavailable => PlaybackError::BrokerUnavailable,
            PublishError::Failed(message) => PlaybackError::PublishFailed(message),
        }
    }
}

/// Verifier plus publisher.
pub struct PlaybackOrchestrator {
    verifier: DependencyVerifier,
    publisher: Arc<dyn EventPublisher>,
}

impl PlaybackOrchestrator {
    pub fn new(verifier: DependencyVerifier, publisher: Arc<dyn EventPublisher>) -> Self {
        Self {
            verifier,
            publisher,
        }
    }

    /// Returns the published event on success.
    pub async fn start_playback(
        &self,
        request: PlaybackStartRequest,
    ) -> Result<PlaybackEvent, PlaybackError> {
        let verified = self.verifier.verify(request).await?;

        info!(
            user_id = verified.request().user_id,
            movie_id = %verified.request().movie_id,
            "Dependencies verified"
        );

        let event = PlaybackEvent::from(verified);
        if let Err(e) = self.publisher.publish(&event).await {
            warn!(
                user_id = event.user_id(),
                movie_id = %event.movie_id(),
                error = %e,
                "Playback verified but not published"
            );
            return Err(e.into());
        }

        info!(
            user_id = event.user_id(),
            movie_id = %event.movie_id(),
            "Playback started"
        );
        Ok(event)
    }
}
