//! Playback request and event types.
//!
//! `PlaybackStartRequest` is what a caller sends to the streaming service.
//! `PlaybackEvent` is what travels over the `playback_events` queue. On the
//! producer side an event can only be built from a [`VerifiedRequest`], which
//! only the dependency verifier hands out.

use serde::{Deserialize, Serialize};

use crate::orchestration::VerifiedRequest;

/// User identifier as issued by the user registry.
pub type UserId = i64;

/// Body of `POST /playback/start`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackStartRequest {
    pub user_id: UserId,
    pub movie_id: String,
}

impl PlaybackStartRequest {
    pub fn new(user_id: UserId, movie_id: impl Into<String>) -> Self {
        Self {
            user_id,
            movie_id: movie_id.into(),
        }
    }
}

/// Wire representation of a verified playback start.
///
/// Encoded as compact JSON with `user_id` first, e.g.
/// `{"user_id":1,"movie_id":"tt0110912"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackEvent {
    user_id: UserId,
    movie_id: String,
}

impl PlaybackEvent {
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn movie_id(&self) -> &str {
        &self.movie_id
    }

    /// Canonical byte encoding published to the broker.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Decode a message body received from the broker.
    pub fn decode(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }
}

impl From<VerifiedRequest> for PlaybackEvent {
    fn from(verified: VerifiedRequest) -> Self {
        let PlaybackStartRequest { user_id, movie_id } = verified.into_request();
        Self { user_id, movie_id }
    }
}
