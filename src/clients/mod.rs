//! Existence lookups against peer services.
//!
//! The streaming service only needs a yes/no answer from the user registry
//! and the catalog. `ResourceLookup` is that narrow seam; `HttpLookup` is the
//! production implementation and `InMemoryLookup` backs tests.

use async_trait::async_trait;

pub mod http;
pub mod mock;

pub use http::{build_client, HttpLookup};
pub use mock::InMemoryLookup;

/// Answer from a peer that was reachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    /// The peer answered 2xx.
    Found,
    /// The peer answered with a non-2xx status.
    Missing { status: u16 },
}

/// The peer could not be asked.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LookupError {
    #[error("Request to {url} timed out")]
    Timeout { url: String },

    #[error("Request to {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("Invalid lookup URL: {0}")]
    InvalidUrl(String),

    #[error("Failed to build HTTP client: {0}")]
    Client(String),
}

/// Checks whether a resource exists on a peer service.
#[async_trait]
pub trait ResourceLookup: Send + Sync {
    /// Issue one request. No retries.
    async fn check(&self, id: &str) -> Result<Presence, LookupError>;

    /// Short label for logs, e.g. the peer's base URL.
    fn describe(&self) -> String;
}
