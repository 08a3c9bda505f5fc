//! reqwest-backed existence lookups.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use tracing::debug;

use super::{LookupError, Presence, ResourceLookup};

/// Build the shared HTTP client. `timeout` bounds each whole request.
pub fn build_client(timeout: Duration) -> Result<Client, LookupError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| LookupError::Client(e.to_string()))
}

/// `GET {base_url}/{resource}/{id}`; any 2xx means the resource exists.
#[derive(Debug, Clone)]
pub struct HttpLookup {
    client: Client,
    base_url: Url,
    resource: &'static str,
}

impl HttpLookup {
    pub fn new(client: Client, base_url: &str, resource: &'static str) -> Result<Self, LookupError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| LookupError::InvalidUrl(format!("{}: {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(LookupError::InvalidUrl(base_url.to_string()));
        }
        Ok(Self {
            client,
            base_url,
            resource,
        })
    }

    /// Lookup against the user registry (`/users/{id}`).
    pub fn users(client: Client, base_url: &str) -> Result<Self, LookupError> {
        Self::new(client, base_url, "users")
    }

    /// Lookup against the catalog (`/movies/{id}`).
    pub fn movies(client: Client, base_url: &str) -> Result<Self, LookupError> {
        Self::new(client, base_url, "movies")
    }

    /// `{base}/{resource}`, joined by path segment.
    fn collection_url(&self) -> Result<Url, LookupError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| LookupError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .push(self.resource);
        Ok(url)
    }

    /// The id is percent-encoded as a single path segment.
    fn resource_url(&self, id: &str) -> Result<Url, LookupError> {
        let mut url = self.collection_url()?;
        url.path_segments_mut()
            .map_err(|_| LookupError::InvalidUrl(self.base_url.to_string()))?
            .push(id);
        Ok(url)
    }
}

#[async_trait]
impl ResourceLookup for HttpLookup {
    async fn check(&self, id: &str) -> Result<Presence, LookupError> {
        let url = self.resource_url(id)?;

        let response = self.client.get(url.clone()).send().await.map_err(|e| {
            if e.is_timeout() {
                LookupError::Timeout {
                    url: url.to_string(),
                }
            } else {
                LookupError::Transport {
                    url: url.to_string(),
                    message: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        debug!(url = %url, status = status.as_u16(), "Lookup answered");

        if status.is_success() {
            Ok(Presence::Found)
        } else {
            Ok(Presence::Missing {
                status: status.as_u16(),
            })
        }
    }

    fn describe(&self) -> String {
        self.collection_url()
            .map_or_else(|_| self.base_url.to_string(), |url| url.to_string())
    }
}
