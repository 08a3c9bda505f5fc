//! Movie catalog backed by the RapidAPI IMDb endpoint.
//!
//! Without a usable API key, or when the upstream rejects the key (403/404)
//! or cannot be reached, lookups fall back to deterministic mock data.
//! Every other upstream status is passed through to the caller.

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::config::CatalogConfig;

/// Id with a hand-written mock entry.
const KNOWN_MOCK_ID: &str = "tt0110912";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovieDetail {
    pub imdb_id: String,
    pub title: String,
    pub year: i64,
}

impl MovieDetail {
    /// Mock entry returned when the upstream is not used.
    pub fn mock(imdb_id: &str) -> Self {
        let (title, year) = if imdb_id == KNOWN_MOCK_ID {
            ("Pulp Fiction (MOCK)".to_string(), 1994)
        } else {
            (format!("Movie ID {} (MOCK)", imdb_id), 2024)
        };
        Self {
            imdb_id: imdb_id.to_string(),
            title,
            year,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    /// Upstream answered with a status other than 2xx, 403 or 404.
    #[error("Unexpected IMDb API status {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("Invalid IMDb API response: {0}")]
    InvalidResponse(String),

    #[error("Failed to build HTTP client: {0}")]
    Client(String),
}

struct UpstreamApi {
    base_url: String,
    host: String,
    key: String,
}

pub struct MovieCatalog {
    client: Client,
    upstream: Option<UpstreamApi>,
}

impl MovieCatalog {
    pub fn new(config: &CatalogConfig) -> Result<Self, CatalogError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| CatalogError::Client(e.to_string()))?;

        let upstream = config.api_key().map(|key| UpstreamApi {
            base_url: format!("https://{}", config.rapidapi_host),
            host: config.rapidapi_host.clone(),
            key: key.to_string(),
        });

        match &upstream {
            Some(api) => info!(host = %api.host, "IMDb API key configured"),
            None => warn!("IMDb API key not configured, serving mock catalog data"),
        }

        Ok(Self { client, upstream })
    }

    /// Point upstream requests at a different origin, keeping the host header.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        if let Some(api) = self.upstream.as_mut() {
            api.base_url = base_url.into();
        }
        self
    }

    pub fn is_mock(&self) -> bool {
        self.upstream.is_none()
    }

    pub async fn lookup(&self, imdb_id: &str) -> Result<MovieDetail, CatalogError> {
        if let Some(api) = &self.upstream {
            if let Some(detail) = self.fetch(api, imdb_id).await? {
                return Ok(detail);
            }
        }

        info!(imdb_id, "Serving mock movie detail");
        Ok(MovieDetail::mock(imdb_id))
    }

    /// `Ok(None)` means fall back to mock data.
    async fn fetch(
        &self,
        api: &UpstreamApi,
        imdb_id: &str,
    ) -> Result<Option<MovieDetail>, CatalogError> {
        let url = format!("{}/api/imdb/title/{}", api.base_url, imdb_id);

        let response = match self
            .client
            .get(&url)
            .header("x-rapidapi-host", &api.host)
            .header("x-rapidapi-key", &api.key)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "IMDb API unreachable, falling back to mock");
                return Ok(None);
            }
        };

        let status = response.status();
        if status == StatusCode::FORBIDDEN || status == StatusCode::NOT_FOUND {
            warn!(status = status.as_u16(), "IMDb API rejected the request, falling back to mock");
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "Unexpected IMDb API status");
            return Err(CatalogError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let data: Value = response
            .json()
            .await
            .map_err(|e| CatalogError::InvalidResponse(e.to_string()))?;

        Ok(Some(MovieDetail {
            imdb_id: imdb_id.to_string(),
            title: data
                .get("title")
                .and_then(Value::as_str)
                .unwrap_or("Unknown title")
                .to_string(),
            year: data.get("year").and_then(Value::as_i64).unwrap_or(0),
        }))
    }
}
