//! Outbound HTTP configuration: peer services and the external movie lookup.

use std::time::Duration;

use serde::Deserialize;

/// Key value shipped in the sample environment file. Treated as "no key".
pub const PLACEHOLDER_API_KEY: &str = "[SUA NOVA CHAVE IMDB ATIVA AQUI]";

/// Base URLs of the services the streaming service verifies against.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PeersConfig {
    pub user_service_url: String,
    pub catalog_service_url: String,
    /// Per-request timeout for existence checks.
    pub timeout_secs: u64,
}

impl PeersConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for PeersConfig {
    fn default() -> Self {
        Self {
            user_service_url: "http://cineflow-user:8000".to_string(),
            catalog_service_url: "http://cineflow-catalog:8000".to_string(),
            timeout_secs: 5,
        }
    }
}

/// RapidAPI IMDb lookup used by the catalog service.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub api_key: Option<String>,
    pub rapidapi_host: String,
    pub timeout_secs: u64,
}

impl CatalogConfig {
    /// The configured key, unless it is missing, blank or the placeholder.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty() && *key != PLACEHOLDER_API_KEY)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            rapidapi_host: "imdb236.p.rapidapi.com".to_string(),
            timeout_secs: 10,
        }
    }
}
