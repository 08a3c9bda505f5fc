//! Application configuration.
//!
//! One `Config` is shared by all three services; each binary reads the
//! sections it needs. Loaded from YAML files and environment variables.

mod client;
mod messaging;
mod server;

pub use client::{CatalogConfig, PeersConfig, PLACEHOLDER_API_KEY};
pub use messaging::BrokerConfig;
pub use server::{ServerConfig, DEFAULT_PORT};

use serde::Deserialize;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "CINEFLOW_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "CINEFLOW";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "CINEFLOW_LOG";
/// Environment variable selecting the log output format (`json` or text).
pub const LOG_FORMAT_ENV_VAR: &str = "CINEFLOW_LOG_FORMAT";

/// Flat environment variables read by the deployed services, mapped onto
/// config keys. These win over every other source.
pub const LEGACY_ENV_VARS: &[(&str, &str)] = &[
    ("RABBITMQ_HOST", "broker.host"),
    ("RABBITMQ_USER", "broker.user"),
    ("RABBITMQ_PASS", "broker.password"),
    ("USER_SERVICE_URL", "peers.user_service_url"),
    ("CATALOG_SERVICE_URL", "peers.catalog_service_url"),
    ("IMDB_API_KEY", "catalog.api_key"),
    ("RAPIDAPI_HOST", "catalog.rapidapi_host"),
    ("PORT", "server.port"),
];

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP listener.
    pub server: ServerConfig,
    /// RabbitMQ connection.
    pub broker: BrokerConfig,
    /// Peer services checked before a playback starts.
    pub peers: PeersConfig,
    /// External movie lookup.
    pub catalog: CatalogConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `config.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    /// 5. [`LEGACY_ENV_VARS`]
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix(CONFIG_ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        for (var, key) in LEGACY_ENV_VARS {
            let value = std::env::var(var).ok().filter(|v| !v.is_empty());
            builder = builder.set_override_option(*key, value)?;
        }

        let config: Config = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Create config for testing.
    pub fn for_test() -> Self {
        Self::default()
    }
}
