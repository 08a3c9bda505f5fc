//! cineflow-catalog: movie lookups
//!
//! Answers `GET /movies/{id}` from the RapidAPI IMDb endpoint, or from mock
//! data when no API key is configured or the key is rejected.
//!
//! ## Configuration
//! - IMDB_API_KEY: RapidAPI key (unset = mock mode)
//! - RAPIDAPI_HOST: API host (default imdb236.p.rapidapi.com)
//! - PORT: HTTP port (default 8000)

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info};

use cineflow::config::Config;
use cineflow::handlers::catalog_router;
use cineflow::services::MovieCatalog;
use cineflow::utils::bootstrap::{init_tracing, parse_config_path, shutdown_signal};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config_path = parse_config_path();
    let config = Config::load(config_path.as_deref()).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!("Starting cineflow-catalog");

    let catalog = Arc::new(MovieCatalog::new(&config.catalog)?);
    let app = catalog_router(catalog);

    let listener = TcpListener::bind(config.server.bind_address()).await?;
    info!(address = %config.server.bind_address(), "Catalog service listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Catalog service stopped");
    Ok(())
}
