//! cineflow-streaming: playback orchestrator
//!
//! Verifies the user and the movie against their services, then publishes a
//! playback event to RabbitMQ for the user service to consume.
//!
//! ## Architecture
//! ```text
//! [Client] -> POST /playback/start -> [cineflow-streaming] -> GET /users/{id}   [cineflow-user]
//!                                            |             -> GET /movies/{id}  [cineflow-catalog]
//!                                            v
//!                                   [playback_events queue]
//! ```
//!
//! ## Configuration
//! - USER_SERVICE_URL / CATALOG_SERVICE_URL: peer base URLs
//! - RABBITMQ_HOST / RABBITMQ_USER / RABBITMQ_PASS: broker credentials
//! - PORT: HTTP port (default 8000)

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info};

use cineflow::bus::{AmqpConnector, BrokerConnectionManager, PlaybackPublisher};
use cineflow::clients::{build_client, HttpLookup};
use cineflow::config::Config;
use cineflow::handlers::streaming_router;
use cineflow::orchestration::{DependencyVerifier, PlaybackOrchestrator};
use cineflow::utils::bootstrap::{init_tracing, parse_config_path, shutdown_signal};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config_path = parse_config_path();
    let config = Config::load(config_path.as_deref()).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!("Starting cineflow-streaming");

    let connection = Arc::new(
        BrokerConnectionManager::new(Arc::new(AmqpConnector::from_config(&config.broker)))
            .with_retry_delay(config.broker.retry_delay()),
    );

    let client = build_client(config.peers.timeout())?;
    let users = HttpLookup::users(client.clone(), &config.peers.user_service_url)?;
    let movies = HttpLookup::movies(client, &config.peers.catalog_service_url)?;
    info!(
        users = %config.peers.user_service_url,
        catalog = %config.peers.catalog_service_url,
        "Peer services configured"
    );

    let publisher = PlaybackPublisher::new(Arc::clone(&connection)).with_queue(&config.broker.queue);
    let orchestrator = Arc::new(PlaybackOrchestrator::new(
        DependencyVerifier::new(Arc::new(users), Arc::new(movies)),
        Arc::new(publisher),
    ));

    let app = streaming_router(orchestrator);
    let listener = TcpListener::bind(config.server.bind_address()).await?;
    info!(address = %config.server.bind_address(), "Streaming service listening");

    // Connect in the background so HTTP is served right away. Publishes fail
    // with BrokerUnavailable until the first connection is up. Nothing
    // fallible may run between starting the supervisor and entering the scope.
    let supervisor = connection.spawn_supervisor();
    connection
        .scoped(async {
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await
        })
        .await?;

    if let Err(e) = supervisor.await {
        error!(error = %e, "Broker supervisor task failed");
    }

    info!("Streaming service stopped");
    Ok(())
}
