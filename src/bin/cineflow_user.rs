//! cineflow-user: user registry and playback event consumer
//!
//! Serves the user registry over HTTP and consumes the playback_events
//! queue in the background, recording each playback start per user.
//!
//! ## Configuration
//! - RABBITMQ_HOST / RABBITMQ_USER / RABBITMQ_PASS: broker credentials
//! - PORT: HTTP port (default 8000)

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info};

use cineflow::bus::{AmqpConnector, BrokerConnectionManager, PlaybackConsumer};
use cineflow::config::Config;
use cineflow::handlers::{user_router, UserState};
use cineflow::services::{InMemoryUserStore, PlaybackHistory, PlaybackRecorder};
use cineflow::utils::bootstrap::{init_tracing, parse_config_path, shutdown_signal};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config_path = parse_config_path();
    let config = Config::load(config_path.as_deref()).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!("Starting cineflow-user");

    let connection = Arc::new(
        BrokerConnectionManager::new(Arc::new(AmqpConnector::from_config(&config.broker)))
            .with_retry_delay(config.broker.retry_delay()),
    );

    let history = PlaybackHistory::new();
    let consumer = Arc::new(
        PlaybackConsumer::new(
            Arc::clone(&connection),
            Arc::new(PlaybackRecorder::new(history.clone())),
        )
        .with_queue(&config.broker.queue),
    );

    let state = UserState {
        store: Arc::new(InMemoryUserStore::new()),
        history,
    };
    let app = user_router(state);
    let listener = TcpListener::bind(config.server.bind_address()).await?;
    info!(address = %config.server.bind_address(), "User service listening");

    // Nothing fallible between starting the consumer and entering the scope.
    let consumer_task = consumer.spawn();
    connection
        .scoped(async {
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await
        })
        .await?;

    if let Err(e) = consumer_task.await {
        error!(error = %e, "Playback consumer task failed");
    }

    info!("User service stopped");
    Ok(())
}
