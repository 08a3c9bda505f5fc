//! Playback event publisher.
//!
//! Publishes each verified playback start to the durable playback queue.
//! Delivery is at-least-once: a caller that retries after an ambiguous
//! failure may produce a duplicate event. Consumers must tolerate that.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{BrokerChannel, BrokerConnectionManager, PLAYBACK_QUEUE};
use crate::playback::PlaybackEvent;

/// Why a publish did not happen (or may not have happened).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PublishError {
    /// No usable connection. Nothing was sent.
    #[error("Broker connection unavailable")]
    BrokerUnavailable,

    /// Channel open, declare or publish failed. The event may or may not be stored.
    #[error("Failed to publish playback event: {0}")]
    Failed(String),
}

/// Sends playback events to the broker.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &PlaybackEvent) -> Result<(), PublishError>;
}

/// Publisher backed by the process-wide broker connection.
pub struct PlaybackPublisher {
    connection: Arc<BrokerConnectionManager>,
    queue: String,
}

impl PlaybackPublisher {
    pub fn new(connection: Arc<BrokerConnectionManager>) -> Self {
        Self {
            connection,
            queue: PLAYBACK_QUEUE.to_string(),
        }
    }

    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    async fn publish_on(
        &self,
        channel: &dyn BrokerChannel,
        event: &PlaybackEvent,
    ) -> Result<(), PublishError> {
        channel
            .declare_queue(&self.queue)
            .await
            .map_err(|e| PublishError::Failed(e.to_string()))?;

        let payload = event
            .encode()
            .map_err(|e| PublishError::Failed(format!("Failed to encode event: {}", e)))?;

        channel
            .publish_persistent(&self.queue, &payload)
            .await
            .map_err(|e| PublishError::Failed(e.to_string()))
    }
}

#[async_trait]
impl EventPublisher for PlaybackPublisher {
    #[tracing::instrument(
        name = "bus.publish",
        skip_all,
        fields(user_id = event.user_id(), movie_id = %event.movie_id())
    )]
    async fn publish(&self, event: &PlaybackEvent) -> Result<(), PublishError> {
        let Some(session) = self.connection.current().await else {
            warn!(queue = %self.queue, "Broker connection unavailable, event not published");
            return Err(PublishError::BrokerUnavailable);
        };

        let channel = session.open_channel().await.map_err(|e| {
            warn!(error = %e, "Failed to open publish channel");
            PublishError::Failed(e.to_string())
        })?;

        let result = self.publish_on(channel.as_ref(), event).await;
        if let Err(e) = channel.close().await {
            debug!(error = %e, "Failed to close publish channel");
        }

        match &result {
            Ok(()) => info!(queue = %self.queue, "Published playback event"),
            Err(e) => warn!(queue = %self.queue, error = %e, "Playback event publish failed"),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InMemoryBroker;
    use crate::orchestration::VerifiedRequest;
    use crate::playback::PlaybackStartRequest;

    fn event(user_id: i64, movie_id: &str) -> PlaybackEvent {
        PlaybackEvent::from(VerifiedRequest::for_test(PlaybackStartRequest::new(
            user_id, movie_id,
        )))
    }

    fn publisher(broker: &InMemoryBroker) -> (PlaybackPublisher, Arc<BrokerConnectionManager>) {
        let connection = Arc::new(BrokerConnectionManager::new(Arc::new(broker.clone())));
        (PlaybackPublisher::new(Arc::clone(&connection)), connection)
    }

    #[tokio::test]
    async fn test_unusable_connection_touches_nothing() {
        let broker = InMemoryBroker::new();
        let (publisher, _connection) = publisher(&broker);

        let result = publisher.publish(&event(1, "tt0110912")).await;

        assert_eq!(result, Err(PublishError::BrokerUnavailable));
        let stats = broker.stats().await;
        assert_eq!(stats.channels_opened, 0);
        assert_eq!(stats.queue_declares, 0);
        assert_eq!(stats.publishes, 0);
    }

    #[tokio::test]
    async fn test_dropped_connection_is_unavailable() {
        let broker = InMemoryBroker::new();
        let (publisher, connection) = publisher(&broker);
        connection.connect().await.unwrap();
        broker.sever_connections().await;

        let result = publisher.publish(&event(1, "tt0110912")).await;

        assert_eq!(result, Err(PublishError::BrokerUnavailable));
        assert_eq!(broker.stats().await.channels_opened, 0);
    }

    #[tokio::test]
    async fn test_publish_declares_durable_queue_and_persists() {
        let broker = InMemoryBroker::new();
        let (publisher, connection) = publisher(&broker);
        connection.connect().await.unwrap();

        publisher.publish(&event(1, "tt0110912")).await.unwrap();

        assert!(broker.is_declared(PLAYBACK_QUEUE).await);
        let published = broker.published().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].queue, PLAYBACK_QUEUE);
        assert!(published[0].persistent);
        assert_eq!(
            PlaybackEvent::decode(&published[0].body).unwrap(),
            event(1, "tt0110912")
        );
    }

    #[tokio::test]
    async fn test_broker_error_is_surfaced_as_failed() {
        let broker = InMemoryBroker::new();
        broker.set_fail_on_publish(true).await;
        let (publisher, connection) = publisher(&broker);
        connection.connect().await.unwrap();

        let result = publisher.publish(&event(7, "tt0133093")).await;

        assert!(matches!(result, Err(PublishError::Failed(_))));
        assert_eq!(broker.queue_depth(PLAYBACK_QUEUE).await, 0);
    }

    #[tokio::test]
    async fn test_custom_queue_name() {
        let broker = InMemoryBroker::new();
        let connection = Arc::new(BrokerConnectionManager::new(Arc::new(broker.clone())));
        let publisher = PlaybackPublisher::new(Arc::clone(&connection)).with_queue("replay");
        connection.connect().await.unwrap();

        publisher.publish(&event(1, "tt1")).await.unwrap();

        assert_eq!(broker.queue_depth("replay").await, 1);
        assert_eq!(broker.queue_depth(PLAYBACK_QUEUE).await, 0);
    }
}
