//! Broker plumbing for the playback-event pipeline.
//!
//! This module contains:
//! - `Connector` / `BrokerSession` / `BrokerChannel`: the seams a broker backend implements
//! - `ConsumedMessage`: a delivery whose ownership forces exactly one ack or requeue
//! - `BrokerConnectionManager`: single long-lived connection with unbounded reconnect
//! - `PlaybackPublisher`: durable publish of playback events
//! - `PlaybackConsumer`: perpetual receive loop with ack/requeue
//! - Implementations: AMQP (RabbitMQ), in-memory mock

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;

// Implementation modules
#[cfg(feature = "amqp")]
pub mod amqp;
pub mod connection;
pub mod consumer;
pub mod mock;
pub mod publisher;

// Re-exports
#[cfg(feature = "amqp")]
pub use amqp::AmqpConnector;
pub use connection::{BrokerConnectionManager, ConnectionState};
pub use consumer::{ConsumerState, EventHandler, PlaybackConsumer, ProcessingError, Settlement};
pub use mock::InMemoryBroker;
pub use publisher::{EventPublisher, PlaybackPublisher, PublishError};

/// Durable queue shared by the streaming (producer) and user (consumer) services.
pub const PLAYBACK_QUEUE: &str = "playback_events";

/// Fixed delay between reconnect attempts.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Pause after a message is requeued, before the next delivery is taken.
pub const REQUEUE_DELAY: Duration = Duration::from_secs(1);

/// Deliveries buffered ahead of the one being handled.
pub const PREFETCH_COUNT: u16 = 10;

/// Content type set on every published message.
pub const CONTENT_TYPE_JSON: &str = "application/json";

// ============================================================================
// Traits
// ============================================================================

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors that can occur during broker operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Channel failed: {0}")]
    Channel(String),

    #[error("Queue declare failed: {0}")]
    Declare(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    #[error("Settle failed: {0}")]
    Settle(String),

    #[error("Connection manager is shutting down")]
    ShuttingDown,
}

/// Establishes broker connections.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Make a single connection attempt.
    async fn connect(&self) -> Result<Box<dyn BrokerSession>>;

    /// Endpoint description for logs. Must not contain credentials.
    fn endpoint(&self) -> String;
}

/// An open broker connection.
#[async_trait]
pub trait BrokerSession: Send + Sync {
    /// Re-probe the underlying connection. May flip to false at any time.
    fn is_connected(&self) -> bool;

    async fn open_channel(&self) -> Result<Box<dyn BrokerChannel>>;

    async fn close(&self) -> Result<()>;
}

/// A channel on an open connection.
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Declare a durable queue. Safe to repeat.
    async fn declare_queue(&self, queue: &str) -> Result<()>;

    /// Publish to `queue` through the default exchange with persistent delivery.
    async fn publish_persistent(&self, queue: &str, payload: &[u8]) -> Result<()>;

    /// Start consuming `queue` with a prefetch of [`PREFETCH_COUNT`].
    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream>;

    async fn close(&self) -> Result<()>;
}

/// Stream of deliveries. An `Err` item means the connection or channel faulted.
pub type DeliveryStream = BoxStream<'static, Result<ConsumedMessage>>;

/// Settles one delivery on the broker.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self) -> Result<()>;

    /// Reject the delivery and put it back on the queue.
    async fn requeue(&self) -> Result<()>;
}

/// A received message plus the handle that settles it.
///
/// `ack` and `requeue` take `self`, so a message is settled at most once.
pub struct ConsumedMessage {
    body: Vec<u8>,
    redelivered: bool,
    acker: Box<dyn Acknowledger>,
}

impl ConsumedMessage {
    pub fn new(body: Vec<u8>, redelivered: bool, acker: Box<dyn Acknowledger>) -> Self {
        Self {
            body,
            redelivered,
            acker,
        }
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// True when the broker has delivered this message before.
    pub fn redelivered(&self) -> bool {
        self.redelivered
    }

    /// Remove the message from the queue permanently.
    pub async fn ack(self) -> Result<()> {
        self.acker.ack().await
    }

    /// Return the message to the queue for redelivery.
    pub async fn requeue(self) -> Result<()> {
        self.acker.requeue().await
    }
}

impl fmt::Debug for ConsumedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumedMessage")
            .field("len", &self.body.len())
            .field("redelivered", &self.redelivered)
            .finish()
    }
}
