//! Playback event consumer.
//!
//! A perpetual loop that attaches to the playback queue and settles one
//! message at a time:
//!
//! ```text
//! Disconnected -> Connecting -> Attached -> Receiving <-> Processing
//!       ^                                       |
//!       +------- connection fault, fixed delay -+
//! ```
//!
//! Processing failures (including undecodable bodies) requeue that single
//! message and pause briefly before the next delivery. Connection faults
//! restart the whole loop. A message that fails deterministically keeps
//! coming back, but the messages queued behind it are still handled.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{
    BrokerChannel, BrokerConnectionManager, BrokerSession, ConsumedMessage, DeliveryStream, Result,
    PLAYBACK_QUEUE, REQUEUE_DELAY,
};
use crate::playback::PlaybackEvent;

/// Where the consumer loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Disconnected,
    Connecting,
    Attached,
    Receiving,
    Processing,
}

/// How a delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Acked,
    Requeued,
    /// The ack or requeue never reached the broker. The broker redelivers the
    /// message once the channel is gone.
    Unsettled,
}

/// Failure while processing one message. Never escalated past the consumer.
#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error("Malformed playback event: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Handler '{name}' failed: {message}")]
    Handler { name: String, message: String },
}

/// Side effect run for each decoded playback event.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: PlaybackEvent)
        -> BoxFuture<'static, std::result::Result<(), ProcessingError>>;

    /// Handler name for logs.
    fn name(&self) -> &str;
}

/// Consumer of the playback queue.
pub struct PlaybackConsumer {
    connection: Arc<BrokerConnectionManager>,
    handler: Arc<dyn EventHandler>,
    queue: String,
    consumer_tag: String,
    retry_delay: Duration,
    requeue_delay: Duration,
    state: watch::Sender<ConsumerState>,
}

impl PlaybackConsumer {
    pub fn new(connection: Arc<BrokerConnectionManager>, handler: Arc<dyn EventHandler>) -> Self {
        let (state, _) = watch::channel(ConsumerState::Disconnected);
        let retry_delay = connection.retry_delay();
        Self {
            connection,
            handler,
            queue: PLAYBACK_QUEUE.to_string(),
            consumer_tag: format!("cineflow-user-{}", uuid::Uuid::new_v4()),
            retry_delay,
            requeue_delay: REQUEUE_DELAY,
            state,
        }
    }

    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    /// Delay before restarting after a connection fault.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Pause after a delivery that was not acked.
    pub fn with_requeue_delay(mut self, delay: Duration) -> Self {
        self.requeue_delay = delay;
        self
    }

    pub fn state(&self) -> ConsumerState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    /// Run the loop on a background task.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    /// Consume until the connection manager is closed.
    pub async fn run(&self) {
        info!(queue = %self.queue, handler = %self.handler.name(), "Playback consumer started");

        loop {
            self.set_state(ConsumerState::Connecting);
            let Ok(session) = self.connection.connect().await else {
                break;
            };

            match self.attach(session.as_ref()).await {
                Ok((channel, deliveries)) => {
                    self.set_state(ConsumerState::Attached);
                    info!(queue = %self.queue, "Consumer attached, waiting for messages");
                    self.receive(deliveries).await;
                    if let Err(e) = channel.close().await {
                        debug!(error = %e, "Failed to close consumer channel");
                    }
                }
                Err(e) => {
                    error!(queue = %self.queue, error = %e, "Failed to attach to queue");
                }
            }

            self.set_state(ConsumerState::Disconnected);
            if self.connection.is_shutting_down() {
                break;
            }

            self.connection.invalidate(&session).await;
            warn!(
                queue = %self.queue,
                retry_in_ms = %self.retry_delay.as_millis(),
                "Consumer disconnected, reconnecting after delay"
            );
            if !self.connection.pause(self.retry_delay).await {
                break;
            }
        }

        self.set_state(ConsumerState::Disconnected);
        info!(queue = %self.queue, "Playback consumer stopped");
    }

    /// Declare the queue and start consuming on a fresh channel.
    async fn attach(
        &self,
        session: &dyn BrokerSession,
    ) -> Result<(Box<dyn BrokerChannel>, DeliveryStream)> {
        let channel = session.open_channel().await?;
        channel.declare_queue(&self.queue).await?;
        let deliveries = channel.consume(&self.queue, &self.consumer_tag).await?;
        Ok((channel, deliveries))
    }

    /// Settle deliveries one by one until the stream faults or shutdown.
    async fn receive(&self, mut deliveries: DeliveryStream) {
        let mut shutdown = self.connection.shutdown_signal();
        if self.connection.is_shutting_down() {
            return;
        }

        self.set_state(ConsumerState::Receiving);
        loop {
            let next = tokio::select! {
                next = deliveries.next() => next,
                _ = shutdown.changed() => {
                    info!(queue = %self.queue, "Shutdown requested, leaving receive loop");
                    return;
                }
            };

            match next {
                Some(Ok(message)) => {
                    self.set_state(ConsumerState::Processing);
                    let settlement = self.process(message).await;
                    self.set_state(ConsumerState::Receiving);
                    if settlement != Settlement::Acked
                        && !self.connection.pause(self.requeue_delay).await
                    {
                        return;
                    }
                }
                Some(Err(e)) => {
                    error!(queue = %self.queue, error = %e, "Consumer delivery error, will reconnect");
                    return;
                }
                None => {
                    info!(queue = %self.queue, "Consumer stream ended, reconnecting");
                    return;
                }
            }
        }
    }

    /// Decode and handle one message, then ack it or requeue it.
    pub async fn process(&self, message: ConsumedMessage) -> Settlement {
        let redelivered = message.redelivered();
        let outcome = match PlaybackEvent::decode(message.body()) {
            Ok(event) => {
                debug!(
                    user_id = event.user_id(),
                    movie_id = %event.movie_id(),
                    redelivered,
                    "Received playback event"
                );
                self.handler.handle(event).await
            }
            Err(e) => Err(ProcessingError::from(e)),
        };

        match outcome {
            Ok(()) => match message.ack().await {
                Ok(()) => Settlement::Acked,
                Err(e) => {
                    error!(error = %e, "Failed to ack message, left unsettled");
                    Settlement::Unsettled
                }
            },
            Err(e) => {
                error!(error = %e, redelivered, "Failed to process message, requeueing");
                match message.requeue().await {
                    Ok(()) => Settlement::Requeued,
                    Err(e) => {
                        error!(error = %e, "Failed to requeue message, left unsettled");
                        Settlement::Unsettled
                    }
                }
            }
        }
    }

    fn set_state(&self, state: ConsumerState) {
        self.state.send_replace(state);
    }
}
