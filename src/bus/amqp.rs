//! AMQP (RabbitMQ) broker backend.
//!
//! Publishes through the default exchange with the queue name as routing key.
//! Channels used for publishing run in confirm mode, so a publish only
//! returns once the broker has taken responsibility for the message.

use async_trait::async_trait;
use futures::StreamExt;
use lapin::{
    acker::Acker,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
        BasicRejectOptions, ConfirmSelectOptions, QueueDeclareOptions,
    },
    types::FieldTable,
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use tracing::{debug, error, info};

use super::{
    Acknowledger, BrokerChannel, BrokerSession, BusError, ConsumedMessage, Connector,
    DeliveryStream, Result, CONTENT_TYPE_JSON, PREFETCH_COUNT,
};
use crate::config::BrokerConfig;

/// AMQP reply code for a normal close.
const REPLY_SUCCESS: u16 = 200;

/// Persistent delivery mode.
const DELIVERY_MODE_PERSISTENT: u8 = 2;

/// Opens lapin connections to RabbitMQ.
#[derive(Clone)]
pub struct AmqpConnector {
    url: String,
    endpoint: String,
}

impl AmqpConnector {
    /// `endpoint` is what shows up in logs; keep credentials out of it.
    pub fn new(url: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            endpoint: endpoint.into(),
        }
    }

    pub fn from_config(config: &BrokerConfig) -> Self {
        Self::new(config.url(), config.redacted_url())
    }
}

#[async_trait]
impl Connector for AmqpConnector {
    async fn connect(&self) -> Result<Box<dyn BrokerSession>> {
        let connection = Connection::connect(&self.url, ConnectionProperties::default())
            .await
            .map_err(|e| {
                BusError::Connection(format!("Failed to connect to {}: {}", self.endpoint, e))
            })?;

        let endpoint = self.endpoint.clone();
        connection.on_error(move |e| {
            error!(endpoint = %endpoint, error = %e, "AMQP connection error");
        });

        info!(endpoint = %self.endpoint, "Connected to AMQP");
        Ok(Box::new(AmqpSession { connection }))
    }

    fn endpoint(&self) -> String {
        self.endpoint.clone()
    }
}

struct AmqpSession {
    connection: Connection,
}

#[async_trait]
impl BrokerSession for AmqpSession {
    fn is_connected(&self) -> bool {
        self.connection.status().connected()
    }

    async fn open_channel(&self) -> Result<Box<dyn BrokerChannel>> {
        let channel = self
            .connection
            .create_channel()
            .await
            .map_err(|e| BusError::Channel(format!("Failed to create channel: {}", e)))?;

        Ok(Box::new(AmqpChannel {
            channel,
            confirms: tokio::sync::OnceCell::new(),
        }))
    }

    async fn close(&self) -> Result<()> {
        if !self.connection.status().connected() {
            return Ok(());
        }
        self.connection
            .close(REPLY_SUCCESS, "closing")
            .await
            .map_err(|e| BusError::Connection(format!("Failed to close connection: {}", e)))
    }
}

struct AmqpChannel {
    channel: Channel,
    /// Set once confirm mode is on. Only publishing channels need it.
    confirms: tokio::sync::OnceCell<()>,
}

impl AmqpChannel {
    async fn enable_confirms(&self) -> Result<()> {
        self.confirms
            .get_or_try_init(|| async {
                self.channel
                    .confirm_select(ConfirmSelectOptions::default())
                    .await
                    .map_err(|e| BusError::Channel(format!("Failed to enable confirms: {}", e)))
            })
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl BrokerChannel for AmqpChannel {
    async fn declare_queue(&self, queue: &str) -> Result<()> {
        self.channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BusError::Declare(format!("Failed to declare queue {}: {}", queue, e)))?;

        debug!(queue = %queue, "Declared durable queue");
        Ok(())
    }

    async fn publish_persistent(&self, queue: &str, payload: &[u8]) -> Result<()> {
        self.enable_confirms().await?;

        let properties = BasicProperties::default()
            .with_content_type(CONTENT_TYPE_JSON.into())
            .with_delivery_mode(DELIVERY_MODE_PERSISTENT);

        let confirmation = self
            .channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                payload,
                properties,
            )
            .await
            .map_err(|e| BusError::Publish(format!("Failed to publish: {}", e)))?
            .await
            .map_err(|e| BusError::Publish(format!("Publish confirmation failed: {}", e)))?;

        if confirmation.is_nack() {
            return Err(BusError::Publish(
                "Broker rejected the message".to_string(),
            ));
        }

        debug!(queue = %queue, bytes = payload.len(), "Published message");
        Ok(())
    }

    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream> {
        self.channel
            .basic_qos(PREFETCH_COUNT, BasicQosOptions::default())
            .await
            .map_err(|e| BusError::Subscribe(format!("Failed to set prefetch: {}", e)))?;

        let consumer = self
            .channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| BusError::Subscribe(format!("Failed to start consumer: {}", e)))?;

        let deliveries = consumer.map(|delivery| {
            let delivery = delivery
                .map_err(|e| BusError::Subscribe(format!("Consumer delivery error: {}", e)))?;
            let redelivered = delivery.redelivered;
            Ok(ConsumedMessage::new(
                delivery.data,
                redelivered,
                Box::new(AmqpAcker {
                    acker: delivery.acker,
                }),
            ))
        });

        Ok(Box::pin(deliveries))
    }

    async fn close(&self) -> Result<()> {
        if !self.channel.status().connected() {
            return Ok(());
        }
        self.channel
            .close(REPLY_SUCCESS, "closing")
            .await
            .map_err(|e| BusError::Channel(format!("Failed to close channel: {}", e)))
    }
}

struct AmqpAcker {
    acker: Acker,
}

#[async_trait]
impl Acknowledger for AmqpAcker {
    async fn ack(&self) -> Result<()> {
        self.acker
            .ack(BasicAckOptions::default())
            .await
            .map_err(|e| BusError::Settle(format!("Failed to ack: {}", e)))
    }

    async fn requeue(&self) -> Result<()> {
        self.acker
            .reject(BasicRejectOptions { requeue: true })
            .await
            .map_err(|e| BusError::Settle(format!("Failed to reject: {}", e)))
    }
}
