//! Broker configuration.

use std::time::Duration;

use serde::Deserialize;

use crate::bus::PLAYBACK_QUEUE;

/// RabbitMQ connection settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    /// Queue shared by producer and consumer.
    pub queue: String,
    /// Seconds between reconnect attempts.
    pub retry_delay_secs: u64,
}

impl BrokerConfig {
    /// AMQP URL for the default vhost.
    pub fn url(&self) -> String {
        format!(
            "amqp://{}:{}@{}:{}/%2f",
            self.user, self.password, self.host, self.port
        )
    }

    /// Same as [`url`](Self::url) with the password masked, for logs.
    pub fn redacted_url(&self) -> String {
        format!("amqp://{}:***@{}:{}/%2f", self.user, self.host, self.port)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "rabbitmq".to_string(),
            port: 5672,
            user: "guest".to_string(),
            password: "guest".to_string(),
            queue: PLAYBACK_QUEUE.to_string(),
            retry_delay_secs: 5,
        }
    }
}
