//! AMQP transport backed by `lapin`.
//!
//! Each session is one connection plus one channel. The reply queue is
//! server-named and exclusive, consumed in auto-ack mode: replies are
//! fire-and-forget, and an unconsumed exclusive queue dies with its
//! connection, so there is nothing to redeliver.

use std::sync::Arc;

use async_trait::async_trait;
use courier_core::CONSUMER_TAG;
use courier_settings::BrokerSettings;
use futures::StreamExt;
use lapin::options::{BasicConsumeOptions, BasicPublishOptions, QueueDeclareOptions};
use lapin::types::{FieldTable, ShortString};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::errors::{Result, RpcError};
use crate::transport::{Broker, BrokerSession, Publisher, REPLY_CHANNEL_CAPACITY};
use crate::types::{Delivery, Envelope};

/// Broker backed by a RabbitMQ-compatible AMQP 0.9.1 server.
pub struct AmqpBroker {
    uri: String,
}

impl AmqpBroker {
    /// Build a broker from connection settings.
    #[must_use]
    pub fn new(settings: &BrokerSettings) -> Self {
        Self {
            uri: settings.amqp_uri(),
        }
    }
}

#[async_trait]
impl Broker for AmqpBroker {
    async fn connect(&self) -> Result<BrokerSession> {
        let connection = Connection::connect(&self.uri, ConnectionProperties::default())
            .await
            .map_err(|e| RpcError::connection(e.to_string()))?;
        let channel = connection
            .create_channel()
            .await
            .map_err(|e| RpcError::connection(e.to_string()))?;

        // Server-named exclusive queue; it exists only as long as this
        // connection does.
        let queue = channel
            .queue_declare(
                "",
                QueueDeclareOptions {
                    exclusive: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| RpcError::connection(e.to_string()))?;
        let reply_queue = queue.name().as_str().to_owned();

        let consumer = channel
            .basic_consume(
                &reply_queue,
                CONSUMER_TAG,
                BasicConsumeOptions {
                    no_ack: true,
                    ..BasicConsumeOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| RpcError::connection(e.to_string()))?;

        debug!(%reply_queue, "declared reply queue and started consuming");

        let (tx, rx) = mpsc::channel(REPLY_CHANNEL_CAPACITY);
        let _ = tokio::spawn(pump_replies(connection, consumer, tx));

        Ok(BrokerSession {
            reply_queue,
            publisher: Arc::new(AmqpPublisher { channel }),
            replies: rx,
        })
    }
}

/// Forward consumed messages into the session's reply channel.
///
/// Owns the connection so it stays alive for the session's lifetime.
/// Dropping `tx` on exit is what signals connection loss to the router.
async fn pump_replies(
    connection: Connection,
    mut consumer: Consumer,
    tx: mpsc::Sender<Delivery>,
) {
    while let Some(next) = consumer.next().await {
        match next {
            Ok(message) => {
                let correlation_id = message
                    .properties
                    .correlation_id()
                    .as_ref()
                    .map(|s| s.as_str().to_owned());
                let delivery = Delivery {
                    correlation_id,
                    body: message.data,
                };
                if tx.send(delivery).await.is_err() {
                    // Session was torn down on the client side.
                    break;
                }
            }
            Err(error) => {
                warn!(%error, "reply consumer failed");
                break;
            }
        }
    }
    debug!("reply consumer finished");
    drop(connection);
}

struct AmqpPublisher {
    channel: Channel,
}

#[async_trait]
impl Publisher for AmqpPublisher {
    async fn publish(&self, envelope: Envelope) -> Result<()> {
        let Envelope {
            body,
            destination,
            correlation_id,
            reply_to,
            content_type,
        } = envelope;
        let properties = BasicProperties::default()
            .with_content_type(ShortString::from(content_type.to_owned()))
            .with_correlation_id(ShortString::from(correlation_id.into_inner()))
            .with_reply_to(ShortString::from(reply_to));

        // Default exchange: the routing key is the destination queue name.
        let confirm = self
            .channel
            .basic_publish(
                "",
                &destination,
                BasicPublishOptions::default(),
                &body,
                properties,
            )
            .await
            .map_err(|e| RpcError::connection(e.to_string()))?;
        let _ = confirm
            .await
            .map_err(|e| RpcError::connection(e.to_string()))?;
        Ok(())
    }
}
