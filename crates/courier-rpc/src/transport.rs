//! Broker abstraction.
//!
//! The RPC client only ever talks to these traits. The real AMQP
//! implementation lives in [`crate::amqp`]; tests and single-process
//! deployments use [`crate::memory`].

use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::Result;
use crate::types::{Delivery, Envelope};

/// Buffer between the broker consumer and the response router. The router
/// drains continuously, so this only has to absorb short bursts.
pub const REPLY_CHANNEL_CAPACITY: usize = 64;

/// A broker that can open fresh sessions.
///
/// `connect` is called once up front and again after a connection loss, so
/// it must be repeatable: each call yields an independent session with its
/// own exclusive reply queue.
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    /// Open a connection, declare a private reply queue, and start
    /// consuming from it.
    async fn connect(&self) -> Result<BrokerSession>;
}

/// Outbound half of a session.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish one request to its destination routing key.
    async fn publish(&self, envelope: Envelope) -> Result<()>;
}

/// One live connection to the broker.
///
/// Connection loss is signaled by `replies` closing: the consumer task
/// drops its sender when the transport dies, and the router observes the
/// closed channel.
pub struct BrokerSession {
    /// Server-assigned name of the exclusive reply queue.
    pub reply_queue: String,
    /// Handle for publishing requests on this connection.
    pub publisher: Arc<dyn Publisher>,
    /// Stream of messages consumed from the reply queue.
    pub replies: tokio::sync::mpsc::Receiver<Delivery>,
}
