//! In-memory broker for tests and single-process deployments.
//!
//! Implements the same session contract as the AMQP transport: exclusive
//! reply queues, correlation metadata carried alongside bodies, and
//! connection loss surfaced by closing the reply channel. Destinations are
//! bound to async responder closures; publishes to unbound destinations
//! are silently dropped, which is exactly how a broker with no consumer on
//! a routing key behaves, and is what timeout tests rely on.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::errors::{Result, RpcError};
use crate::transport::{Broker, BrokerSession, Publisher, REPLY_CHANNEL_CAPACITY};
use crate::types::{Delivery, Envelope};

/// Handler bound to a destination. Returns the reply body to route back,
/// or `None` to swallow the request (a worker that never answers).
pub type Responder = Arc<dyn Fn(Envelope) -> BoxFuture<'static, Option<Vec<u8>>> + Send + Sync>;

struct ConnHandle {
    reply_queue: String,
    tx: mpsc::Sender<Delivery>,
    closed: Arc<AtomicBool>,
}

#[derive(Default)]
struct Inner {
    responders: HashMap<String, Responder>,
    connections: Vec<ConnHandle>,
    published: Vec<Envelope>,
    queue_counter: AtomicU64,
}

/// A process-local broker. Cloning shares the underlying state, so a test
/// can hold one handle for assertions while the client holds another.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryBroker {
    /// Create an empty broker with no bound destinations.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a responder to a destination routing key.
    pub fn bind(&self, destination: impl Into<String>, responder: Responder) {
        let _ = self
            .inner
            .lock()
            .responders
            .insert(destination.into(), responder);
    }

    /// Bind a responder that wraps each request body in a successful reply:
    /// `{"success": true, "response": <request body as JSON>}`.
    pub fn bind_echo(&self, destination: impl Into<String>) {
        self.bind(
            destination,
            Arc::new(|envelope: Envelope| {
                Box::pin(async move {
                    let request = envelope.body_json().ok()?;
                    serde_json::to_vec(&serde_json::json!({
                        "success": true,
                        "response": request,
                    }))
                    .ok()
                })
            }),
        );
    }

    /// Push a raw delivery straight into every open reply queue, bypassing
    /// the responder machinery. Used to exercise foreign and malformed
    /// deliveries.
    pub async fn inject(&self, delivery: Delivery) {
        let senders: Vec<mpsc::Sender<Delivery>> = {
            let inner = self.inner.lock();
            inner.connections.iter().map(|c| c.tx.clone()).collect()
        };
        for tx in senders {
            let _ = tx.send(delivery.clone()).await;
        }
    }

    /// Sever every open connection.
    ///
    /// Reply channels close immediately and publishers attached to the
    /// dropped connections start failing, mirroring a broker restart.
    pub fn drop_connections(&self) {
        let dropped: Vec<ConnHandle> = {
            let mut inner = self.inner.lock();
            inner.connections.drain(..).collect()
        };
        for handle in &dropped {
            handle.closed.store(true, Ordering::SeqCst);
        }
        debug!(count = dropped.len(), "dropped in-memory connections");
    }

    /// Every envelope published so far, oldest first.
    #[must_use]
    pub fn published(&self) -> Vec<Envelope> {
        self.inner.lock().published.clone()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn connect(&self) -> Result<BrokerSession> {
        let (tx, rx) = mpsc::channel(REPLY_CHANNEL_CAPACITY);
        let closed = Arc::new(AtomicBool::new(false));
        let reply_queue = {
            let inner = self.inner.lock();
            let n = inner.queue_counter.fetch_add(1, Ordering::Relaxed);
            format!("mem.gen-{n}")
        };
        self.inner.lock().connections.push(ConnHandle {
            reply_queue: reply_queue.clone(),
            tx,
            closed: Arc::clone(&closed),
        });
        let publisher = Arc::new(MemoryPublisher {
            broker: self.inner.clone(),
            closed,
        });
        Ok(BrokerSession {
            reply_queue,
            publisher,
            replies: rx,
        })
    }
}

struct MemoryPublisher {
    broker: Arc<Mutex<Inner>>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Publisher for MemoryPublisher {
    async fn publish(&self, envelope: Envelope) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RpcError::connection_lost());
        }

        let responder = {
            let mut inner = self.broker.lock();
            inner.published.push(envelope.clone());
            inner.responders.get(&envelope.destination).cloned()
        };
        let Some(responder) = responder else {
            // No consumer on this routing key; the request goes nowhere.
            return Ok(());
        };

        let correlation_id = envelope.correlation_id.clone();
        let reply_to = envelope.reply_to.clone();
        let Some(body) = responder(envelope).await else {
            return Ok(());
        };

        // Route the reply to whichever live connection owns the queue.
        let tx = {
            let inner = self.broker.lock();
            inner
                .connections
                .iter()
                .find(|c| c.reply_queue == reply_to)
                .map(|c| c.tx.clone())
        };
        if let Some(tx) = tx {
            let _ = tx
                .send(Delivery {
                    correlation_id: Some(correlation_id.into_inner()),
                    body,
                })
                .await;
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
