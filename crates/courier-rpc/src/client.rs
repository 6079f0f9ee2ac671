//! The RPC client: dispatch, response routing, and connection management.
//!
//! One client owns one broker connection, one private reply queue, one
//! router task, and one table of in-flight calls. Any number of tasks may
//! call concurrently; replies are demultiplexed by correlation token.
//!
//! Connections are established lazily and re-established on the next call
//! after a loss. Calls in flight when the connection dies all fail with a
//! connection error; nothing is retried on the caller's behalf.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use courier_core::{CorrelationId, DEFAULT_RPC_TIMEOUT_SECS};
use courier_settings::BrokerSettings;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::amqp::AmqpBroker;
use crate::errors::{Result, RpcError};
use crate::pending::PendingCalls;
use crate::transport::{Broker, Publisher};
use crate::types::{Delivery, Envelope, RpcResponse};

struct Session {
    reply_queue: String,
    publisher: Arc<dyn Publisher>,
    lost: Arc<AtomicBool>,
    router: JoinHandle<()>,
}

/// Asynchronous RPC client over a shared message broker.
pub struct RpcClient {
    broker: Arc<dyn Broker>,
    default_timeout: Duration,
    pending: Arc<PendingCalls>,
    session: tokio::sync::Mutex<Option<Session>>,
}

impl RpcClient {
    /// Create a client over any transport. No connection is opened until
    /// the first call.
    #[must_use]
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self {
            broker,
            default_timeout: Duration::from_secs(DEFAULT_RPC_TIMEOUT_SECS),
            pending: Arc::new(PendingCalls::new()),
            session: tokio::sync::Mutex::new(None),
        }
    }

    /// Create a client over AMQP, with the per-call timeout taken from
    /// the broker settings.
    #[must_use]
    pub fn amqp(settings: &BrokerSettings) -> Self {
        Self::new(Arc::new(AmqpBroker::new(settings)))
            .with_default_timeout(Duration::from_secs(settings.rpc_timeout_secs))
    }

    /// Override the timeout applied by [`RpcClient::call`].
    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Number of calls currently awaiting a reply.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Issue a request and wait for its correlated reply, using the
    /// client's default timeout.
    ///
    /// # Errors
    ///
    /// See [`RpcError`]. A reply that arrived intact but reports domain
    /// failure is an `Ok` response with an error outcome, not an `Err`.
    pub async fn call<T>(&self, destination: &str, request: &T) -> Result<RpcResponse>
    where
        T: Serialize + Sync + ?Sized,
    {
        self.call_with_timeout(destination, request, self.default_timeout)
            .await
    }

    /// Issue a request with an explicit per-call timeout.
    pub async fn call_with_timeout<T>(
        &self,
        destination: &str,
        request: &T,
        timeout: Duration,
    ) -> Result<RpcResponse>
    where
        T: Serialize + Sync + ?Sized,
    {
        // Encode before touching the connection or the table: a body that
        // cannot serialize must leave no trace.
        let body = serde_json::to_vec(request)?;

        let (reply_queue, publisher) = self.ensure_connected().await?;

        let token = CorrelationId::new();
        let (tx, mut rx) = tokio::sync::oneshot::channel();
        let deadline = Instant::now() + timeout;
        // Registration precedes publish so the router can never see a
        // reply for an unknown token of ours.
        self.pending
            .register(token.clone(), tx, deadline.into_std());

        let envelope = Envelope::new(body, destination, token.clone(), reply_queue);
        if let Err(error) = publisher.publish(envelope).await {
            let _ = self.pending.expire(&token);
            return Err(error);
        }

        tokio::select! {
            outcome = &mut rx => match outcome {
                Ok(payload) => RpcResponse::from_payload(&payload),
                // Sender dropped without a payload: the connection died.
                Err(_) => Err(RpcError::connection_lost()),
            },
            () = tokio::time::sleep_until(deadline) => {
                if self.pending.expire(&token) {
                    Err(RpcError::Timeout {
                        destination: destination.to_owned(),
                        elapsed: timeout,
                    })
                } else {
                    // A resolution beat the expiry; take its payload.
                    match rx.await {
                        Ok(payload) => RpcResponse::from_payload(&payload),
                        Err(_) => Err(RpcError::connection_lost()),
                    }
                }
            }
        }
    }

    /// Return a usable publisher, connecting or reconnecting as needed.
    ///
    /// Serialized on the session lock so concurrent first calls share one
    /// connection attempt rather than racing to open several.
    async fn ensure_connected(&self) -> Result<(String, Arc<dyn Publisher>)> {
        let mut guard = self.session.lock().await;

        if let Some(session) = guard.as_ref() {
            if !session.lost.load(Ordering::SeqCst) {
                return Ok((session.reply_queue.clone(), Arc::clone(&session.publisher)));
            }
            // The router has already failed the old in-flight calls.
            debug!("connection marked lost, reconnecting");
            session.router.abort();
        }
        *guard = None;

        let session = self.broker.connect().await?;
        let lost = Arc::new(AtomicBool::new(false));
        let router = tokio::spawn(route_replies(
            session.replies,
            Arc::clone(&self.pending),
            Arc::clone(&lost),
        ));

        let reply_queue = session.reply_queue.clone();
        let publisher = Arc::clone(&session.publisher);
        *guard = Some(Session {
            reply_queue: session.reply_queue,
            publisher: session.publisher,
            lost,
            router,
        });
        Ok((reply_queue, publisher))
    }
}

/// Demultiplex deliveries from one connection's reply queue.
///
/// Touches only message metadata, so no body content can take it down.
/// When the reply channel closes the connection is gone, and every call
/// still in the table is failed.
async fn route_replies(
    mut replies: mpsc::Receiver<Delivery>,
    pending: Arc<PendingCalls>,
    lost: Arc<AtomicBool>,
) {
    while let Some(delivery) = replies.recv().await {
        match delivery.correlation_id {
            Some(id) => {
                let token = CorrelationId::from_string(id);
                if !pending.resolve(&token, delivery.body) {
                    debug!(%token, "discarding reply with no matching call");
                }
            }
            None => debug!("discarding reply without a correlation token"),
        }
    }

    lost.store(true, Ordering::SeqCst);
    let failed = pending.fail_all();
    if failed > 0 {
        warn!(failed, "broker connection lost with calls in flight");
    } else {
        debug!("broker connection lost");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBroker;
    use crate::types::RpcOutcome;
    use serde_json::json;

    fn client(broker: &MemoryBroker) -> RpcClient {
        RpcClient::new(Arc::new(broker.clone()))
            .with_default_timeout(Duration::from_millis(200))
    }

    #[tokio::test]
    async fn call_round_trips_through_echo() {
        let broker = MemoryBroker::new();
        broker.bind_echo("rpc_echo");
        let client = client(&broker);

        let response = client
            .call("rpc_echo", &json!({"action": "ping"}))
            .await
            .unwrap();
        assert_eq!(
            response.outcome,
            RpcOutcome::Success(json!({"action": "ping"}))
        );
        assert_eq!(client.in_flight(), 0);
    }

    #[tokio::test]
    async fn unanswered_call_times_out_and_cleans_up() {
        let broker = MemoryBroker::new();
        let client = client(&broker);

        let err = client
            .call("rpc_silent", &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Timeout { ref destination, .. }
            if destination == "rpc_silent"));
        assert_eq!(client.in_flight(), 0);
    }

    #[tokio::test]
    async fn envelope_carries_reply_queue_and_content_type() {
        let broker = MemoryBroker::new();
        broker.bind_echo("rpc_echo");
        let client = client(&broker);
        let _ = client.call("rpc_echo", &json!({})).await.unwrap();

        let published = broker.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].content_type, "application/json");
        assert!(published[0].reply_to.starts_with("mem.gen-"));
    }

    #[tokio::test]
    async fn serialize_failure_leaves_no_pending_entry() {
        let broker = MemoryBroker::new();
        let client = client(&broker);

        // Non-string map keys are not representable in JSON.
        let mut unrepresentable = std::collections::HashMap::new();
        let _ = unrepresentable.insert(vec![1u8], 1);
        let err = client.call("rpc_echo", &unrepresentable).await.unwrap_err();
        assert!(matches!(err, RpcError::Serialize(_)));
        assert_eq!(client.in_flight(), 0);
        assert!(broker.published().is_empty());
    }

    #[tokio::test]
    async fn publish_failure_surfaces_and_cleans_up() {
        let broker = MemoryBroker::new();
        let client = client(&broker);
        // Open the connection, then kill it so the next publish fails.
        let _ = client.call("rpc_warmup", &json!({})).await;
        broker.drop_connections();
        // Give the router a moment to observe the closed channel.
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Reconnect happens lazily and yields a live session again.
        broker.bind_echo("rpc_echo");
        let response = client.call("rpc_echo", &json!({"ok": 1})).await.unwrap();
        assert!(response.is_success());
        assert_eq!(client.in_flight(), 0);
    }
}
