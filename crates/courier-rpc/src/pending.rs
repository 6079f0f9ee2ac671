//! Table of in-flight calls.
//!
//! The synchronization point between the dispatcher and the response
//! router. Removal and fulfillment are a single transition under the map
//! lock, so a resolve/expire race for the same token has exactly one
//! winner; the loser observes "already removed" and takes no further
//! action.

use std::collections::HashMap;
use std::time::Instant;

use courier_core::CorrelationId;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Completion handle fulfilled with the raw reply body.
pub type ReplySender = oneshot::Sender<Vec<u8>>;

struct PendingCall {
    sender: ReplySender,
    deadline: Instant,
}

/// Concurrency-safe map from correlation token to an outstanding call.
///
/// Owned by one client instance, never shared across instances. Its size
/// equals the number of calls currently in flight; entries never outlive
/// resolution, expiry, or connection loss.
#[derive(Default)]
pub struct PendingCalls {
    inner: Mutex<HashMap<CorrelationId, PendingCall>>,
}

impl PendingCalls {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry for a freshly minted token.
    ///
    /// Must happen before the corresponding publish, so a reply can never
    /// arrive while its token is unknown to the router.
    pub fn register(&self, token: CorrelationId, sender: ReplySender, deadline: Instant) {
        let previous = self.inner.lock().insert(
            token,
            PendingCall { sender, deadline },
        );
        if previous.is_some() {
            // v4 collisions do not happen in practice; a reused token is a bug.
            warn!("correlation token collision, dropping the older waiter");
        }
    }

    /// Atomically remove and fulfill the entry for `token`.
    ///
    /// Returns whether a match existed. `false` is the normal path for
    /// late, duplicate, or foreign deliveries and must not be treated as
    /// an error.
    pub fn resolve(&self, token: &CorrelationId, payload: Vec<u8>) -> bool {
        let Some(call) = self.inner.lock().remove(token) else {
            return false;
        };
        if Instant::now() > call.deadline {
            debug!(%token, "reply arrived past its deadline but before expiry");
        }
        // The waiter may have just given up; a failed send is harmless.
        let _ = call.sender.send(payload);
        true
    }

    /// Atomically remove the entry for `token` on timeout.
    ///
    /// Returns whether the entry was still present. `false` means a
    /// resolution won the race.
    pub fn expire(&self, token: &CorrelationId) -> bool {
        self.inner.lock().remove(token).is_some()
    }

    /// Drop every outstanding entry, failing all waiters.
    ///
    /// Used when the connection carrying the reply queue is lost: those
    /// replies can never arrive. Returns how many calls were failed.
    pub fn fail_all(&self) -> usize {
        let drained: Vec<PendingCall> = {
            let mut map = self.inner.lock();
            map.drain().map(|(_, call)| call).collect()
        };
        // Dropping the senders wakes the waiters with a closed-channel error.
        drained.len()
    }

    /// Number of calls currently in flight.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether no calls are in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
