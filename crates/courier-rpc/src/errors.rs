//! RPC error taxonomy.
//!
//! Transport-level failures abort exactly the call they belong to and are
//! surfaced to its caller. A well-formed reply reporting failure is NOT an
//! error here: it comes back as [`RpcOutcome::Error`](crate::RpcOutcome)
//! and callers branch on the outcome.

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by [`RpcClient::call`](crate::RpcClient::call).
#[derive(Debug, Error)]
pub enum RpcError {
    /// Broker unreachable, credentials rejected, or connection lost
    /// mid-flight. Not retried internally; retry policy belongs to the
    /// caller.
    #[error("broker connection error: {0}")]
    Connection(String),

    /// No matching reply arrived within the deadline.
    #[error("no reply from {destination} after {elapsed:?}")]
    Timeout {
        /// Routing key the request was published to.
        destination: String,
        /// Wall time spent waiting.
        elapsed: Duration,
    },

    /// A reply matched this call but its body was not parseable as the
    /// expected JSON shape. Confined to the one call that owned the reply.
    #[error("malformed reply payload: {0}")]
    Protocol(String),

    /// The request body could not be encoded to JSON.
    #[error("failed to encode request body: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl RpcError {
    /// Shorthand for a [`RpcError::Connection`] with a message.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    /// The canonical error for a call whose connection died under it.
    #[must_use]
    pub fn connection_lost() -> Self {
        Self::Connection("connection lost".to_owned())
    }
}

/// Result type for RPC operations.
pub type Result<T> = std::result::Result<T, RpcError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_display() {
        let err = RpcError::connection("refused");
        assert_eq!(err.to_string(), "broker connection error: refused");
    }

    #[test]
    fn connection_lost_display() {
        let err = RpcError::connection_lost();
        assert!(err.to_string().contains("connection lost"));
    }

    #[test]
    fn timeout_names_destination_and_elapsed() {
        let err = RpcError::Timeout {
            destination: "rpc_task_search".to_owned(),
            elapsed: Duration::from_secs(10),
        };
        let text = err.to_string();
        assert!(text.contains("rpc_task_search"));
        assert!(text.contains("10s"));
    }

    #[test]
    fn serialize_from_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{bad").unwrap_err();
        let err: RpcError = json_err.into();
        assert!(matches!(err, RpcError::Serialize(_)));
    }
}
