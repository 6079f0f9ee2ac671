//! Wire-format types for broker RPC.
//!
//! Every request crosses the broker as an [`Envelope`]; every inbound
//! message on the private reply queue arrives as a [`Delivery`]. Reply
//! bodies carry their own status field, decoded once at the boundary into
//! an [`RpcResponse`].

use courier_core::{CONTENT_TYPE_JSON, CorrelationId};
use serde_json::Value;

use crate::errors::RpcError;

/// The unit published to the broker. Immutable once constructed.
#[derive(Clone, Debug)]
pub struct Envelope {
    /// UTF-8 JSON request body.
    pub body: Vec<u8>,
    /// Routing key the broker uses to pick a worker.
    pub destination: String,
    /// Token the reply must echo in its metadata.
    pub correlation_id: CorrelationId,
    /// Name of this client's private reply queue.
    pub reply_to: String,
    /// Always `application/json`.
    pub content_type: &'static str,
}

impl Envelope {
    /// Build an envelope for a serialized body.
    #[must_use]
    pub fn new(
        body: Vec<u8>,
        destination: impl Into<String>,
        correlation_id: CorrelationId,
        reply_to: impl Into<String>,
    ) -> Self {
        Self {
            body,
            destination: destination.into(),
            correlation_id,
            reply_to: reply_to.into(),
            content_type: CONTENT_TYPE_JSON,
        }
    }

    /// Parse the body back into JSON (used by in-process responders).
    pub fn body_json(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// A message consumed from the private reply queue.
#[derive(Clone, Debug)]
pub struct Delivery {
    /// Correlation token from the message metadata, if present.
    pub correlation_id: Option<String>,
    /// Raw message body.
    pub body: Vec<u8>,
}

/// Domain-level outcome of a call, read from the reply's own status field.
///
/// Independent of transport success: a reply that arrived fine but says
/// `success: false` is an `Error` outcome, returned normally rather than
/// raised.
#[derive(Clone, Debug, PartialEq)]
pub enum RpcOutcome {
    /// Reply reported `success: true`; carries its `response` value.
    Success(Value),
    /// Reply reported failure; carries its `error` message.
    Error(String),
}

/// A decoded reply.
#[derive(Clone, Debug)]
pub struct RpcResponse {
    /// Parsed domain outcome.
    pub outcome: RpcOutcome,
    /// The full reply object, for decoders whose fields sit beside the
    /// status field rather than under `response`.
    pub raw: Value,
}

impl RpcResponse {
    /// Decode a reply payload of shape
    /// `{"success": bool, "response"?: any, "error"?: string}`.
    ///
    /// # Errors
    ///
    /// [`RpcError::Protocol`] if the payload is not valid JSON.
    pub fn from_payload(payload: &[u8]) -> Result<Self, RpcError> {
        let raw: Value =
            serde_json::from_slice(payload).map_err(|e| RpcError::Protocol(e.to_string()))?;
        let outcome = if raw.get("success").and_then(Value::as_bool) == Some(true) {
            RpcOutcome::Success(raw.get("response").cloned().unwrap_or(Value::Null))
        } else {
            let message = raw
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_owned();
            RpcOutcome::Error(message)
        };
        Ok(Self { outcome, raw })
    }

    /// Whether the reply reported success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, RpcOutcome::Success(_))
    }

    /// The `response` value, when successful.
    #[must_use]
    pub fn success_value(&self) -> Option<&Value> {
        match &self.outcome {
            RpcOutcome::Success(value) => Some(value),
            RpcOutcome::Error(_) => None,
        }
    }

    /// The `error` message, when failed.
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        match &self.outcome {
            RpcOutcome::Success(_) => None,
            RpcOutcome::Error(message) => Some(message),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
