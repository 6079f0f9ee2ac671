//! Typed verbs over the orchestrator's RPC workers.
//!
//! Each verb is a pure translation: build a JSON body, publish to a fixed
//! destination, decode the reply into a typed result. No state and no
//! concurrency of its own; everything rides on [`RpcClient`].
//!
//! Several workers answer with their result fields beside the status
//! field rather than under `response`, so decoders here read from the
//! full reply object.

use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use courier_core::{CallbackUuid, PayloadUuid, TaskId};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

use crate::client::RpcClient;
use crate::errors::RpcError;
use crate::types::RpcOutcome;

// ── Destinations ────────────────────────────────────────────────────

/// Worker that registers a new callback.
pub const CALLBACK_CREATE: &str = "rpc_callback_create";
/// Worker that processes nested agent messages.
pub const HANDLE_AGENT_JSON: &str = "rpc_handle_agent_json";
/// Worker that searches tasks for a callback.
pub const TASK_SEARCH: &str = "rpc_task_search";
/// Worker that records a routing edge between callbacks.
pub const CALLBACK_ADD_ROUTE: &str = "rpc_callback_add_route";
/// Worker that encrypts bytes with a callback's key material.
pub const CALLBACK_ENCRYPT_BYTES: &str = "rpc_callback_encrypt_bytes";
/// Worker that decrypts bytes with a callback's key material.
pub const CALLBACK_DECRYPT_BYTES: &str = "rpc_callback_decrypt_bytes";

// ── Errors ──────────────────────────────────────────────────────────

/// Errors surfaced by the orchestrator verbs.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The underlying call failed in transport.
    #[error(transparent)]
    Rpc(#[from] RpcError),
    /// The orchestrator answered but refused the request.
    #[error("orchestrator rejected the request: {0}")]
    Rejected(String),
    /// The reply succeeded but did not carry the expected fields.
    #[error("unexpected reply shape: {0}")]
    Decode(String),
}

/// Result type for orchestrator verbs.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

// ── Request / reply types ───────────────────────────────────────────

/// Host facts registered with a new callback.
#[derive(Clone, Debug, Serialize)]
pub struct NewCallback {
    /// Address the agent reports from.
    pub ip: String,
    /// User the agent runs as.
    pub user: String,
    /// Hostname of the compromised machine.
    pub host: String,
    /// Agent process id.
    pub pid: u32,
    /// Operating system string.
    pub os: String,
    /// Process architecture.
    pub architecture: String,
    /// Operator-facing description.
    pub description: String,
    /// Free-form extra info.
    pub extra_info: String,
    /// Sleep/jitter summary.
    pub sleep_info: String,
    /// UUID of the payload this callback came from.
    pub payload_uuid: PayloadUuid,
}

/// Identity of a freshly created callback.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct CallbackHandle {
    /// Display id used by task search.
    pub callback_id: i64,
    /// Agent-facing UUID used by the other verbs.
    pub callback_uuid: CallbackUuid,
}

/// Tasks returned by a `get_tasking` poll.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct TaskingBatch {
    /// Queued tasks, oldest first. Absent means none.
    #[serde(default)]
    pub tasks: Vec<Value>,
}

/// One task's output, posted back to the orchestrator.
#[derive(Clone, Debug)]
pub struct TaskResponse {
    /// Task this output belongs to.
    pub task_id: TaskId,
    /// Raw output bytes; base64-encoded on the wire.
    pub output: Vec<u8>,
    /// Whether the task is finished.
    pub completed: bool,
}

/// A task as reported by task search. Fields are lenient because worker
/// versions differ in what they include.
#[derive(Clone, Debug, Deserialize)]
pub struct TaskSummary {
    /// Database id.
    pub id: Option<i64>,
    /// Task UUID as seen by the agent.
    pub agent_task_id: Option<TaskId>,
    /// Command name.
    pub command: Option<String>,
    /// Command parameters.
    pub params: Option<String>,
    /// Lifecycle status.
    pub status: Option<String>,
}

/// A routing edge between two callbacks.
#[derive(Clone, Debug, Serialize)]
pub struct RouteEdge {
    /// Upstream callback.
    pub source: CallbackUuid,
    /// Downstream callback.
    pub destination: CallbackUuid,
    /// Edge direction flag.
    pub direction: i32,
    /// Optional C2-specific metadata.
    pub metadata: Option<String>,
}

// ── Client ──────────────────────────────────────────────────────────

/// Typed facade over the orchestrator's RPC destinations.
pub struct OrchestratorClient {
    rpc: Arc<RpcClient>,
    c2_profile: String,
    payload_type: String,
}

impl OrchestratorClient {
    /// Wrap an RPC client for a given C2 profile and payload type.
    #[must_use]
    pub fn new(
        rpc: Arc<RpcClient>,
        c2_profile: impl Into<String>,
        payload_type: impl Into<String>,
    ) -> Self {
        Self {
            rpc,
            c2_profile: c2_profile.into(),
            payload_type: payload_type.into(),
        }
    }

    /// Register a new callback and return its identity.
    pub async fn create_callback(&self, new: &NewCallback) -> Result<CallbackHandle> {
        let mut body = serde_json::to_value(new).map_err(RpcError::from)?;
        if let Some(map) = body.as_object_mut() {
            let _ = map.insert("action".into(), json!("create_callback"));
            let _ = map.insert("c2_profile".into(), json!(self.c2_profile));
        }
        let raw = self.call_raw(CALLBACK_CREATE, &body).await?;
        serde_json::from_value(raw).map_err(|e| OrchestratorError::Decode(e.to_string()))
    }

    /// Poll for queued tasking on behalf of a callback.
    pub async fn get_tasking(&self, callback: &CallbackUuid, size: u32) -> Result<TaskingBatch> {
        let body = self.agent_message(
            callback,
            json!({ "action": "get_tasking", "tasking_size": size }),
        );
        let raw = self.call_raw(HANDLE_AGENT_JSON, &body).await?;
        serde_json::from_value(raw).map_err(|e| OrchestratorError::Decode(e.to_string()))
    }

    /// Post task output on behalf of a callback. Returns the raw ack so
    /// callers can inspect per-response statuses.
    pub async fn post_response(
        &self,
        callback: &CallbackUuid,
        responses: &[TaskResponse],
    ) -> Result<Value> {
        let encoded: Vec<Value> = responses
            .iter()
            .map(|r| {
                json!({
                    "task_id": r.task_id,
                    "response": BASE64.encode(&r.output),
                    "completed": r.completed,
                })
            })
            .collect();
        let body = self.agent_message(
            callback,
            json!({ "action": "post_response", "responses": encoded }),
        );
        self.call_raw(HANDLE_AGENT_JSON, &body).await
    }

    /// List the tasks known for a callback display id.
    pub async fn search_tasks(&self, callback_id: i64) -> Result<Vec<TaskSummary>> {
        let body = json!({ "action": "task_search", "callback_id": callback_id });
        let raw = self.call_raw(TASK_SEARCH, &body).await?;
        let tasks = raw.get("tasks").cloned().unwrap_or(json!([]));
        serde_json::from_value(tasks).map_err(|e| OrchestratorError::Decode(e.to_string()))
    }

    /// Record a routing edge between two callbacks.
    pub async fn add_route(&self, route: &RouteEdge) -> Result<()> {
        let mut body = serde_json::to_value(route).map_err(RpcError::from)?;
        if let Some(map) = body.as_object_mut() {
            let _ = map.insert("action".into(), json!("add_route"));
        }
        let _ = self.call_raw(CALLBACK_ADD_ROUTE, &body).await?;
        Ok(())
    }

    /// Encrypt bytes with a callback's key material.
    pub async fn encrypt_bytes(
        &self,
        callback: &CallbackUuid,
        plaintext: &[u8],
    ) -> Result<Vec<u8>> {
        let body = json!({
            "action": "encrypt_bytes",
            "uuid": callback,
            "data": BASE64.encode(plaintext),
            "with_uuid": false,
        });
        let raw = self.call_raw(CALLBACK_ENCRYPT_BYTES, &body).await?;
        decode_b64_field(&raw)
    }

    /// Decrypt bytes with a callback's key material.
    pub async fn decrypt_bytes(
        &self,
        callback: &CallbackUuid,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>> {
        let body = json!({
            "action": "decrypt_bytes",
            "uuid": callback,
            "data": BASE64.encode(ciphertext),
            "with_uuid": false,
        });
        let raw = self.call_raw(CALLBACK_DECRYPT_BYTES, &body).await?;
        decode_b64_field(&raw)
    }

    /// Nested agent-message wrapper shared by the `handle_agent_json`
    /// verbs.
    fn agent_message(&self, callback: &CallbackUuid, message: Value) -> Value {
        json!({
            "agent_callback_id": callback,
            "c2_profile": self.c2_profile,
            "payload_type": self.payload_type,
            "message": message,
        })
    }

    /// Publish a body and unwrap the domain outcome: a successful reply
    /// yields the full reply object, a refusal becomes `Rejected`.
    async fn call_raw(&self, destination: &str, body: &Value) -> Result<Value> {
        let response = self.rpc.call(destination, body).await?;
        match response.outcome {
            RpcOutcome::Success(_) => Ok(response.raw),
            RpcOutcome::Error(message) => Err(OrchestratorError::Rejected(message)),
        }
    }
}

/// Pull the base64 payload out of a crypto worker's reply.
fn decode_b64_field(raw: &Value) -> Result<Vec<u8>> {
    let encoded = raw
        .get("data")
        .or_else(|| raw.get("response"))
        .and_then(Value::as_str)
        .ok_or_else(|| OrchestratorError::Decode("missing base64 data field".to_owned()))?;
    BASE64
        .decode(encoded)
        .map_err(|e| OrchestratorError::Decode(format!("invalid base64 data: {e}")))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
