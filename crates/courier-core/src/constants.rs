//! Shared constants.

/// Content type attached to every published RPC message.
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Default time to wait for an orchestrator reply, in seconds.
pub const DEFAULT_RPC_TIMEOUT_SECS: u64 = 10;

/// Consumer tag used when binding the private reply queue.
pub const CONSUMER_TAG: &str = "courier-rpc";
