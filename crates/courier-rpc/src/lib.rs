//! # courier-rpc
//!
//! Correlation-based asynchronous RPC over a shared message broker.
//!
//! One [`RpcClient`] owns one broker connection, one exclusive reply
//! queue, and one router task. Callers publish a JSON request to a
//! destination routing key with a fresh correlation token and the reply
//! queue's name attached; workers answer to that queue echoing the token,
//! and the router hands each reply to exactly the call that minted it.
//! Unmatched replies are discarded, timeouts expire their own entry, and
//! a lost connection fails everything in flight.
//!
//! The transport is abstracted behind [`Broker`]: [`AmqpBroker`] talks to
//! a real AMQP server, [`MemoryBroker`] runs the same contract in-process
//! for tests. [`OrchestratorClient`] layers typed domain verbs on top.

#![deny(unsafe_code)]

pub mod amqp;
pub mod client;
pub mod errors;
pub mod memory;
pub mod orchestrator;
pub mod pending;
pub mod transport;
pub mod types;

pub use amqp::AmqpBroker;
pub use client::RpcClient;
pub use errors::{Result, RpcError};
pub use memory::{MemoryBroker, Responder};
pub use orchestrator::{
    CallbackHandle, NewCallback, OrchestratorClient, OrchestratorError, RouteEdge, TaskResponse,
    TaskSummary, TaskingBatch,
};
pub use pending::PendingCalls;
pub use transport::{Broker, BrokerSession, Publisher};
pub use types::{Delivery, Envelope, RpcOutcome, RpcResponse};
