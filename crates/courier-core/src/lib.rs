//! # courier-core
//!
//! Foundation types for the courier container.
//!
//! This crate provides the shared vocabulary the other courier crates
//! depend on:
//!
//! - **Branded IDs**: `CorrelationId`, `CallbackUuid`, `PayloadUuid`,
//!   `TaskId` as newtypes for type safety
//! - **Constants**: wire content type, default RPC timeout, consumer tag

#![deny(unsafe_code)]

pub mod constants;
pub mod ids;

pub use constants::{CONSUMER_TAG, CONTENT_TYPE_JSON, DEFAULT_RPC_TIMEOUT_SECS};
pub use ids::{CallbackUuid, CorrelationId, PayloadUuid, TaskId};
