//! # RPC Client
//!
//! Sends a typed request envelope to a destination service over the broker
//! and returns the correlated response.
//!
//! ```text
//! send(request_type, body)
//!   │
//!   ├─→ Envelope::request (fresh request_id, src/dst from config)
//!   ├─→ validate_pre (log-only or enforced)
//!   ├─→ ConnectionManager::channel ─→ BrokerChannel::call(routing_key, request_id)
//!   │
//!   └─← response envelope, or 500 envelope on transport failure
//! ```
//!
//! Two flavours share one pipeline: `RpcClient` (async) and
//! `BlockingRpcClient` (blocks the calling thread).

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod blocking;
pub mod client;
pub mod config;
pub mod error;

pub use blocking::BlockingRpcClient;
pub use client::{ClientStats, RpcClient};
pub use config::{ClientConfig, OutboundValidation, DEFAULT_CALL_TIMEOUT};
pub use error::ClientError;
