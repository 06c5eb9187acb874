//! # RPC Consumer
//!
//! Server side of the round-trip: binds one queue, turns every well-formed
//! delivery into exactly one reply envelope and rejects malformed ones.
//!
//! ```text
//! ┌──────────┐  deliveries  ┌─────────────┐  Value   ┌────────────┐
//! │  Broker  │ ───────────→ │ RpcConsumer │ ───────→ │ Dispatcher │
//! │          │ ←─────────── │             │ ←─────── │            │
//! └──────────┘ reply + ack  └─────────────┘ Envelope └────────────┘
//! ```

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod consumer;

pub use consumer::{ConsumeOutcome, ConsumerError, ConsumerStats, RpcConsumer};
