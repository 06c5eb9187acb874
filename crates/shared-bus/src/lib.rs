//! # Shared Bus - Broker Collaborator for RPC Round-Trips
//!
//! The RPC core never talks to a message broker directly. It talks to the
//! `Broker`/`BrokerChannel` interface defined here, which provides exactly
//! two capabilities:
//!
//! - deliver raw byte payloads bound to a routing key (`consume`), and
//! - perform a correlated round-trip keyed by a routing key (`call`),
//!   returning the correlated response payload or a `TransportError`.
//!
//! ## Request/Response Pattern
//!
//! ```text
//! ┌──────────────┐   call(routing_key,        ┌──────────────┐
//! │  RpcClient   │        correlation_id)     │  RpcConsumer │
//! │              │ ──────┐                    │              │
//! └──────────────┘       │                    └──────────────┘
//!        ↑               ▼                           ↑   │
//!        │         ┌──────────────┐   consume()      │   │ reply(reply_to,
//!        │         │    Broker    │ ─────────────────┘   │       correlation_id)
//!        └──────── │              │ ←────────────────────┘
//!   PendingReplies └──────────────┘
//! ```
//!
//! ## Implementations
//!
//! - `InMemoryBroker`: tokio-channel broker for single-process deployments
//!   and tests. Networked brokers implement the same traits.
//! - `ConnectionManager`: lazily opens one channel per process and reopens
//!   it when it is found closed.

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod broker;
pub mod connection;
pub mod memory;
pub mod pending;

// Re-export main types
pub use broker::{Acknowledger, Broker, BrokerChannel, Delivery, DeliveryStream, RoutingMode};
pub use connection::ConnectionManager;
pub use memory::{BrokerStats, DeadLetter, InMemoryBroker};
pub use pending::{PendingReplies, PendingStats};
pub use shared_types::TransportError;

/// Maximum deliveries buffered per bound queue; further messages are refused.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

/// Reply address used for correlated round-trips.
pub const REPLY_TO_QUEUE: &str = "amq.rabbitmq.reply-to";

/// Dead Letter Queue for deliveries rejected without requeue.
pub const DEAD_LETTER_QUEUE: &str = "dlq.rejected";

/// Dead letters kept by the in-memory broker before the oldest are discarded.
pub const DEAD_LETTER_LIMIT: usize = 1000;
