//! # RPC Dispatcher
//!
//! Maps a request type to the handler that serves it and runs the request
//! pipeline: validate, look up, compute body, assemble, validate response.
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                 Dispatcher                  │
//! │                                             │
//! │   "echo" ──→ Arc<dyn Handler>               │
//! │   "ping" ──→ Arc<dyn Handler>               │
//! │   "add"  ──→ Arc<Typed<Adder>>              │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! The dispatcher knows nothing about brokers. The consumer decodes a
//! delivery, hands the value to `Dispatcher::handle` and replies with
//! whatever envelope comes back.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod dispatcher;
pub mod handler;

pub use dispatcher::{Dispatcher, DispatcherBuilder};
pub use handler::{handler_fn, FnHandler, Handler, Typed, TypedHandler};
