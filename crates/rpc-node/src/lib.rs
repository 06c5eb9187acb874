//! # RPC Node Library
//!
//! Exposes the service runtime pieces for the `rpc-node` binary and for tests.
//!
//! - `config` - broker and service settings, loaded from the environment
//! - `handlers` - the built-in `echo` and `ping` handlers
//! - `runtime` - consumer lifecycle, self-check and graceful shutdown

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod config;
pub mod handlers;
pub mod runtime;

pub use config::{BrokerConfig, ConfigError, NodeConfig, ServiceConfig};
pub use handlers::{builtin_dispatcher, EchoHandler, PingHandler};
pub use runtime::NodeRuntime;
