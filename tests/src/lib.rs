//! # Broker RPC Test Suite
//!
//! Unified test crate for scenarios that span more than one crate.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! └── integration/
//!     ├── harness.rs      # Two services on one in-memory broker
//!     ├── round_trip.rs   # Successful request/response flows
//!     ├── failures.rs     # Error envelopes and rejected deliveries
//!     └── blocking.rs     # Blocking client and consumer loop
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p rpc-tests
//! cargo test -p rpc-tests integration::failures
//! ```

#![allow(dead_code)]

pub mod integration;
