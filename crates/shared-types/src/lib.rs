//! # Shared Types Crate
//!
//! This crate contains the request/response `Envelope`, its structural
//! validator and the error taxonomy used by every RPC participant.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: The wire shape is defined here and nowhere else.
//! - **Envelope Integrity**: Requests and responses share one shape; a response
//!   always carries a `status`, a request never needs one.
//! - **No Raw Faults Across the Wire**: Every `RpcError` except `Decode` can be
//!   turned into a well-formed error `Envelope`.
//!
//! ## Wire Shape
//!
//! ```text
//! {
//!   "request_type": "<string>",
//!   "request_id":   "<string>",
//!   "header":       {"src": "<string>", "dst": "<string>"},
//!   "body":         { ... },
//!   "status":       {"message": "<string>", "code": <int|string>}   // responses only
//! }
//! ```

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod envelope;
pub mod errors;
pub mod request_id;
pub mod validation;

pub use envelope::{
    codes, decode, decode_envelope, encode, normalize_request_type, Envelope, Header, Status,
    StatusCode, OK_MESSAGE,
};
pub use errors::{HandlerError, RpcError, TransportError};
pub use request_id::RequestId;
pub use validation::{validate_post, validate_pre, Schema, ValidationError, Violation};
