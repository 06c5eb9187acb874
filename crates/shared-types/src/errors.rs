//! # Error Types
//!
//! The failure taxonomy of the RPC pipeline. Every variant except
//! `RpcError::Decode` is converted into a well-formed error `Envelope`
//! before it crosses the broker boundary.

use crate::envelope::{codes, Envelope};
use crate::validation::ValidationError;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by a handler while computing a response body.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    /// Business-rule failure.
    #[error("{0}")]
    Domain(String),

    /// The request body could not be interpreted by the handler.
    #[error("Invalid request body: {0}")]
    InvalidBody(String),
}

impl HandlerError {
    /// Create a domain error.
    pub fn domain(message: impl Into<String>) -> Self {
        Self::Domain(message.into())
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidBody(err.to_string())
    }
}

/// Errors from the broker collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The broker cannot be reached.
    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    /// No correlated response arrived in time.
    #[error("Timed out after {0:?} waiting for response")]
    Timeout(Duration),

    /// The call was cancelled before a response arrived.
    #[error("Call cancelled")]
    Cancelled,

    /// The channel was closed underneath the caller.
    #[error("Channel closed")]
    ChannelClosed,

    /// Nothing is bound to the routing key.
    #[error("No queue bound to routing key `{0}`")]
    NoRoute(String),

    /// The queue bound to the routing key is at capacity.
    #[error("Queue `{0}` is full")]
    QueueFull(String),

    /// Publishing a message failed.
    #[error("Publish failed: {0}")]
    Publish(String),
}

/// Every failure the RPC pipeline can produce.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    /// Payload is not well-formed wire format. Rejected at the broker level.
    #[error("Malformed payload: {0}")]
    Decode(String),

    /// Structurally invalid request.
    #[error("Incoming message validation error: {0}")]
    PreValidation(ValidationError),

    /// No handler is registered for the request type.
    #[error("Can't handle this request type: `{0}`")]
    UnknownRequestType(String),

    /// Fault raised while computing the response body.
    #[error("{0}")]
    Handler(#[from] HandlerError),

    /// The assembled response is structurally invalid.
    #[error("Outgoing message validation error: {0}")]
    PostValidation(ValidationError),

    /// Broker unavailable, timeout or cancellation.
    #[error("{0}")]
    Transport(#[from] TransportError),
}

impl RpcError {
    /// The status code reported to the caller for this failure.
    ///
    /// `Decode` never reaches a caller as an envelope; it maps to 400 only
    /// when a caller asks for an envelope anyway.
    #[must_use]
    pub fn status_code(&self) -> i64 {
        match self {
            Self::Transport(_) => codes::INTERNAL_SERVER_ERROR,
            Self::Decode(_)
            | Self::PreValidation(_)
            | Self::UnknownRequestType(_)
            | Self::Handler(_)
            | Self::PostValidation(_) => codes::BAD_REQUEST,
        }
    }

    /// Whether this failure is handled below the envelope level.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Decode(_))
    }

    /// Convert into an error response for `request`.
    #[must_use]
    pub fn into_response(self, request: &Envelope) -> Envelope {
        Envelope::error_for(request, self.status_code(), self.to_string())
    }

    /// Convert into an error response using whatever identifiers `data` carries.
    #[must_use]
    pub fn into_response_from_value(self, data: &Value) -> Envelope {
        Envelope::error_from_value(data, self.status_code(), self.to_string())
    }
}
