//! # Message Envelope
//!
//! The single message shape used for both requests and responses.
//!
//! ## Invariants
//!
//! - `request_id` is generated once per outbound request and copied unchanged
//!   into its response.
//! - `request_type` is copied unchanged from request to response.
//! - `header.src`/`header.dst` are swapped between request and response.
//! - `status` is absent on a request and mandatory on a response.
//! - `body` is never null; `{}` is the canonical "no payload" value.

use crate::errors::RpcError;
use crate::request_id::RequestId;
use crate::validation::{self, ValidationError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// HTTP-style status codes carried in `status.code`.
pub mod codes {
    /// Request handled successfully.
    pub const OK: i64 = 200;
    /// Validation failure, unknown request type or handler-level domain error.
    pub const BAD_REQUEST: i64 = 400;
    /// Transport, timeout or cancellation failure on the client side.
    pub const INTERNAL_SERVER_ERROR: i64 = 500;
}

/// Message used on every successful response.
pub const OK_MESSAGE: &str = "OK";

/// Routing header naming the sending and receiving services.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Header {
    /// Originating service identifier.
    pub src: String,
    /// Destination service identifier.
    pub dst: String,
}

impl Header {
    /// Create a header.
    pub fn new(src: impl Into<String>, dst: impl Into<String>) -> Self {
        Self {
            src: src.into(),
            dst: dst.into(),
        }
    }

    /// The header a responder uses: the responder becomes `src`, the
    /// original sender becomes `dst`.
    #[must_use]
    pub fn swapped(&self) -> Self {
        Self {
            src: self.dst.clone(),
            dst: self.src.clone(),
        }
    }
}

/// Machine outcome of a response.
///
/// Integer codes are HTTP-style; string codes only appear on legacy peers and
/// in the empty template (`""`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StatusCode {
    /// HTTP-style integer code.
    Http(i64),
    /// Legacy string code.
    Legacy(String),
}

impl StatusCode {
    /// The integer code, if this is not a legacy string code.
    #[must_use]
    pub fn as_http(&self) -> Option<i64> {
        match self {
            Self::Http(code) => Some(*code),
            Self::Legacy(_) => None,
        }
    }
}

impl From<i64> for StatusCode {
    fn from(code: i64) -> Self {
        Self::Http(code)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http(code) => write!(f, "{code}"),
            Self::Legacy(code) => write!(f, "{code:?}"),
        }
    }
}

/// Outcome block present on responses.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Status {
    /// Human-readable outcome.
    pub message: String,
    /// Machine outcome.
    pub code: StatusCode,
}

impl Status {
    /// Create a status with an HTTP-style code.
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: StatusCode::Http(code),
        }
    }

    /// The status attached to every successful response.
    #[must_use]
    pub fn ok() -> Self {
        Self::new(codes::OK, OK_MESSAGE)
    }
}

/// The canonical request/response message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Routing/dispatch key.
    pub request_type: String,
    /// Correlation token linking a response to its request.
    pub request_id: String,
    /// Source and destination services.
    pub header: Header,
    /// Payload; an empty object when there is nothing to carry.
    pub body: Value,
    /// Outcome; `None` on requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
}

impl Envelope {
    /// The fully shaped default envelope substituted into error responses.
    ///
    /// `request_type=""`, `request_id=""`, `header={src:"",dst:""}`,
    /// `body={}`, `status={message:"",code:""}`.
    #[must_use]
    pub fn template() -> Self {
        Self {
            request_type: String::new(),
            request_id: String::new(),
            header: Header::default(),
            body: empty_body(),
            status: Some(Status {
                message: String::new(),
                code: StatusCode::Legacy(String::new()),
            }),
        }
    }

    /// Build an outbound request with a freshly generated `request_id`.
    pub fn request(
        request_type: impl Into<String>,
        src: impl Into<String>,
        dst: impl Into<String>,
        body: Value,
    ) -> Self {
        Self::request_with_id(RequestId::new().to_string(), request_type, src, dst, body)
    }

    /// Build an outbound request with a caller-supplied `request_id`.
    pub fn request_with_id(
        request_id: impl Into<String>,
        request_type: impl Into<String>,
        src: impl Into<String>,
        dst: impl Into<String>,
        body: Value,
    ) -> Self {
        Self {
            request_type: request_type.into(),
            request_id: request_id.into(),
            header: Header::new(src, dst),
            body: non_null(body),
            status: None,
        }
    }

    /// Build a successful response to `request`.
    ///
    /// `request_id` and `request_type` are copied unchanged; the header is
    /// taken as given so handlers can route multi-hop replies.
    #[must_use]
    pub fn response_to(request: &Envelope, header: Header, body: Value) -> Self {
        Self {
            request_type: request.request_type.clone(),
            request_id: request.request_id.clone(),
            header,
            body: non_null(body),
            status: Some(Status::ok()),
        }
    }

    /// Build an error response to a well-formed `request`, swapping its header.
    #[must_use]
    pub fn error_for(request: &Envelope, code: i64, message: impl Into<String>) -> Self {
        Self {
            request_type: request.request_type.clone(),
            request_id: request.request_id.clone(),
            header: request.header.swapped(),
            body: empty_body(),
            status: Some(Status::new(code, message)),
        }
    }

    /// Build an error response from arbitrary, possibly malformed data.
    ///
    /// Whatever `request_id`, `request_type` and header can be extracted are
    /// preserved (header swapped); everything else keeps the template value.
    #[must_use]
    pub fn error_from_value(data: &Value, code: i64, message: impl Into<String>) -> Self {
        let mut envelope = Self::template();
        if let Some(request_id) = data.get("request_id").and_then(Value::as_str) {
            envelope.request_id = request_id.to_string();
        }
        if let Some(request_type) = data.get("request_type").and_then(Value::as_str) {
            envelope.request_type = request_type.to_string();
        }
        if let Some(header) = data.get("header") {
            if let Some(src) = header.get("src").and_then(Value::as_str) {
                envelope.header.dst = src.to_string();
            }
            if let Some(dst) = header.get("dst").and_then(Value::as_str) {
                envelope.header.src = dst.to_string();
            }
        }
        envelope.status = Some(Status::new(code, message));
        envelope
    }

    /// The dispatch key: `request_type` trimmed and lower-cased.
    #[must_use]
    pub fn normalized_type(&self) -> String {
        normalize_request_type(&self.request_type)
    }

    /// `true` when the status code is 200.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status_code()
            .and_then(StatusCode::as_http)
            .is_some_and(|code| code == codes::OK)
    }

    /// The status code, if a status is present.
    #[must_use]
    pub fn status_code(&self) -> Option<&StatusCode> {
        self.status.as_ref().map(|status| &status.code)
    }

    /// The status message, if a status is present.
    #[must_use]
    pub fn status_message(&self) -> Option<&str> {
        self.status.as_ref().map(|status| status.message.as_str())
    }

    /// Serialize into a JSON value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        // A struct of strings and a `Value` always serializes.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Deserialize from a JSON value.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    /// Run pre-dispatch validation against the serialized form.
    pub fn validate_pre(&self) -> Result<(), ValidationError> {
        validation::validate_pre(&self.to_value())
    }

    /// Run response validation against the serialized form.
    pub fn validate_post(&self) -> Result<(), ValidationError> {
        validation::validate_post(&self.to_value())
    }
}

/// Normalize a request type into its dispatch key.
#[must_use]
pub fn normalize_request_type(request_type: &str) -> String {
    request_type.trim().to_lowercase()
}

/// Encode an envelope into its wire form.
pub fn encode(envelope: &Envelope) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(envelope)
}

/// Decode raw wire bytes into an unvalidated JSON value.
///
/// Fails only when the payload is not well-formed JSON; structural checks
/// are left to the validator.
pub fn decode(bytes: &[u8]) -> Result<Value, RpcError> {
    serde_json::from_slice(bytes).map_err(|e| RpcError::Decode(e.to_string()))
}

/// Decode raw wire bytes straight into an `Envelope`.
pub fn decode_envelope(bytes: &[u8]) -> Result<Envelope, RpcError> {
    let value = decode(bytes)?;
    Envelope::from_value(value).map_err(|e| RpcError::Decode(e.to_string()))
}

fn empty_body() -> Value {
    Value::Object(Map::new())
}

fn non_null(body: Value) -> Value {
    if body.is_null() {
        empty_body()
    } else {
        body
    }
}
