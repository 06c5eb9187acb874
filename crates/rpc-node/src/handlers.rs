//! Built-in handlers every node serves.
//!
//! - `echo`: returns the request body unchanged.
//! - `ping`: liveness probe answering with the serving node's name.

use rpc_dispatcher::{Dispatcher, Handler, Typed, TypedHandler};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared_types::{Envelope, HandlerError, Header};

/// Returns the request body unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoHandler;

impl Handler for EchoHandler {
    fn request_type(&self) -> &str {
        "echo"
    }

    fn get_response_body(&self, request: &Envelope) -> Result<Value, HandlerError> {
        Ok(request.body.clone())
    }
}

/// Body of a `ping` request. Extra fields are ignored.
#[derive(Debug, Default, Deserialize)]
pub struct PingRequest {
    /// Optional free-form token echoed back.
    #[serde(default)]
    pub nonce: Option<String>,
}

/// Body of a `ping` response.
#[derive(Debug, Serialize)]
pub struct PingResponse {
    /// Always true.
    pub pong: bool,
    /// Name of the answering service.
    pub service: String,
    /// The request's nonce, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

/// Liveness probe.
#[derive(Debug, Clone)]
pub struct PingHandler {
    service: String,
}

impl PingHandler {
    /// Ping handler answering on behalf of `service`.
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }
}

impl TypedHandler for PingHandler {
    type Request = PingRequest;
    type Response = PingResponse;

    fn request_type(&self) -> &str {
        "ping"
    }

    fn handle(&self, _header: &Header, request: PingRequest) -> Result<PingResponse, HandlerError> {
        Ok(PingResponse {
            pong: true,
            service: self.service.clone(),
            nonce: request.nonce,
        })
    }
}

/// Dispatcher with the built-in handlers registered.
#[must_use]
pub fn builtin_dispatcher(service: &str) -> Dispatcher {
    Dispatcher::builder()
        .with_handler(EchoHandler)
        .with_handler(Typed::new(PingHandler::new(service)))
        .build()
}
