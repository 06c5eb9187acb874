//! # Dispatcher
//!
//! Registry of handlers keyed by normalized request type, plus the pipeline
//! that turns one inbound message into exactly one response envelope.
//!
//! ## Pipeline
//!
//! ```text
//! data ──→ validate_pre ──→ lookup ──→ get_response_body ──→ assemble ──→ validate_post ──→ response
//!              │               │              │                                │
//!              └───────────────┴──────────────┴────────── 400 error envelope ──┘
//! ```
//!
//! Registration needs `&mut self`; once the dispatcher is shared behind an
//! `Arc` the table is read-only and lookups take no lock.

use crate::handler::Handler;
use serde_json::Value;
use shared_types::{normalize_request_type, validate_pre, Envelope, HandlerError, Header, RpcError};
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Handler registry and dispatch pipeline.
#[derive(Default)]
pub struct Dispatcher {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl Dispatcher {
    /// Create an empty dispatcher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start building a dispatcher.
    #[must_use]
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::default()
    }

    /// Register a handler under its normalized request type.
    ///
    /// Registering a type twice replaces the earlier handler, which is
    /// returned.
    pub fn register<H: Handler + 'static>(&mut self, handler: H) -> Option<Arc<dyn Handler>> {
        self.register_arc(Arc::new(handler))
    }

    /// Register an already shared handler.
    pub fn register_arc(&mut self, handler: Arc<dyn Handler>) -> Option<Arc<dyn Handler>> {
        let key = normalize_request_type(handler.request_type());
        let previous = self.handlers.insert(key.clone(), handler);

        if previous.is_some() {
            warn!(request_type = %key, "Handler registered twice; previous handler replaced");
        } else {
            info!(request_type = %key, "Handler registered");
        }
        previous
    }

    /// Whether a handler serves `request_type`.
    #[must_use]
    pub fn contains(&self, request_type: &str) -> bool {
        self.handlers
            .contains_key(&normalize_request_type(request_type))
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handler is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Registered request types, sorted.
    #[must_use]
    pub fn request_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }

    /// Handle a decoded message. Never fails: every fault becomes an error
    /// envelope carrying whatever identifiers the message had.
    pub fn handle(&self, data: Value) -> Envelope {
        match self.try_handle(&data) {
            Ok(response) => response,
            Err(err) => {
                let field = |key: &str| data.get(key).and_then(|v| v.as_str()).unwrap_or("");
                let (request_id, request_type) = (field("request_id"), field("request_type"));
                warn!(
                    request_id = request_id,
                    request_type = request_type,
                    error = %err,
                    "Request failed"
                );
                err.into_response_from_value(&data)
            }
        }
    }

    /// Handle a typed request envelope.
    pub fn handle_envelope(&self, request: &Envelope) -> Envelope {
        let outcome = request
            .validate_pre()
            .map_err(RpcError::PreValidation)
            .and_then(|()| self.dispatch(request));

        match outcome {
            Ok(response) => response,
            Err(err) => {
                warn!(
                    request_id = %request.request_id,
                    request_type = %request.request_type,
                    error = %err,
                    "Request failed"
                );
                err.into_response(request)
            }
        }
    }

    /// Run the pipeline, surfacing the failure instead of an error envelope.
    pub fn try_handle(&self, data: &Value) -> Result<Envelope, RpcError> {
        validate_pre(data).map_err(RpcError::PreValidation)?;
        let request = request_from_value(data)?;
        self.dispatch(&request)
    }

    /// Lookup, handler invocation, assembly and response validation.
    fn dispatch(&self, request: &Envelope) -> Result<Envelope, RpcError> {
        let key = request.normalized_type();
        let handler = self
            .handlers
            .get(&key)
            .ok_or_else(|| RpcError::UnknownRequestType(request.request_type.clone()))?;

        debug!(
            request_id = %request.request_id,
            request_type = %key,
            src = %request.header.src,
            "Dispatching request"
        );

        let (body, header) = invoke(handler.as_ref(), request)?;
        let response = Envelope::response_to(request, header, body);

        response
            .validate_post()
            .map_err(RpcError::PostValidation)?;

        debug!(
            request_id = %response.request_id,
            request_type = %key,
            "Request handled"
        );
        Ok(response)
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("request_types", &self.request_types())
            .finish()
    }
}

/// Builds a `Dispatcher` from a set of handlers.
#[derive(Default)]
pub struct DispatcherBuilder {
    dispatcher: Dispatcher,
}

impl DispatcherBuilder {
    /// Add a handler.
    #[must_use]
    pub fn with_handler<H: Handler + 'static>(mut self, handler: H) -> Self {
        self.dispatcher.register(handler);
        self
    }

    /// Add an already shared handler.
    #[must_use]
    pub fn with_shared_handler(mut self, handler: Arc<dyn Handler>) -> Self {
        self.dispatcher.register_arc(handler);
        self
    }

    /// Finish building.
    #[must_use]
    pub fn build(self) -> Dispatcher {
        self.dispatcher
    }
}

/// Run a handler. A panic inside it is reported as a `HandlerError`.
fn invoke(handler: &dyn Handler, request: &Envelope) -> Result<(Value, Header), HandlerError> {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        handler
            .get_response_body(request)
            .map(|body| (body, handler.get_response_header(request)))
    }));

    outcome.unwrap_or_else(|payload| {
        let reason = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        error!(
            request_id = %request.request_id,
            request_type = %request.request_type,
            reason = %reason,
            "Handler panicked"
        );
        Err(HandlerError::domain(format!("Handler failed: {reason}")))
    })
}

/// Interpret a pre-validated message as an envelope.
///
/// A request's `status` is not part of the pre-message schema and is dropped
/// here so a malformed one cannot fail the conversion.
fn request_from_value(data: &Value) -> Result<Envelope, RpcError> {
    let mut data = data.clone();
    if let Some(object) = data.as_object_mut() {
        object.remove("status");
    }
    Envelope::from_value(data).map_err(|e| RpcError::Decode(e.to_string()))
}
