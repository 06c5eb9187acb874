//! # Handlers
//!
//! A handler serves exactly one request type. It computes the response body
//! and, optionally, the response header; the dispatcher assembles the rest.
//!
//! Handlers are synchronous. Anything that needs to wait on I/O belongs in
//! the service before dispatch or after the response is produced.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use shared_types::{Envelope, HandlerError, Header};
use std::fmt;
use std::marker::PhantomData;

/// Contract for serving one request type.
pub trait Handler: Send + Sync {
    /// The request type this handler serves.
    fn request_type(&self) -> &str;

    /// Compute the response body for a validated request.
    ///
    /// # Errors
    ///
    /// A `HandlerError` becomes a 400 response whose status message is the
    /// error's display text.
    fn get_response_body(&self, request: &Envelope) -> Result<Value, HandlerError>;

    /// Compute the response header. Defaults to the request header with
    /// `src` and `dst` swapped.
    fn get_response_header(&self, request: &Envelope) -> Header {
        request.header.swapped()
    }
}

/// Handler backed by a closure.
pub struct FnHandler<F> {
    request_type: String,
    func: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&Envelope) -> Result<Value, HandlerError> + Send + Sync,
{
    /// Wrap `func` as the handler for `request_type`.
    pub fn new(request_type: impl Into<String>, func: F) -> Self {
        Self {
            request_type: request_type.into(),
            func,
        }
    }
}

impl<F> Handler for FnHandler<F>
where
    F: Fn(&Envelope) -> Result<Value, HandlerError> + Send + Sync,
{
    fn request_type(&self) -> &str {
        &self.request_type
    }

    fn get_response_body(&self, request: &Envelope) -> Result<Value, HandlerError> {
        (self.func)(request)
    }
}

impl<F> fmt::Debug for FnHandler<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnHandler")
            .field("request_type", &self.request_type)
            .finish_non_exhaustive()
    }
}

/// Shorthand for `FnHandler::new`.
pub fn handler_fn<F>(request_type: impl Into<String>, func: F) -> FnHandler<F>
where
    F: Fn(&Envelope) -> Result<Value, HandlerError> + Send + Sync,
{
    FnHandler::new(request_type, func)
}

/// Handler working on typed bodies instead of raw JSON.
pub trait TypedHandler: Send + Sync {
    /// Request body type.
    type Request: DeserializeOwned;
    /// Response body type.
    type Response: Serialize;

    /// The request type this handler serves.
    fn request_type(&self) -> &str;

    /// Compute the typed response for a typed request body.
    fn handle(&self, header: &Header, request: Self::Request)
        -> Result<Self::Response, HandlerError>;
}

/// Adapts a `TypedHandler` into a `Handler`.
///
/// Bodies that do not deserialize into `H::Request` fail with
/// `HandlerError::InvalidBody`.
pub struct Typed<H> {
    inner: H,
    _marker: PhantomData<fn() -> H>,
}

impl<H: TypedHandler> Typed<H> {
    /// Wrap a typed handler.
    pub fn new(inner: H) -> Self {
        Self {
            inner,
            _marker: PhantomData,
        }
    }

    /// The wrapped handler.
    pub fn inner(&self) -> &H {
        &self.inner
    }
}

impl<H: TypedHandler> Handler for Typed<H> {
    fn request_type(&self) -> &str {
        self.inner.request_type()
    }

    fn get_response_body(&self, request: &Envelope) -> Result<Value, HandlerError> {
        let body: H::Request = serde_json::from_value(request.body.clone())?;
        let response = self.inner.handle(&request.header, body)?;
        Ok(serde_json::to_value(response)?)
    }
}
