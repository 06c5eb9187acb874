//! # RPC Client
//!
//! ## Flow
//!
//! 1. Build the request: fresh `request_id`, `src` = own service,
//!    `dst` = configured target
//! 2. Validate it (log-only or enforced, per `OutboundValidation`)
//! 3. Acquire the shared channel and perform the correlated round-trip
//! 4. Return the decoded response unchanged, or a 500 envelope naming the
//!    transport failure

use crate::config::{ClientConfig, OutboundValidation};
use crate::error::ClientError;
use serde_json::Value;
use shared_bus::ConnectionManager;
use shared_types::{codes, decode_envelope, encode, Envelope, RpcError, TransportError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Client counters.
#[derive(Debug, Default)]
pub struct ClientStats {
    /// Round-trips attempted.
    pub sent: AtomicU64,
    /// Round-trips that produced a decoded response.
    pub received: AtomicU64,
    /// Round-trips answered with a synthesized 500 envelope.
    pub failed: AtomicU64,
    /// Requests refused by enforced outbound validation.
    pub refused: AtomicU64,
    /// Fire-and-forget messages published.
    pub posted: AtomicU64,
}

/// Sends requests to one destination service and awaits the responses.
pub struct RpcClient {
    connection: Arc<ConnectionManager>,
    config: ClientConfig,
    destination: String,
    stats: ClientStats,
}

impl RpcClient {
    /// Create a client.
    ///
    /// # Errors
    ///
    /// `ClientError::MissingDestination` if no target service is configured,
    /// `ClientError::MissingServiceName` if the own identifier is empty.
    pub fn new(
        connection: Arc<ConnectionManager>,
        config: ClientConfig,
    ) -> Result<Self, ClientError> {
        if config.service_name.trim().is_empty() {
            return Err(ClientError::MissingServiceName);
        }
        let destination = config
            .dst_service_name
            .clone()
            .filter(|dst| !dst.trim().is_empty())
            .ok_or(ClientError::MissingDestination)?;

        info!(
            src = %config.service_name,
            dst = %destination,
            routing = ?config.routing,
            timeout_ms = config.call_timeout.as_millis(),
            "RPC client created"
        );

        Ok(Self {
            connection,
            config,
            destination,
            stats: ClientStats::default(),
        })
    }

    /// Client configuration.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Target service identifier.
    #[must_use]
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Client counters.
    #[must_use]
    pub fn stats(&self) -> &ClientStats {
        &self.stats
    }

    /// Build a request for the configured destination.
    pub fn make_request(&self, request_type: &str, body: Value) -> Envelope {
        Envelope::request(
            request_type,
            self.config.service_name.as_str(),
            self.destination.as_str(),
            body,
        )
    }

    /// Send a request and wait for its response.
    ///
    /// Never fails: transport failures, timeouts and undecodable replies come
    /// back as a 500 envelope carrying the request's `request_id` and
    /// `request_type`.
    pub async fn send(&self, request_type: &str, body: Value) -> Envelope {
        let request = self.make_request(request_type, body);
        self.send_request(request).await
    }

    /// Send a pre-built request and wait for its response.
    pub async fn send_request(&self, request: Envelope) -> Envelope {
        if let Err(response) = self.check_outbound(&request) {
            return response;
        }

        self.stats.sent.fetch_add(1, Ordering::Relaxed);
        let routing_key = self.routing_key(&request);

        debug!(
            request_id = %request.request_id,
            request_type = %request.request_type,
            routing_key = %routing_key,
            "Sending request"
        );

        match self.round_trip(&request, &routing_key).await {
            Ok(response) => {
                self.stats.received.fetch_add(1, Ordering::Relaxed);
                if response.request_id != request.request_id {
                    warn!(
                        request_id = %request.request_id,
                        response_request_id = %response.request_id,
                        "Response carries a different request_id"
                    );
                }
                debug!(
                    request_id = %request.request_id,
                    status = ?response.status_code(),
                    "Response received"
                );
                response
            }
            Err(err) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    request_id = %request.request_id,
                    request_type = %request.request_type,
                    error = %err,
                    "Request failed"
                );
                Envelope::error_for(&request, codes::INTERNAL_SERVER_ERROR, err.to_string())
            }
        }
    }

    /// Publish a request without waiting for a response.
    ///
    /// Requests that fail validation are logged and not sent.
    ///
    /// # Errors
    ///
    /// `RpcError::PreValidation` for an invalid request, `RpcError::Transport`
    /// if the publish fails. Returns the `request_id` on success.
    pub async fn post_message(&self, request_type: &str, body: Value) -> Result<String, RpcError> {
        let request = self.make_request(request_type, body);
        if let Err(err) = request.validate_pre() {
            warn!(
                request_id = %request.request_id,
                error = %err,
                "Outbound message failed validation, not sending"
            );
            return Err(RpcError::PreValidation(err));
        }

        let payload = encode(&request).map_err(|e| TransportError::Publish(e.to_string()))?;
        let routing_key = self.routing_key(&request);
        let timeout = self.config.call_timeout;
        tokio::time::timeout(timeout, async {
            let channel = self.connection.channel().await?;
            channel
                .publish(&routing_key, &request.request_id, payload)
                .await
        })
        .await
        .map_err(|_| TransportError::Timeout(timeout))??;

        self.stats.posted.fetch_add(1, Ordering::Relaxed);
        debug!(
            request_id = %request.request_id,
            routing_key = %routing_key,
            "Message posted"
        );
        Ok(request.request_id)
    }

    /// Apply outbound validation. `Err` carries the envelope to answer with.
    fn check_outbound(&self, request: &Envelope) -> Result<(), Envelope> {
        let Err(err) = request.validate_pre() else {
            return Ok(());
        };

        match self.config.outbound_validation {
            OutboundValidation::LogOnly => {
                warn!(
                    request_id = %request.request_id,
                    error = %err,
                    "Outbound request failed validation, sending anyway"
                );
                Ok(())
            }
            OutboundValidation::Enforce => {
                self.stats.refused.fetch_add(1, Ordering::Relaxed);
                warn!(
                    request_id = %request.request_id,
                    error = %err,
                    "Outbound request failed validation, not sending"
                );
                Err(RpcError::PreValidation(err).into_response(request))
            }
        }
    }

    fn routing_key(&self, request: &Envelope) -> String {
        self.config
            .routing
            .routing_key(&request.request_type, &self.destination)
            .to_string()
    }

    async fn round_trip(&self, request: &Envelope, routing_key: &str) -> Result<Envelope, RpcError> {
        let timeout = self.config.call_timeout;
        let payload = encode(request).map_err(|e| TransportError::Publish(e.to_string()))?;

        // One deadline for connecting, enqueueing and awaiting the reply
        let reply = tokio::time::timeout(timeout, async {
            let channel = self.connection.channel().await?;
            channel
                .call(routing_key, &request.request_id, payload, timeout)
                .await
        })
        .await
        .map_err(|_| TransportError::Timeout(timeout))??;

        decode_envelope(&reply)
    }
}
