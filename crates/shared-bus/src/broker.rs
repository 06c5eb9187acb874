//! # Broker Interface
//!
//! Defines the collaborator the RPC core consumes. Connection establishment,
//! queue declaration and acknowledgement semantics belong to implementors.

use async_trait::async_trait;
use shared_types::TransportError;
use std::fmt;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::Stream;

/// Stream of inbound deliveries for one bound routing key.
///
/// Ends when the binding is released (channel closed or queue rebound).
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Delivery> + Send>>;

/// Entry point to a broker: opens channels.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Open a new channel.
    ///
    /// # Errors
    ///
    /// `TransportError::Unavailable` if the broker cannot be reached.
    async fn connect(&self) -> Result<Arc<dyn BrokerChannel>, TransportError>;
}

/// A channel to the broker carrying publishes, calls and consumers.
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Whether the channel has been closed.
    fn is_closed(&self) -> bool;

    /// Perform a correlated round-trip.
    ///
    /// Publishes `payload` to `routing_key` with a reply address and
    /// `correlation_id`, then waits at most `timeout` for the correlated reply.
    async fn call(
        &self,
        routing_key: &str,
        correlation_id: &str,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError>;

    /// Publish without waiting for a reply.
    async fn publish(
        &self,
        routing_key: &str,
        correlation_id: &str,
        payload: Vec<u8>,
    ) -> Result<(), TransportError>;

    /// Bind a queue to `routing_key` and stream its deliveries.
    ///
    /// Binding a key that is already bound replaces the previous binding.
    async fn consume(&self, routing_key: &str) -> Result<DeliveryStream, TransportError>;

    /// Close the channel and release everything bound through it.
    async fn close(&self);
}

/// Settles deliveries on behalf of the broker that produced them.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    /// Positively acknowledge a delivery.
    async fn ack(&self, delivery_tag: u64) -> Result<(), TransportError>;

    /// Negatively acknowledge a delivery, optionally requeueing it.
    async fn nack(&self, delivery: Delivery, requeue: bool) -> Result<(), TransportError>;

    /// Send a reply to a delivery's reply address.
    async fn reply(
        &self,
        reply_to: &str,
        correlation_id: &str,
        payload: Vec<u8>,
    ) -> Result<(), TransportError>;
}

/// One inbound message.
#[derive(Clone)]
pub struct Delivery {
    delivery_tag: u64,
    routing_key: String,
    correlation_id: String,
    reply_to: Option<String>,
    payload: Vec<u8>,
    acker: Arc<dyn Acknowledger>,
}

impl Delivery {
    /// Create a delivery. Used by broker implementations.
    pub fn new(
        delivery_tag: u64,
        routing_key: impl Into<String>,
        correlation_id: impl Into<String>,
        reply_to: Option<String>,
        payload: Vec<u8>,
        acker: Arc<dyn Acknowledger>,
    ) -> Self {
        Self {
            delivery_tag,
            routing_key: routing_key.into(),
            correlation_id: correlation_id.into(),
            reply_to,
            payload,
            acker,
        }
    }

    /// Broker-assigned tag.
    #[must_use]
    pub fn delivery_tag(&self) -> u64 {
        self.delivery_tag
    }

    /// Routing key the message was published with.
    #[must_use]
    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    /// Correlation token supplied by the publisher.
    #[must_use]
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Reply address, present on correlated calls.
    #[must_use]
    pub fn reply_to(&self) -> Option<&str> {
        self.reply_to.as_deref()
    }

    /// Raw payload bytes.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Send `payload` back to the caller. A no-op for fire-and-forget deliveries.
    pub async fn reply(&self, payload: Vec<u8>) -> Result<(), TransportError> {
        match &self.reply_to {
            Some(reply_to) => {
                self.acker
                    .reply(reply_to, &self.correlation_id, payload)
                    .await
            }
            None => Ok(()),
        }
    }

    /// Acknowledge the delivery as processed.
    pub async fn ack(self) -> Result<(), TransportError> {
        self.acker.ack(self.delivery_tag).await
    }

    /// Reject the delivery.
    pub async fn nack(self, requeue: bool) -> Result<(), TransportError> {
        let acker = Arc::clone(&self.acker);
        acker.nack(self, requeue).await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("delivery_tag", &self.delivery_tag)
            .field("routing_key", &self.routing_key)
            .field("correlation_id", &self.correlation_id)
            .field("reply_to", &self.reply_to)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

/// How the routing key of a request is chosen.
///
/// Client and consumer of one deployment must agree on the mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum RoutingMode {
    /// Route by destination service identifier; each service consumes its own queue.
    #[default]
    Destination,
    /// Route by the literal `request_type`.
    RequestType,
}

impl RoutingMode {
    /// Pick the routing key for a request.
    #[must_use]
    pub fn routing_key<'a>(&self, request_type: &'a str, destination: &'a str) -> &'a str {
        match self {
            Self::Destination => destination,
            Self::RequestType => request_type,
        }
    }
}

impl FromStr for RoutingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "destination" | "dst" => Ok(Self::Destination),
            "request_type" | "request-type" => Ok(Self::RequestType),
            other => Err(format!("unknown routing mode: {other}")),
        }
    }
}
