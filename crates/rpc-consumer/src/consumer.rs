//! # RPC Consumer
//!
//! ## Delivery Flow
//!
//! ```text
//! Delivery
//!   │
//!   ├─ decode ────────── fails ─→ nack(requeue = false), no reply
//!   ├─ validate_pre ──── fails ─→ nack(requeue = false), no reply
//!   ├─ Dispatcher::handle
//!   ├─ reply(encoded envelope) to the delivery's reply address
//!   └─ ack (success and error envelopes alike)
//! ```
//!
//! Deliveries are processed one at a time, in delivery order.

use rpc_dispatcher::Dispatcher;
use shared_bus::{BrokerChannel, ConnectionManager, Delivery};
use shared_types::{decode, encode, validate_pre, Envelope, RpcError, TransportError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio_stream::StreamExt;
use tracing::{debug, error, info, instrument, warn};

/// Errors that stop the consume loop.
#[derive(Debug, Error)]
pub enum ConsumerError {
    /// The broker could not be reached or the queue could not be bound.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The blocking loop could not start its runtime.
    #[error("failed to start consumer runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

/// What happened to one delivery.
#[derive(Debug)]
pub enum ConsumeOutcome {
    /// Dispatched, replied with this envelope and acknowledged.
    Acked(Envelope),
    /// Rejected without requeue; no reply was sent.
    Rejected(RpcError),
}

impl ConsumeOutcome {
    /// Whether the delivery was acknowledged.
    #[must_use]
    pub fn is_acked(&self) -> bool {
        matches!(self, Self::Acked(_))
    }
}

/// Consumer counters.
#[derive(Debug, Default)]
pub struct ConsumerStats {
    /// Deliveries received.
    pub received: AtomicU64,
    /// Deliveries acknowledged.
    pub acked: AtomicU64,
    /// Deliveries rejected as malformed.
    pub rejected: AtomicU64,
    /// Replies that could not be sent.
    pub reply_failures: AtomicU64,
}

/// Consumes one queue and answers every well-formed delivery.
pub struct RpcConsumer {
    dispatcher: Arc<Dispatcher>,
    connection: Arc<ConnectionManager>,
    queue: String,
    stats: ConsumerStats,
}

impl RpcConsumer {
    /// Create a consumer bound to `queue`.
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        connection: Arc<ConnectionManager>,
        queue: impl Into<String>,
    ) -> Self {
        Self {
            dispatcher,
            connection,
            queue: queue.into(),
            stats: ConsumerStats::default(),
        }
    }

    /// The queue this consumer is bound to.
    #[must_use]
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Consumer counters.
    #[must_use]
    pub fn stats(&self) -> &ConsumerStats {
        &self.stats
    }

    /// Decode, validate and dispatch a raw payload.
    ///
    /// # Errors
    ///
    /// `RpcError::Decode` for malformed payloads, `RpcError::PreValidation`
    /// for structurally invalid requests. Everything else is folded into the
    /// returned envelope.
    pub fn process(&self, raw: &[u8]) -> Result<Envelope, RpcError> {
        let data = decode(raw)?;
        validate_pre(&data).map_err(RpcError::PreValidation)?;
        Ok(self.dispatcher.handle(data))
    }

    /// Handle one delivery end to end.
    pub async fn on_message(&self, delivery: Delivery) -> ConsumeOutcome {
        self.stats.received.fetch_add(1, Ordering::Relaxed);
        debug!(
            delivery_tag = delivery.delivery_tag(),
            correlation_id = delivery.correlation_id(),
            "Delivery received"
        );

        let response = match self.process(delivery.payload()) {
            Ok(response) => response,
            Err(err) => {
                warn!(
                    delivery_tag = delivery.delivery_tag(),
                    correlation_id = delivery.correlation_id(),
                    error = %err,
                    "Rejecting delivery"
                );
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                if let Err(nack_err) = delivery.nack(false).await {
                    error!(error = %nack_err, "Failed to reject delivery");
                }
                return ConsumeOutcome::Rejected(err);
            }
        };

        match encode(&response) {
            Ok(payload) => {
                if let Err(err) = delivery.reply(payload).await {
                    self.stats.reply_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        request_id = %response.request_id,
                        error = %err,
                        "Failed to send reply"
                    );
                }
            }
            Err(err) => {
                self.stats.reply_failures.fetch_add(1, Ordering::Relaxed);
                error!(request_id = %response.request_id, error = %err, "Failed to encode reply");
            }
        }

        if let Err(err) = delivery.ack().await {
            warn!(request_id = %response.request_id, error = %err, "Failed to acknowledge delivery");
        } else {
            self.stats.acked.fetch_add(1, Ordering::Relaxed);
        }

        debug!(
            request_id = %response.request_id,
            status = ?response.status_code(),
            "Delivery handled"
        );
        ConsumeOutcome::Acked(response)
    }

    /// Consume until `shutdown` turns true, its sender is dropped, or the
    /// delivery stream ends.
    ///
    /// The channel is released on every exit path, including when this
    /// future is dropped before completion.
    ///
    /// # Errors
    ///
    /// `ConsumerError::Transport` if the channel cannot be acquired or the
    /// queue cannot be bound.
    #[instrument(skip(self, shutdown), fields(queue = %self.queue), name = "rpc_consumer")]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), ConsumerError> {
        let channel = self.connection.channel().await?;
        let mut release = ChannelRelease::new(Arc::clone(&channel));

        let mut deliveries = channel.consume(&self.queue).await?;
        info!("Consumer started");

        if *shutdown.borrow() {
            info!("Shutdown requested before start");
        } else {
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!("Shutdown signal received");
                            break;
                        }
                    }
                    next = deliveries.next() => match next {
                        Some(delivery) => {
                            self.on_message(delivery).await;
                        }
                        None => {
                            warn!("Delivery stream ended");
                            break;
                        }
                    }
                }
            }
        }

        release.release().await;
        self.connection.close().await;
        info!(
            received = self.stats.received.load(Ordering::Relaxed),
            acked = self.stats.acked.load(Ordering::Relaxed),
            rejected = self.stats.rejected.load(Ordering::Relaxed),
            "Consumer stopped"
        );
        Ok(())
    }

    /// Run the consume loop on the calling thread.
    ///
    /// Must not be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// As `run`, plus `ConsumerError::Runtime` if the runtime cannot start.
    pub fn run_blocking(&self, shutdown: watch::Receiver<bool>) -> Result<(), ConsumerError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        runtime.block_on(self.run(shutdown))
    }
}

/// Closes the consumer's channel when dropped without an explicit release.
struct ChannelRelease {
    channel: Arc<dyn BrokerChannel>,
    released: bool,
}

impl ChannelRelease {
    fn new(channel: Arc<dyn BrokerChannel>) -> Self {
        Self {
            channel,
            released: false,
        }
    }

    async fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.channel.close().await;
        }
    }
}

impl Drop for ChannelRelease {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let channel = Arc::clone(&self.channel);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    channel.close().await;
                });
                debug!("Consumer aborted, channel release scheduled");
            }
            Err(_) => warn!("Consumer aborted outside a runtime, channel left open"),
        }
    }
}
