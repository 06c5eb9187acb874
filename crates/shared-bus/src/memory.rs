//! # In-Memory Broker
//!
//! Uses bounded `tokio::sync::mpsc` queues, one per bound routing key, and a
//! `PendingReplies` store for the reply-to/correlation-id pattern.
//! Suitable for single-process deployments and tests; networked deployments
//! plug a different `Broker` implementation into the same traits.

use crate::broker::{Acknowledger, Broker, BrokerChannel, Delivery, DeliveryStream};
use crate::pending::PendingReplies;
use crate::{DEAD_LETTER_LIMIT, DEAD_LETTER_QUEUE, DEFAULT_CHANNEL_CAPACITY, REPLY_TO_QUEUE};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use shared_types::TransportError;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

/// Broker-wide counters.
#[derive(Debug, Default)]
pub struct BrokerStats {
    /// Channels opened.
    pub connections_opened: AtomicU64,
    /// Messages enqueued to a bound queue.
    pub published: AtomicU64,
    /// Deliveries positively acknowledged.
    pub acked: AtomicU64,
    /// Deliveries rejected without requeue.
    pub rejected: AtomicU64,
    /// Deliveries rejected with requeue.
    pub requeued: AtomicU64,
    /// Replies routed back to callers.
    pub replies: AtomicU64,
    /// Dead letters discarded because the store was full.
    pub dead_letters_dropped: AtomicU64,
}

/// A delivery rejected without requeue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    /// Routing key the message was published with.
    pub routing_key: String,
    /// Correlation token of the message.
    pub correlation_id: String,
    /// Raw payload.
    pub payload: Vec<u8>,
}

/// A bound queue and the channel that owns the binding.
struct Binding {
    sender: mpsc::Sender<Delivery>,
    channel_id: u64,
}

struct BrokerState {
    /// Bound queues by routing key.
    queues: RwLock<HashMap<String, Binding>>,
    /// Callers waiting for correlated replies.
    pending: PendingReplies,
    /// Most recent deliveries rejected without requeue, oldest first.
    dead_letters: Mutex<VecDeque<DeadLetter>>,
    /// Shared acknowledger handed to every delivery.
    acker: Arc<dyn Acknowledger>,
    /// Availability switch; an offline broker refuses connections and calls.
    available: AtomicBool,
    next_delivery_tag: AtomicU64,
    next_channel_id: AtomicU64,
    capacity: usize,
    stats: BrokerStats,
}

impl BrokerState {
    fn ensure_available(&self) -> Result<(), TransportError> {
        if self.available.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(TransportError::Unavailable(
                "in-memory broker is offline".to_string(),
            ))
        }
    }

    /// Push a message onto the queue bound to `routing_key` without waiting
    /// for room.
    fn enqueue(
        &self,
        routing_key: &str,
        correlation_id: &str,
        reply_to: Option<String>,
        payload: Vec<u8>,
    ) -> Result<(), TransportError> {
        let (sender, channel_id) = {
            let queues = self.queues.read();
            let binding = queues
                .get(routing_key)
                .ok_or_else(|| TransportError::NoRoute(routing_key.to_string()))?;
            (binding.sender.clone(), binding.channel_id)
        };

        let tag = self.next_delivery_tag.fetch_add(1, Ordering::Relaxed) + 1;
        let delivery = Delivery::new(
            tag,
            routing_key,
            correlation_id,
            reply_to,
            payload,
            Arc::clone(&self.acker),
        );

        match sender.try_send(delivery) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(
                    routing_key = routing_key,
                    capacity = self.capacity,
                    "Queue full, message refused"
                );
                return Err(TransportError::QueueFull(routing_key.to_string()));
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                // Consumer dropped its stream without closing the channel
                self.queues
                    .write()
                    .retain(|key, b| !(key == routing_key && b.channel_id == channel_id));
                warn!(routing_key = routing_key, "Queue consumer gone, binding removed");
                return Err(TransportError::NoRoute(routing_key.to_string()));
            }
        }

        self.stats.published.fetch_add(1, Ordering::Relaxed);
        debug!(
            routing_key = routing_key,
            correlation_id = correlation_id,
            delivery_tag = tag,
            "Message enqueued"
        );
        Ok(())
    }
}

/// Acknowledger shared by all deliveries of one broker.
struct MemoryAcker {
    state: Weak<BrokerState>,
}

impl MemoryAcker {
    fn state(&self) -> Result<Arc<BrokerState>, TransportError> {
        self.state.upgrade().ok_or(TransportError::ChannelClosed)
    }
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn ack(&self, delivery_tag: u64) -> Result<(), TransportError> {
        let state = self.state()?;
        state.stats.acked.fetch_add(1, Ordering::Relaxed);
        debug!(delivery_tag = delivery_tag, "Delivery acknowledged");
        Ok(())
    }

    async fn nack(&self, delivery: Delivery, requeue: bool) -> Result<(), TransportError> {
        let state = self.state()?;

        if requeue {
            state.stats.requeued.fetch_add(1, Ordering::Relaxed);
            debug!(
                delivery_tag = delivery.delivery_tag(),
                "Delivery rejected, requeueing"
            );
            return state.enqueue(
                delivery.routing_key(),
                delivery.correlation_id(),
                delivery.reply_to().map(str::to_string),
                delivery.payload().to_vec(),
            );
        }

        state.stats.rejected.fetch_add(1, Ordering::Relaxed);
        warn!(
            delivery_tag = delivery.delivery_tag(),
            routing_key = delivery.routing_key(),
            dlq = DEAD_LETTER_QUEUE,
            "Delivery rejected without requeue"
        );
        let mut dead_letters = state.dead_letters.lock();
        if dead_letters.len() >= DEAD_LETTER_LIMIT {
            dead_letters.pop_front();
            state
                .stats
                .dead_letters_dropped
                .fetch_add(1, Ordering::Relaxed);
        }
        dead_letters.push_back(DeadLetter {
            routing_key: delivery.routing_key().to_string(),
            correlation_id: delivery.correlation_id().to_string(),
            payload: delivery.payload().to_vec(),
        });
        Ok(())
    }

    async fn reply(
        &self,
        reply_to: &str,
        correlation_id: &str,
        payload: Vec<u8>,
    ) -> Result<(), TransportError> {
        let state = self.state()?;
        if reply_to != REPLY_TO_QUEUE {
            return Err(TransportError::NoRoute(reply_to.to_string()));
        }

        state.stats.replies.fetch_add(1, Ordering::Relaxed);
        if state.pending.complete(correlation_id, payload) {
            Ok(())
        } else {
            Err(TransportError::NoRoute(format!(
                "{reply_to} (correlation id {correlation_id})"
            )))
        }
    }
}

/// In-memory implementation of the broker.
///
/// Cloning yields another handle to the same broker.
#[derive(Clone)]
pub struct InMemoryBroker {
    state: Arc<BrokerState>,
}

impl InMemoryBroker {
    /// Create a new in-memory broker with default queue capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new in-memory broker with the specified queue capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let state = Arc::new_cyclic(|weak: &Weak<BrokerState>| BrokerState {
            queues: RwLock::new(HashMap::new()),
            pending: PendingReplies::new(),
            dead_letters: Mutex::new(VecDeque::new()),
            acker: Arc::new(MemoryAcker {
                state: weak.clone(),
            }),
            available: AtomicBool::new(true),
            next_delivery_tag: AtomicU64::new(0),
            next_channel_id: AtomicU64::new(0),
            capacity: capacity.max(1),
            stats: BrokerStats::default(),
        });
        Self { state }
    }

    /// Take the broker online or offline.
    pub fn set_available(&self, available: bool) {
        self.state.available.store(available, Ordering::Release);
        info!(available = available, "In-memory broker availability changed");
    }

    /// Whether the broker accepts connections.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.state.available.load(Ordering::Acquire)
    }

    /// Whether a queue is bound to `routing_key`.
    #[must_use]
    pub fn is_bound(&self, routing_key: &str) -> bool {
        self.state.queues.read().contains_key(routing_key)
    }

    /// Queue capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.state.capacity
    }

    /// Broker counters.
    #[must_use]
    pub fn stats(&self) -> &BrokerStats {
        &self.state.stats
    }

    /// Callers currently awaiting a reply.
    #[must_use]
    pub fn pending(&self) -> &PendingReplies {
        &self.state.pending
    }

    /// Snapshot of deliveries rejected without requeue, oldest first.
    ///
    /// At most `DEAD_LETTER_LIMIT` are kept; older ones are discarded.
    #[must_use]
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.state.dead_letters.lock().iter().cloned().collect()
    }

    /// Remove and return every stored dead letter.
    pub fn take_dead_letters(&self) -> Vec<DeadLetter> {
        self.state.dead_letters.lock().drain(..).collect()
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn connect(&self) -> Result<Arc<dyn BrokerChannel>, TransportError> {
        self.state.ensure_available()?;
        let id = self.state.next_channel_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.state
            .stats
            .connections_opened
            .fetch_add(1, Ordering::Relaxed);
        debug!(channel_id = id, "Channel opened");
        Ok(Arc::new(InMemoryChannel {
            id,
            state: Arc::clone(&self.state),
            closed: AtomicBool::new(false),
        }))
    }
}

/// Channel handed out by `InMemoryBroker::connect`.
struct InMemoryChannel {
    id: u64,
    state: Arc<BrokerState>,
    closed: AtomicBool,
}

impl InMemoryChannel {
    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::ChannelClosed);
        }
        self.state.ensure_available()
    }
}

/// Drops the pending entry if the call ends without a reply, including when
/// the calling future itself is dropped.
struct CancelOnDrop<'a> {
    pending: &'a PendingReplies,
    correlation_id: &'a str,
}

impl Drop for CancelOnDrop<'_> {
    fn drop(&mut self) {
        self.pending.cancel(self.correlation_id);
    }
}

#[async_trait]
impl BrokerChannel for InMemoryChannel {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn call(
        &self,
        routing_key: &str,
        correlation_id: &str,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        self.ensure_open()?;

        let reply = self.state.pending.register(correlation_id, routing_key);
        let _guard = CancelOnDrop {
            pending: &self.state.pending,
            correlation_id,
        };

        self.state.enqueue(
            routing_key,
            correlation_id,
            Some(REPLY_TO_QUEUE.to_string()),
            payload,
        )?;

        match tokio::time::timeout(timeout, reply).await {
            Ok(Ok(payload)) => Ok(payload),
            Ok(Err(_)) => Err(TransportError::Cancelled),
            Err(_) => {
                warn!(
                    routing_key = routing_key,
                    correlation_id = correlation_id,
                    timeout_ms = timeout.as_millis(),
                    "Call timed out"
                );
                Err(TransportError::Timeout(timeout))
            }
        }
    }

    async fn publish(
        &self,
        routing_key: &str,
        correlation_id: &str,
        payload: Vec<u8>,
    ) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.state
            .enqueue(routing_key, correlation_id, None, payload)
    }

    async fn consume(&self, routing_key: &str) -> Result<DeliveryStream, TransportError> {
        self.ensure_open()?;

        let (sender, receiver) = mpsc::channel(self.state.capacity);
        let previous = self.state.queues.write().insert(
            routing_key.to_string(),
            Binding {
                sender,
                channel_id: self.id,
            },
        );
        if previous.is_some() {
            warn!(routing_key = routing_key, "Queue rebound, previous consumer detached");
        }

        info!(routing_key = routing_key, channel_id = self.id, "Queue bound");
        Ok(Box::pin(ReceiverStream::new(receiver)))
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.state
            .queues
            .write()
            .retain(|_, binding| binding.channel_id != self.id);
        debug!(channel_id = self.id, "Channel closed");
    }
}
