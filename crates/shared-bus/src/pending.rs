//! Pending Reply Store - maps correlation ids to callers awaiting a reply.
//!
//! Flow:
//! 1. A channel's `call` registers the correlation id and keeps the receiver
//! 2. The request is published with a reply address
//! 3. The responder's reply calls `complete()`
//! 4. The caller awaits the receiver or times out and calls `cancel()`

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// A caller waiting for a reply.
struct PendingReply {
    /// Channel to deliver the reply payload
    sender: oneshot::Sender<Vec<u8>>,
    /// When the call was registered
    created_at: Instant,
    /// Routing key of the request (for logging)
    routing_key: String,
}

/// Statistics for the pending reply store
#[derive(Debug, Default)]
pub struct PendingStats {
    /// Total calls registered
    pub total_registered: AtomicU64,
    /// Total replies delivered
    pub total_completed: AtomicU64,
    /// Total calls cancelled (timed out or caller dropped)
    pub total_cancelled: AtomicU64,
    /// Replies that matched no pending call
    pub total_orphaned: AtomicU64,
}

/// Pending reply store keyed by correlation id.
#[derive(Default)]
pub struct PendingReplies {
    pending: DashMap<String, PendingReply>,
    stats: PendingStats,
}

impl PendingReplies {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a call and get the receiver its reply will arrive on.
    ///
    /// Registering an id that is already pending replaces the earlier caller,
    /// whose receiver then resolves to an error.
    pub fn register(&self, correlation_id: &str, routing_key: &str) -> oneshot::Receiver<Vec<u8>> {
        let (tx, rx) = oneshot::channel();
        let reply = PendingReply {
            sender: tx,
            created_at: Instant::now(),
            routing_key: routing_key.to_string(),
        };

        if self.pending.insert(correlation_id.to_string(), reply).is_some() {
            warn!(
                correlation_id = correlation_id,
                "Correlation id registered twice; earlier caller dropped"
            );
        }
        self.stats.total_registered.fetch_add(1, Ordering::Relaxed);

        debug!(
            correlation_id = correlation_id,
            routing_key = routing_key,
            "Registered pending reply"
        );

        rx
    }

    /// Deliver a reply.
    ///
    /// Returns false if no caller is waiting (unknown, expired or cancelled id).
    pub fn complete(&self, correlation_id: &str, payload: Vec<u8>) -> bool {
        let Some((_, pending)) = self.pending.remove(correlation_id) else {
            self.stats.total_orphaned.fetch_add(1, Ordering::Relaxed);
            warn!(
                correlation_id = correlation_id,
                "Reply for unknown or expired correlation id"
            );
            return false;
        };

        let elapsed = pending.created_at.elapsed();
        if pending.sender.send(payload).is_err() {
            // Receiver was dropped (call cancelled)
            self.stats.total_cancelled.fetch_add(1, Ordering::Relaxed);
            debug!(
                correlation_id = correlation_id,
                routing_key = pending.routing_key,
                "Pending reply receiver dropped"
            );
            return false;
        }

        self.stats.total_completed.fetch_add(1, Ordering::Relaxed);
        debug!(
            correlation_id = correlation_id,
            routing_key = pending.routing_key,
            response_time_ms = elapsed.as_millis(),
            "Completed pending reply"
        );
        true
    }

    /// Drop a pending call. Returns false if it was not pending.
    pub fn cancel(&self, correlation_id: &str) -> bool {
        if self.pending.remove(correlation_id).is_some() {
            self.stats.total_cancelled.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Drop every call registered longer than `max_age` ago.
    ///
    /// Returns the number of calls removed.
    pub fn expire_older_than(&self, max_age: Duration) -> usize {
        let before = self.pending.len();
        self.pending
            .retain(|_, pending| pending.created_at.elapsed() < max_age);
        let removed = before.saturating_sub(self.pending.len());

        if removed > 0 {
            self.stats
                .total_cancelled
                .fetch_add(removed as u64, Ordering::Relaxed);
            debug!(removed = removed, "Expired stale pending replies");
        }
        removed
    }

    /// Whether a correlation id is awaiting its reply.
    pub fn is_pending(&self, correlation_id: &str) -> bool {
        self.pending.contains_key(correlation_id)
    }

    /// Number of calls awaiting a reply.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Get statistics
    pub fn stats(&self) -> &PendingStats {
        &self.stats
    }
}
