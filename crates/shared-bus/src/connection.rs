//! # Connection Manager
//!
//! Holds the single broker channel of a process. The channel is opened on
//! first use, reused by every later call and reopened when it is found closed.

use crate::broker::{Broker, BrokerChannel};
use shared_types::TransportError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Lazily (re)connecting owner of the process-wide broker channel.
pub struct ConnectionManager {
    broker: Arc<dyn Broker>,
    channel: Mutex<Option<Arc<dyn BrokerChannel>>>,
    connections_opened: AtomicU64,
}

impl ConnectionManager {
    /// Create a manager for `broker`. No connection is made yet.
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self {
            broker,
            channel: Mutex::new(None),
            connections_opened: AtomicU64::new(0),
        }
    }

    /// Get the shared channel, connecting if none is held or the held one
    /// has been closed.
    ///
    /// Concurrent callers wait on the same connection attempt.
    pub async fn channel(&self) -> Result<Arc<dyn BrokerChannel>, TransportError> {
        let mut held = self.channel.lock().await;

        if let Some(channel) = held.as_ref() {
            if !channel.is_closed() {
                return Ok(Arc::clone(channel));
            }
            debug!("Held channel is closed, reconnecting");
        }

        let channel = self.broker.connect().await?;
        let count = self.connections_opened.fetch_add(1, Ordering::Relaxed) + 1;
        info!(connections_opened = count, "Broker channel established");

        *held = Some(Arc::clone(&channel));
        Ok(channel)
    }

    /// Whether an open channel is currently held.
    pub async fn is_connected(&self) -> bool {
        self.channel
            .lock()
            .await
            .as_ref()
            .is_some_and(|channel| !channel.is_closed())
    }

    /// Close and release the held channel, if any.
    pub async fn close(&self) {
        let channel = self.channel.lock().await.take();
        if let Some(channel) = channel {
            channel.close().await;
            info!("Broker channel released");
        }
    }

    /// Number of channels opened over the manager's lifetime.
    #[must_use]
    pub fn connections_opened(&self) -> u64 {
        self.connections_opened.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBroker;

    #[tokio::test]
    async fn test_channel_is_reused() {
        let manager = ConnectionManager::new(Arc::new(InMemoryBroker::new()));
        assert!(!manager.is_connected().await);

        let first = manager.channel().await.unwrap();
        let second = manager.channel().await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(manager.connections_opened(), 1);
        assert!(manager.is_connected().await);
    }

    #[tokio::test]
    async fn test_reconnects_after_close() {
        let manager = ConnectionManager::new(Arc::new(InMemoryBroker::new()));

        let first = manager.channel().await.unwrap();
        first.close().await;

        let second = manager.channel().await.unwrap();
        assert!(!second.is_closed());
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(manager.connections_opened(), 2);
    }

    #[tokio::test]
    async fn test_close_releases_channel() {
        let manager = ConnectionManager::new(Arc::new(InMemoryBroker::new()));
        let channel = manager.channel().await.unwrap();

        manager.close().await;
        assert!(channel.is_closed());
        assert!(!manager.is_connected().await);

        // Closing twice is harmless
        manager.close().await;
    }

    #[tokio::test]
    async fn test_unavailable_broker() {
        let broker = InMemoryBroker::new();
        broker.set_available(false);
        let manager = ConnectionManager::new(Arc::new(broker.clone()));

        assert!(matches!(
            manager.channel().await,
            Err(TransportError::Unavailable(_))
        ));

        broker.set_available(true);
        assert!(manager.channel().await.is_ok());
    }
}
