//! # Node Runtime
//!
//! ## Startup Sequence
//!
//! 1. Build the dispatcher with the built-in handlers
//! 2. Open the broker and the shared connection manager
//! 3. Spawn one consumer per queue the routing mode requires
//! 4. Spawn the pending-reply sweeper
//! 5. Optionally run a self-check round-trip against the configured target
//!
//! ## Shutdown Sequence
//!
//! 1. Signal consumers and sweeper through the watch channel
//! 2. Wait (bounded) for the consumers to release their channel
//! 3. Close the shared connection and report leftover dead letters

use crate::config::NodeConfig;
use crate::handlers::builtin_dispatcher;
use anyhow::{Context, Result};
use rpc_client::RpcClient;
use rpc_consumer::{ConsumerError, RpcConsumer};
use rpc_dispatcher::Dispatcher;
use serde_json::json;
use shared_bus::{ConnectionManager, InMemoryBroker};
use shared_types::Envelope;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Upper bound on waiting for the consumers to stop.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Floor for the pending-reply sweep period.
const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(10);

/// A running service: consumers, shared connection and shutdown signal.
pub struct NodeRuntime {
    config: NodeConfig,
    broker: InMemoryBroker,
    connection: Arc<ConnectionManager>,
    consumers: Vec<Arc<RpcConsumer>>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<Result<(), ConsumerError>>>>,
}

impl NodeRuntime {
    /// Create a runtime serving the built-in handlers.
    pub fn new(config: NodeConfig) -> Self {
        let dispatcher = builtin_dispatcher(&config.service.name);
        Self::with_dispatcher(config, dispatcher)
    }

    /// Create a runtime serving `dispatcher`.
    pub fn with_dispatcher(config: NodeConfig, dispatcher: Dispatcher) -> Self {
        let queues = config.service.consumer_queues(&dispatcher.request_types());
        info!(
            service = %config.service.name,
            routing = ?config.service.routing,
            queues = ?queues,
            queue_capacity = config.broker.queue_capacity,
            "Creating node runtime"
        );

        let broker = InMemoryBroker::with_capacity(config.broker.queue_capacity);
        let connection = Arc::new(ConnectionManager::new(Arc::new(broker.clone())));
        let dispatcher = Arc::new(dispatcher);
        let consumers = queues
            .into_iter()
            .map(|queue| {
                Arc::new(RpcConsumer::new(
                    Arc::clone(&dispatcher),
                    Arc::clone(&connection),
                    queue,
                ))
            })
            .collect();
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            config,
            broker,
            connection,
            consumers,
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Node configuration.
    #[must_use]
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// The broker this node is attached to.
    #[must_use]
    pub fn broker(&self) -> &InMemoryBroker {
        &self.broker
    }

    /// The shared connection manager.
    #[must_use]
    pub fn connection(&self) -> Arc<ConnectionManager> {
        Arc::clone(&self.connection)
    }

    /// Queues this node consumes.
    #[must_use]
    pub fn queues(&self) -> Vec<&str> {
        self.consumers.iter().map(|c| c.queue()).collect()
    }

    /// Spawn the consumers and wait until all their queues are bound.
    pub async fn start(&self) -> Result<()> {
        let mut tasks = self.tasks.lock().await;
        if !tasks.is_empty() {
            warn!("Node runtime already started");
            return Ok(());
        }

        for consumer in &self.consumers {
            let consumer = Arc::clone(consumer);
            let shutdown = self.shutdown_tx.subscribe();
            tasks.push(tokio::spawn(async move { consumer.run(shutdown).await }));
        }

        let timeout = self.config.service.call_timeout;
        tokio::spawn(sweep_pending(
            self.broker.clone(),
            timeout.max(MIN_SWEEP_INTERVAL),
            timeout * 2,
            self.shutdown_tx.subscribe(),
        ));

        tokio::time::timeout(timeout, async {
            while !self.queues().iter().all(|queue| self.broker.is_bound(queue)) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .context("Consumers did not bind their queues in time")?;

        info!(queues = ?self.queues(), "Node runtime started");
        Ok(())
    }

    /// Client for the configured target service, if there is one.
    pub fn client(&self) -> Result<Option<RpcClient>> {
        self.config
            .client_config()
            .map(|config| {
                RpcClient::new(self.connection(), config).context("Failed to create RPC client")
            })
            .transpose()
    }

    /// Send a `ping` to the configured target and log the outcome.
    ///
    /// Returns `None` when no target is configured.
    pub async fn self_check(&self) -> Result<Option<Envelope>> {
        let Some(client) = self.client()? else {
            return Ok(None);
        };

        let response = client
            .send("ping", json!({"nonce": self.config.service.name}))
            .await;
        if response.is_success() {
            info!(dst = %client.destination(), body = %response.body, "Self-check succeeded");
        } else {
            warn!(
                dst = %client.destination(),
                status = ?response.status_code(),
                message = response.status_message().unwrap_or_default(),
                "Self-check failed"
            );
        }
        Ok(Some(response))
    }

    /// Stop the consumers and release the connection.
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown...");

        if let Err(e) = self.shutdown_tx.send(true) {
            // No receiver left: every task has already stopped
            warn!("Shutdown signal had no receiver: {}", e);
        }

        let tasks: Vec<_> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            match tokio::time::timeout(SHUTDOWN_GRACE, task).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => error!("Consumer stopped with error: {}", e),
                Ok(Err(e)) => error!("Consumer task failed: {}", e),
                Err(_) => warn!("Consumer did not stop within {:?}", SHUTDOWN_GRACE),
            }
        }

        self.connection.close().await;

        let dead_letters = self.broker.take_dead_letters();
        if !dead_letters.is_empty() {
            warn!(count = dead_letters.len(), "Discarding unprocessed dead letters");
        }
        info!("Shutdown complete");
    }
}

/// Periodically drop pending replies whose caller can no longer be waiting.
async fn sweep_pending(
    broker: InMemoryBroker,
    interval: Duration,
    max_age: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let removed = broker.pending().expire_older_than(max_age);
                if removed > 0 {
                    debug!(removed = removed, "Swept stale pending replies");
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_bus::RoutingMode;

    fn config(name: &str, dst: Option<&str>) -> NodeConfig {
        let mut config = NodeConfig::default();
        config.service.name = name.to_string();
        config.service.dst_service_name = dst.map(str::to_string);
        config.service.call_timeout = Duration::from_millis(500);
        config
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let runtime = NodeRuntime::new(config("svc-a", None));
        runtime.start().await.unwrap();
        assert!(runtime.broker().is_bound("svc-a"));

        runtime.shutdown().await;
        assert!(!runtime.broker().is_bound("svc-a"));
    }

    #[tokio::test]
    async fn test_self_check_against_own_queue() {
        let runtime = NodeRuntime::new(config("svc-a", Some("svc-a")));
        runtime.start().await.unwrap();

        let response = runtime.self_check().await.unwrap().unwrap();
        assert!(response.is_success());
        assert_eq!(response.body["service"], "svc-a");

        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_request_type_routing_binds_every_handler() {
        let mut config = config("svc-a", Some("svc-a"));
        config.service.routing = RoutingMode::RequestType;
        let runtime = NodeRuntime::new(config);
        assert_eq!(runtime.queues(), vec!["echo", "ping"]);

        runtime.start().await.unwrap();
        assert!(runtime.broker().is_bound("echo"));
        assert!(runtime.broker().is_bound("ping"));
        assert!(!runtime.broker().is_bound("svc-a"));

        let response = runtime.self_check().await.unwrap().unwrap();
        assert!(response.is_success());
        assert_eq!(response.body["pong"], true);

        let client = runtime.client().unwrap().unwrap();
        let echoed = client.send("echo", json!({"x": 1})).await;
        assert_eq!(echoed.body, json!({"x": 1}));

        runtime.shutdown().await;
        assert!(!runtime.broker().is_bound("echo"));
        assert!(!runtime.broker().is_bound("ping"));
    }

    #[tokio::test]
    async fn test_queue_capacity_reaches_broker() {
        let mut config = config("svc-a", None);
        config.broker.queue_capacity = 7;
        let runtime = NodeRuntime::new(config);
        assert_eq!(runtime.broker().capacity(), 7);
    }

    #[tokio::test]
    async fn test_stale_pending_replies_are_swept() {
        let mut config = config("svc-a", None);
        config.service.call_timeout = Duration::from_millis(50);
        let runtime = NodeRuntime::new(config);
        runtime.start().await.unwrap();

        let _abandoned = runtime.broker().pending().register("stale", "svc-b");
        tokio::time::timeout(Duration::from_secs(2), async {
            while runtime.broker().pending().is_pending("stale") {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_self_check_without_target() {
        let runtime = NodeRuntime::new(config("svc-a", None));
        assert!(runtime.self_check().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_self_check_unreachable_target() {
        let runtime = NodeRuntime::new(config("svc-a", Some("svc-b")));
        runtime.start().await.unwrap();

        let response = runtime.self_check().await.unwrap().unwrap();
        assert!(!response.is_success());

        runtime.shutdown().await;
    }
}
