//! Two services sharing one in-memory broker.
//!
//! Service "B" consumes its own queue with a given dispatcher; clients are
//! built for service "A" with their own connection, the way a separate
//! process would hold one.

use rpc_client::{ClientConfig, RpcClient};
use rpc_consumer::{ConsumerError, RpcConsumer};
use rpc_dispatcher::{handler_fn, Dispatcher};
use shared_bus::{ConnectionManager, InMemoryBroker};
use shared_types::{Envelope, HandlerError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;

pub const SERVICE_A: &str = "A";
pub const SERVICE_B: &str = "B";
pub const WAIT: Duration = Duration::from_secs(2);

pub struct Harness {
    pub broker: InMemoryBroker,
    pub consumer: Arc<RpcConsumer>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<Result<(), ConsumerError>>,
}

impl Harness {
    /// Start service B's consumer and wait for its queue binding.
    pub async fn start(dispatcher: Dispatcher) -> Self {
        let broker = InMemoryBroker::new();
        let connection = Arc::new(ConnectionManager::new(Arc::new(broker.clone())));
        let consumer = Arc::new(RpcConsumer::new(
            Arc::new(dispatcher),
            connection,
            SERVICE_B,
        ));

        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn({
            let consumer = Arc::clone(&consumer);
            async move { consumer.run(shutdown_rx).await }
        });

        timeout(WAIT, async {
            while !broker.is_bound(SERVICE_B) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("consumer should bind its queue");

        Self {
            broker,
            consumer,
            shutdown,
            task,
        }
    }

    /// Client for service A targeting service B.
    pub fn client(&self) -> RpcClient {
        self.client_with(ClientConfig::new(SERVICE_A, SERVICE_B))
    }

    pub fn client_with(&self, config: ClientConfig) -> RpcClient {
        let connection = Arc::new(ConnectionManager::new(Arc::new(self.broker.clone())));
        RpcClient::new(connection, config).expect("valid client config")
    }

    /// Stop the consumer and wait for it to release the queue.
    pub async fn stop(self) {
        self.shutdown.send(true).expect("consumer is listening");
        timeout(WAIT, self.task)
            .await
            .expect("consumer should stop")
            .expect("consumer task should not panic")
            .expect("consumer should exit cleanly");
    }
}

/// Dispatcher serving `echo` and counting handler invocations.
pub fn counting_echo(calls: Arc<AtomicUsize>) -> Dispatcher {
    Dispatcher::builder()
        .with_handler(handler_fn("echo", move |req: &Envelope| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(req.body.clone())
        }))
        .with_handler(handler_fn("fail", |_: &Envelope| {
            Err(HandlerError::domain("account frozen"))
        }))
        .build()
}
