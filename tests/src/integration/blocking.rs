//! # Blocking Model
//!
//! The consumer loop runs on its own thread via `run_blocking` and the caller
//! uses `BlockingRpcClient`; neither side needs an ambient async runtime.

#[cfg(test)]
mod tests {
    use super::super::harness::{counting_echo, SERVICE_A, SERVICE_B};
    use rpc_client::{BlockingRpcClient, ClientConfig};
    use rpc_consumer::RpcConsumer;
    use serde_json::json;
    use shared_bus::{ConnectionManager, InMemoryBroker};
    use shared_types::{Header, StatusCode};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};
    use tokio::sync::watch;

    fn wait_until_bound(broker: &InMemoryBroker, queue: &str) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !broker.is_bound(queue) {
            assert!(Instant::now() < deadline, "consumer should bind its queue");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_blocking_round_trip() {
        // Arrange: consumer thread
        let broker = InMemoryBroker::new();
        let consumer = Arc::new(RpcConsumer::new(
            Arc::new(counting_echo(Arc::new(AtomicUsize::new(0)))),
            Arc::new(ConnectionManager::new(Arc::new(broker.clone()))),
            SERVICE_B,
        ));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = {
            let consumer = Arc::clone(&consumer);
            thread::spawn(move || consumer.run_blocking(shutdown_rx))
        };
        wait_until_bound(&broker, SERVICE_B);

        // Act
        let client = BlockingRpcClient::new(
            Arc::new(ConnectionManager::new(Arc::new(broker.clone()))),
            ClientConfig::new(SERVICE_A, SERVICE_B),
        )
        .unwrap();
        let response = client.send("echo", json!({"x": 1}));
        let unknown = client.send("unknown", json!({}));

        // Assert
        assert!(response.is_success());
        assert_eq!(response.header, Header::new(SERVICE_B, SERVICE_A));
        assert_eq!(response.body, json!({"x": 1}));
        assert_eq!(unknown.status_code(), Some(&StatusCode::Http(400)));

        shutdown_tx.send(true).unwrap();
        worker.join().unwrap().unwrap();
        assert!(!broker.is_bound(SERVICE_B));
    }

    #[test]
    fn test_blocking_client_without_consumer() {
        let broker = InMemoryBroker::new();
        let client = BlockingRpcClient::new(
            Arc::new(ConnectionManager::new(Arc::new(broker))),
            ClientConfig::new(SERVICE_A, SERVICE_B).with_timeout(Duration::from_millis(50)),
        )
        .unwrap();

        let response = client.send("echo", json!({}));
        assert_eq!(response.status_code(), Some(&StatusCode::Http(500)));
    }
}
