//! # Round-Trip Flows
//!
//! Service A calls service B through the in-memory broker:
//!
//! ```text
//! RpcClient(A) ──call──→ Broker ──delivery──→ RpcConsumer(B) ──→ Dispatcher
//!      ↑                                           │
//!      └────────────── reply(correlation id) ──────┘
//! ```

#[cfg(test)]
mod tests {
    use super::super::harness::{counting_echo, Harness, SERVICE_A, SERVICE_B};
    use rpc_node::builtin_dispatcher;
    use serde_json::json;
    use shared_types::{Header, StatusCode};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_echo_round_trip() {
        // Arrange
        let calls = Arc::new(AtomicUsize::new(0));
        let harness = Harness::start(counting_echo(Arc::clone(&calls))).await;
        let client = harness.client();

        // Act
        let request = client.make_request("echo", json!({"x": 1}));
        let request_id = request.request_id.clone();
        let response = client.send_request(request).await;

        // Assert
        assert_eq!(response.request_type, "echo");
        assert_eq!(response.request_id, request_id);
        assert_eq!(response.header, Header::new(SERVICE_B, SERVICE_A));
        assert_eq!(response.body, json!({"x": 1}));
        assert_eq!(response.status_message(), Some("OK"));
        assert_eq!(response.status_code(), Some(&StatusCode::Http(200)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        harness.stop().await;
    }

    #[tokio::test]
    async fn test_request_ids_are_fresh_hex_tokens() {
        let harness = Harness::start(counting_echo(Arc::new(AtomicUsize::new(0)))).await;
        let client = harness.client();

        let first = client.send("echo", json!({})).await;
        let second = client.send("echo", json!({})).await;

        assert_ne!(first.request_id, second.request_id);
        for id in [&first.request_id, &second.request_id] {
            assert_eq!(id.len(), 32);
            assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        }

        harness.stop().await;
    }

    #[tokio::test]
    async fn test_concurrent_requests_are_correlated() {
        let harness = Harness::start(counting_echo(Arc::new(AtomicUsize::new(0)))).await;
        let client = Arc::new(harness.client());

        let mut tasks = Vec::new();
        for n in 0..16 {
            let client = Arc::clone(&client);
            tasks.push(tokio::spawn(async move {
                let request = client.make_request("echo", json!({"n": n}));
                let request_id = request.request_id.clone();
                (n, request_id, client.send_request(request).await)
            }));
        }

        let mut seen = HashSet::new();
        for task in tasks {
            let (n, request_id, response) = task.await.unwrap();
            assert!(response.is_success());
            assert_eq!(response.request_id, request_id);
            assert_eq!(response.body, json!({"n": n}));
            seen.insert(request_id);
        }
        assert_eq!(seen.len(), 16);
        assert_eq!(harness.broker.pending().pending_count(), 0);

        harness.stop().await;
    }

    #[tokio::test]
    async fn test_typed_ping_handler() {
        let harness = Harness::start(builtin_dispatcher(SERVICE_B)).await;
        let client = harness.client();

        let response = client.send("Ping", json!({"nonce": "abc"})).await;

        assert!(response.is_success());
        assert_eq!(response.request_type, "Ping");
        assert_eq!(
            response.body,
            json!({"pong": true, "service": SERVICE_B, "nonce": "abc"})
        );

        harness.stop().await;
    }

    #[tokio::test]
    async fn test_call_after_consumer_stops() {
        let harness = Harness::start(counting_echo(Arc::new(AtomicUsize::new(0)))).await;
        let client = harness.client();
        assert!(client.send("echo", json!({})).await.is_success());
        let broker = harness.broker.clone();
        harness.stop().await;

        // Nothing bound: the call fails but the client stays usable
        let response = client.send("echo", json!({})).await;
        assert_eq!(response.status_code(), Some(&StatusCode::Http(500)));
        assert!(!broker.is_bound(SERVICE_B));
    }
}
