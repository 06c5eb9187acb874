//! # Failure Flows
//!
//! | Fault | Outcome |
//! |---|---|
//! | unknown request type | 400 envelope |
//! | handler error | 400 envelope with the handler's message |
//! | broker unreachable / no consumer / timeout | 500 envelope from the client |
//! | undecodable payload | delivery rejected, no reply |
//! | structurally invalid request | delivery rejected, handler not invoked |

#[cfg(test)]
mod tests {
    use super::super::harness::{counting_echo, Harness, SERVICE_A, SERVICE_B, WAIT};
    use rpc_client::{ClientConfig, OutboundValidation, RpcClient};
    use rpc_dispatcher::{handler_fn, Dispatcher};
    use serde_json::json;
    use shared_bus::{Broker, ConnectionManager, InMemoryBroker, TransportError};
    use shared_types::{encode, Envelope, Header, StatusCode};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::timeout;

    async fn wait_for_dead_letters(broker: &InMemoryBroker, count: usize) {
        timeout(WAIT, async {
            while broker.dead_letters().len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("delivery should be rejected");
    }

    #[tokio::test]
    async fn test_unknown_request_type() {
        let harness = Harness::start(counting_echo(Arc::new(AtomicUsize::new(0)))).await;
        let client = harness.client();

        let request = client.make_request("unknown", json!({}));
        let request_id = request.request_id.clone();
        let response = client.send_request(request).await;

        assert_eq!(response.status_code(), Some(&StatusCode::Http(400)));
        assert_eq!(
            response.status_message(),
            Some("Can't handle this request type: `unknown`")
        );
        assert_eq!(response.request_id, request_id);
        assert_eq!(response.header, Header::new(SERVICE_B, SERVICE_A));

        harness.stop().await;
    }

    #[tokio::test]
    async fn test_handler_error() {
        let harness = Harness::start(counting_echo(Arc::new(AtomicUsize::new(0)))).await;
        let client = harness.client();

        let response = client.send("fail", json!({})).await;

        assert_eq!(response.status_code(), Some(&StatusCode::Http(400)));
        assert_eq!(response.status_message(), Some("account frozen"));
        assert_eq!(response.request_type, "fail");
        assert!(response.validate_post().is_ok());

        harness.stop().await;
    }

    #[tokio::test]
    async fn test_unreachable_broker() {
        let broker = InMemoryBroker::new();
        broker.set_available(false);
        let connection = Arc::new(ConnectionManager::new(Arc::new(broker)));
        let client = RpcClient::new(connection, ClientConfig::new(SERVICE_A, SERVICE_B)).unwrap();

        let request = client.make_request("echo", json!({}));
        let request_id = request.request_id.clone();
        let response = client.send_request(request).await;

        assert_eq!(response.status_code(), Some(&StatusCode::Http(500)));
        assert_eq!(response.request_id, request_id);
        assert_eq!(response.request_type, "echo");
        assert!(response
            .status_message()
            .is_some_and(|m| m.contains("unavailable")));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_slow_handler_times_out() {
        let dispatcher = Dispatcher::builder()
            .with_handler(handler_fn("slow", |_: &Envelope| {
                std::thread::sleep(Duration::from_millis(200));
                Ok(json!({}))
            }))
            .build();
        let harness = Harness::start(dispatcher).await;
        let client = harness.client_with(
            ClientConfig::new(SERVICE_A, SERVICE_B).with_timeout(Duration::from_millis(50)),
        );

        let response = client.send("slow", json!({})).await;

        assert_eq!(response.status_code(), Some(&StatusCode::Http(500)));
        assert!(response
            .status_message()
            .is_some_and(|m| m.contains("Timed out")));

        harness.stop().await;
    }

    #[tokio::test]
    async fn test_malformed_payload_is_rejected() {
        let calls = Arc::new(AtomicUsize::new(0));
        let harness = Harness::start(counting_echo(Arc::clone(&calls))).await;
        let raw = harness.broker.connect().await.unwrap();

        // A correlated call gets no reply at all
        let err = raw
            .call(SERVICE_B, "c1", b"{not json".to_vec(), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Timeout(_)));

        wait_for_dead_letters(&harness.broker, 1).await;
        assert_eq!(harness.broker.stats().acked.load(Ordering::Relaxed), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        harness.stop().await;
    }

    #[tokio::test]
    async fn test_invalid_request_skips_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let harness = Harness::start(counting_echo(Arc::clone(&calls))).await;
        let raw = harness.broker.connect().await.unwrap();

        let payload = serde_json::to_vec(&json!({
            "request_type": "echo",
            "request_id": "r1",
            "header": {"dst": SERVICE_B},
            "body": {}
        }))
        .unwrap();
        raw.publish(SERVICE_B, "r1", payload).await.unwrap();

        wait_for_dead_letters(&harness.broker, 1).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(harness.consumer.stats().rejected.load(Ordering::Relaxed), 1);

        // The consumer keeps serving well-formed requests afterwards
        let response = harness.client().send("echo", json!({"ok": true})).await;
        assert!(response.is_success());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        harness.stop().await;
    }

    #[tokio::test]
    async fn test_enforced_outbound_validation() {
        let calls = Arc::new(AtomicUsize::new(0));
        let harness = Harness::start(counting_echo(Arc::clone(&calls))).await;
        let client = harness.client_with(
            ClientConfig::new(SERVICE_A, SERVICE_B)
                .with_outbound_validation(OutboundValidation::Enforce),
        );

        let response = client.send("", json!({})).await;

        assert_eq!(response.status_code(), Some(&StatusCode::Http(400)));
        assert_eq!(harness.broker.stats().published.load(Ordering::Relaxed), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        harness.stop().await;
    }

    #[tokio::test]
    async fn test_error_envelopes_are_acknowledged() {
        let harness = Harness::start(counting_echo(Arc::new(AtomicUsize::new(0)))).await;
        let raw = harness.broker.connect().await.unwrap();

        let request = Envelope::request_with_id("r7", "unknown", SERVICE_A, SERVICE_B, json!({}));
        let reply = raw
            .call(SERVICE_B, "r7", encode(&request).unwrap(), WAIT)
            .await
            .unwrap();
        let response = shared_types::decode_envelope(&reply).unwrap();
        assert_eq!(response.status_code(), Some(&StatusCode::Http(400)));

        let broker = harness.broker.clone();
        harness.stop().await;
        assert_eq!(broker.stats().acked.load(Ordering::Relaxed), 1);
        assert!(broker.dead_letters().is_empty());
    }
}
