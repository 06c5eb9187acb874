//! Blocking client for callers that are not running inside an async runtime.
//!
//! Runs the same pipeline as `RpcClient` on a private current-thread runtime.
//! Must not be called from within another tokio runtime.

use crate::client::RpcClient;
use crate::config::ClientConfig;
use crate::error::ClientError;
use serde_json::Value;
use shared_bus::ConnectionManager;
use shared_types::{Envelope, RpcError};
use std::sync::Arc;
use tokio::runtime::{Builder, Runtime};

/// `RpcClient` that blocks the calling thread for each round-trip.
pub struct BlockingRpcClient {
    runtime: Runtime,
    client: RpcClient,
}

impl BlockingRpcClient {
    /// Create a blocking client.
    ///
    /// # Errors
    ///
    /// Same as `RpcClient::new`, plus `ClientError::Runtime` if the private
    /// runtime cannot be started.
    pub fn new(
        connection: Arc<ConnectionManager>,
        config: ClientConfig,
    ) -> Result<Self, ClientError> {
        let client = RpcClient::new(connection, config)?;
        let runtime = Builder::new_current_thread().enable_all().build()?;
        Ok(Self { runtime, client })
    }

    /// The wrapped async client.
    #[must_use]
    pub fn inner(&self) -> &RpcClient {
        &self.client
    }

    /// Send a request and block until its response (or a 500 envelope).
    pub fn send(&self, request_type: &str, body: Value) -> Envelope {
        self.runtime.block_on(self.client.send(request_type, body))
    }

    /// Send a pre-built request and block until its response.
    pub fn send_request(&self, request: Envelope) -> Envelope {
        self.runtime.block_on(self.client.send_request(request))
    }

    /// Publish without waiting for a response.
    pub fn post_message(&self, request_type: &str, body: Value) -> Result<String, RpcError> {
        self.runtime
            .block_on(self.client.post_message(request_type, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shared_bus::{Broker, InMemoryBroker};
    use shared_types::{decode_envelope, encode, StatusCode};
    use tokio_stream::StreamExt;

    #[test]
    fn test_blocking_round_trip() {
        let broker = InMemoryBroker::new();

        // Responder lives on its own runtime
        let responder_rt = tokio::runtime::Runtime::new().unwrap();
        let channel = responder_rt.block_on(broker.connect()).unwrap();
        let mut deliveries = responder_rt.block_on(channel.consume("svc-b")).unwrap();
        responder_rt.spawn(async move {
            let _channel = channel;
            while let Some(delivery) = deliveries.next().await {
                let request = decode_envelope(delivery.payload()).unwrap();
                let response =
                    Envelope::response_to(&request, request.header.swapped(), json!({"pong": true}));
                delivery.reply(encode(&response).unwrap()).await.unwrap();
                delivery.ack().await.unwrap();
            }
        });

        let connection = Arc::new(ConnectionManager::new(Arc::new(broker)));
        let client =
            BlockingRpcClient::new(connection, ClientConfig::new("svc-a", "svc-b")).unwrap();

        let response = client.send("ping", json!({}));
        assert!(response.is_success());
        assert_eq!(response.body, json!({"pong": true}));
    }

    #[test]
    fn test_blocking_unreachable_broker() {
        let broker = InMemoryBroker::new();
        broker.set_available(false);
        let connection = Arc::new(ConnectionManager::new(Arc::new(broker)));
        let client =
            BlockingRpcClient::new(connection, ClientConfig::new("svc-a", "svc-b")).unwrap();

        let response = client.send("ping", json!({}));
        assert_eq!(response.status_code(), Some(&StatusCode::Http(500)));
    }
}
