//! # Node Configuration
//!
//! Broker settings and service identity, with defaults that can be
//! overridden from the environment.
//!
//! | Variable | Default |
//! |---|---|
//! | `RPC_QUEUE_CAPACITY` | `1000` |
//! | `RPC_SERVICE_NAME` | `rpc-node` |
//! | `RPC_QUEUE_NAME` | the service name |
//! | `RPC_DST_SERVICE_NAME` | unset |
//! | `RPC_ROUTING_MODE` | `destination` |
//! | `RPC_CALL_TIMEOUT_MS` | `5000` |
//! | `RPC_OUTBOUND_VALIDATION` | `log` |
//!
//! With `RPC_ROUTING_MODE=request_type` the node binds one queue per
//! registered request type and `RPC_QUEUE_NAME` is ignored.

use rpc_client::{ClientConfig, OutboundValidation, DEFAULT_CALL_TIMEOUT};
use shared_bus::{RoutingMode, DEFAULT_CHANNEL_CAPACITY};
use std::time::Duration;
use thiserror::Error;

/// Complete node configuration.
#[derive(Debug, Clone, Default)]
pub struct NodeConfig {
    /// Broker settings.
    pub broker: BrokerConfig,
    /// Service identity and call behaviour.
    pub service: ServiceConfig,
}

/// Settings of the in-process broker.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Deliveries buffered per bound queue before messages are refused.
    pub queue_capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Service identity and call behaviour.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// This service's identifier.
    pub name: String,
    /// Queue the consumer binds under destination routing; `None` means the
    /// service name.
    pub queue: Option<String>,
    /// Target of outbound calls, if this service makes any.
    pub dst_service_name: Option<String>,
    /// Routing key derivation, shared by client and consumer.
    pub routing: RoutingMode,
    /// Round-trip timeout.
    pub call_timeout: Duration,
    /// Handling of outbound requests that fail validation.
    pub outbound_validation: OutboundValidation,
}

impl ServiceConfig {
    /// The queue the consumer binds under destination routing.
    #[must_use]
    pub fn queue_name(&self) -> &str {
        self.queue.as_deref().unwrap_or(&self.name)
    }

    /// Queues to consume so that clients using the same routing mode reach
    /// this node: the service queue, or one queue per served request type.
    #[must_use]
    pub fn consumer_queues(&self, request_types: &[String]) -> Vec<String> {
        match self.routing {
            RoutingMode::Destination => vec![self.queue_name().to_string()],
            RoutingMode::RequestType => request_types.to_vec(),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "rpc-node".to_string(),
            queue: None,
            dst_service_name: None,
            routing: RoutingMode::Destination,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            outbound_validation: OutboundValidation::LogOnly,
        }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// An environment variable holds an unparseable value.
    #[error("invalid value for {key}: `{value}`")]
    InvalidValue {
        /// Variable name.
        key: &'static str,
        /// Offending value.
        value: String,
    },
    /// Service name is empty.
    #[error("service name must not be empty")]
    EmptyServiceName,
    /// Queue capacity is zero.
    #[error("queue capacity must be greater than zero")]
    ZeroCapacity,
    /// Call timeout is zero.
    #[error("call timeout must be greater than zero")]
    ZeroTimeout,
}

impl NodeConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(capacity) = get("RPC_QUEUE_CAPACITY") {
            config.broker.queue_capacity = parse("RPC_QUEUE_CAPACITY", &capacity)?;
        }

        if let Some(name) = get("RPC_SERVICE_NAME") {
            config.service.name = name;
        }
        config.service.queue = get("RPC_QUEUE_NAME");
        config.service.dst_service_name = get("RPC_DST_SERVICE_NAME");
        if let Some(mode) = get("RPC_ROUTING_MODE") {
            config.service.routing = parse("RPC_ROUTING_MODE", &mode)?;
        }
        if let Some(ms) = get("RPC_CALL_TIMEOUT_MS") {
            config.service.call_timeout =
                Duration::from_millis(parse("RPC_CALL_TIMEOUT_MS", &ms)?);
        }
        if let Some(mode) = get("RPC_OUTBOUND_VALIDATION") {
            config.service.outbound_validation = parse("RPC_OUTBOUND_VALIDATION", &mode)?;
        }

        Ok(config)
    }

    /// Check the configuration is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service.name.trim().is_empty() {
            return Err(ConfigError::EmptyServiceName);
        }
        if self.service.call_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.broker.queue_capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        Ok(())
    }

    /// Client configuration, if an outbound target is configured.
    #[must_use]
    pub fn client_config(&self) -> Option<ClientConfig> {
        let dst = self.service.dst_service_name.as_ref()?;
        Some(
            ClientConfig::new(self.service.name.as_str(), dst.as_str())
                .with_routing(self.service.routing)
                .with_timeout(self.service.call_timeout)
                .with_outbound_validation(self.service.outbound_validation),
        )
    }
}

fn parse<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })
}
