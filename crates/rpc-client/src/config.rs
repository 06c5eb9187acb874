//! Client configuration.

use shared_bus::RoutingMode;
use std::str::FromStr;
use std::time::Duration;

/// Default round-trip timeout.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// What to do with an outbound request that fails validation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutboundValidation {
    /// Log the failure and send the request anyway.
    #[default]
    LogOnly,
    /// Answer with a 400 envelope without sending.
    Enforce,
}

impl FromStr for OutboundValidation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "log" | "log_only" | "log-only" => Ok(Self::LogOnly),
            "enforce" | "strict" => Ok(Self::Enforce),
            other => Err(format!("unknown outbound validation mode: {other}")),
        }
    }
}

/// Configuration for one `RpcClient`.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// This service's identifier, used as `header.src`.
    pub service_name: String,
    /// Target service identifier, used as `header.dst`. Required.
    pub dst_service_name: Option<String>,
    /// How the routing key is derived.
    pub routing: RoutingMode,
    /// Upper bound on connection establishment and on waiting for a reply.
    pub call_timeout: Duration,
    /// Handling of outbound requests that fail validation.
    pub outbound_validation: OutboundValidation,
}

impl ClientConfig {
    /// Configuration for `service_name` talking to `dst_service_name`.
    pub fn new(service_name: impl Into<String>, dst_service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            dst_service_name: Some(dst_service_name.into()),
            ..Self::default()
        }
    }

    /// Set the round-trip timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Set the routing mode.
    #[must_use]
    pub fn with_routing(mut self, routing: RoutingMode) -> Self {
        self.routing = routing;
        self
    }

    /// Set the outbound validation mode.
    #[must_use]
    pub fn with_outbound_validation(mut self, mode: OutboundValidation) -> Self {
        self.outbound_validation = mode;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            service_name: String::new(),
            dst_service_name: None,
            routing: RoutingMode::default(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
            outbound_validation: OutboundValidation::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.call_timeout, Duration::from_secs(5));
        assert_eq!(config.outbound_validation, OutboundValidation::LogOnly);
        assert_eq!(config.routing, RoutingMode::Destination);
        assert!(config.dst_service_name.is_none());
    }

    #[test]
    fn test_outbound_validation_parse() {
        assert_eq!("enforce".parse(), Ok(OutboundValidation::Enforce));
        assert_eq!("LOG".parse(), Ok(OutboundValidation::LogOnly));
        assert!("maybe".parse::<OutboundValidation>().is_err());
    }
}
