//! Client construction errors.
//!
//! Calls themselves never fail; see `RpcClient::send`.

use thiserror::Error;

/// Errors raised while building a client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// No target service configured.
    #[error("dst_service_name is not configured")]
    MissingDestination,

    /// No own service identifier configured.
    #[error("service_name is not configured")]
    MissingServiceName,

    /// The blocking client could not start its runtime.
    #[error("failed to start client runtime: {0}")]
    Runtime(#[from] std::io::Error),
}
