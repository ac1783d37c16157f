//! Error types for the relay

use thiserror::Error;

/// Relay-wide error type
///
/// Every variant is scoped to a single request or connection. None of them
/// is allowed to tear down the shared upstream session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    /// Malformed command or unknown currency pair
    #[error("Validation error: {0}")]
    Validation(String),

    /// Subscription cap exceeded
    #[error("{0}")]
    Capacity(String),

    /// Upstream (un)subscribe could not be delivered
    #[error("Upstream transport error: {0}")]
    UpstreamTransport(String),

    /// Client id generation ran out of attempts
    #[error("Cannot generate socket id, connect to server failed")]
    IdentityExhausted,

    /// Time-series store rejected a read or write
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RelayError {
    pub fn validation(msg: impl Into<String>) -> Self {
        RelayError::Validation(msg.into())
    }

    pub fn capacity(msg: impl Into<String>) -> Self {
        RelayError::Capacity(msg.into())
    }

    pub fn upstream(msg: impl Into<String>) -> Self {
        RelayError::UpstreamTransport(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        RelayError::StoreUnavailable(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        RelayError::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        RelayError::Internal(msg.into())
    }
}

/// Result type alias for relay operations
pub type RelayResult<T> = Result<T, RelayError>;
