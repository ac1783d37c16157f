//! Error types for the Bitstamp feed client

use std::time::Duration;

use thiserror::Error;
use ticker_core::RelayError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BitstampError {
    #[error("feed client not started")]
    NotStarted,

    #[error("feed not connected")]
    NotConnected,

    #[error("feed command timed out after {0:?}")]
    Timeout(Duration),

    #[error("failed to send to feed: {0}")]
    Send(String),

    #[error("feed connection task stopped")]
    ChannelClosed,

    #[error("invalid feed message: {0}")]
    Parse(String),
}

impl From<BitstampError> for RelayError {
    fn from(err: BitstampError) -> Self {
        RelayError::upstream(err.to_string())
    }
}
