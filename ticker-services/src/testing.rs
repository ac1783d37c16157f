//! Test doubles shared by unit tests

use std::collections::HashSet;

use async_trait::async_trait;
use parking_lot::Mutex;
use ticker_core::{CurrencyPair, RelayError, RelayResult};

use crate::UpstreamFeed;

/// Upstream action recorded by [`RecordingFeed`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    Subscribe(CurrencyPair),
    Unsubscribe(CurrencyPair),
}

/// Upstream feed that records every request and fails on demand
#[derive(Debug, Default)]
pub struct RecordingFeed {
    calls: Mutex<Vec<Call>>,
    failing: Mutex<HashSet<CurrencyPair>>,
}

impl RecordingFeed {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn fail_on(&self, pair: CurrencyPair) {
        self.failing.lock().insert(pair);
    }

    fn record(&self, call: Call, pair: CurrencyPair) -> RelayResult<()> {
        self.calls.lock().push(call);
        if self.failing.lock().contains(&pair) {
            return Err(RelayError::upstream(format!("send failed for {}", pair)));
        }
        Ok(())
    }
}

#[async_trait]
impl UpstreamFeed for RecordingFeed {
    async fn subscribe(&self, pair: CurrencyPair) -> RelayResult<()> {
        self.record(Call::Subscribe(pair), pair)
    }

    async fn unsubscribe(&self, pair: CurrencyPair) -> RelayResult<()> {
        self.record(Call::Unsubscribe(pair), pair)
    }
}
