//! In-memory time-series store with per-bucket TTL
//!
//! Values live in buckets addressed by `"<series>:<key>"`. Each bucket is
//! kept sorted by event timestamp and expires as a whole `ttl` after its
//! last write. Expiry runs as a scheduled task owned by the bucket; deleting
//! the bucket early aborts it.
//!
//! Retention inside a live bucket is a store policy: entries that fall more
//! than `ttl` behind the bucket's newest timestamp are aged out as part of
//! the next write.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

use ticker_core::{RelayError, RelayResult};

/// Series holding raw trades
pub const SERIES_TRADE: &str = "trade";

/// Series holding computed OHLC bars
pub const SERIES_OHLC: &str = "ohlc";

/// Build the storage key for a bucket
pub fn bucket_key(series: &str, key: &str) -> String {
    format!("{}:{}", series, key)
}

#[derive(Debug)]
struct Bucket {
    /// `(timestamp, value)` sorted ascending; equal timestamps keep insertion order
    entries: Vec<(i64, Value)>,
    expires_at: Instant,
    generation: u64,
    expiry: AbortHandle,
}

impl Bucket {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

impl Drop for Bucket {
    fn drop(&mut self) {
        self.expiry.abort();
    }
}

/// TTL-bounded, timestamp-ordered store
#[derive(Debug, Default)]
pub struct TimeSeriesStore {
    buckets: Arc<DashMap<String, Bucket>>,
    next_generation: AtomicU64,
}

impl TimeSeriesStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `value` under `(series, key)` and reset the bucket TTL
    pub fn store<T: Serialize>(
        &self,
        series: &str,
        key: &str,
        value: &T,
        timestamp: i64,
        ttl: Duration,
    ) -> RelayResult<()> {
        let value = serde_json::to_value(value)
            .map_err(|e| RelayError::store(format!("failed to encode {} value: {}", series, e)))?;

        let bucket_key = bucket_key(series, key);
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let expiry = self.schedule_expiry(bucket_key.clone(), generation, ttl);
        let expires_at = Instant::now() + ttl;

        let mut bucket = self.buckets.entry(bucket_key).or_insert_with(|| Bucket {
            entries: Vec::new(),
            expires_at,
            generation,
            expiry: expiry.clone(),
        });

        // A bucket whose expiry is due but not yet collected starts over
        if bucket.is_expired() {
            bucket.entries.clear();
        }

        let position = bucket.entries.partition_point(|(ts, _)| *ts <= timestamp);
        bucket.entries.insert(position, (timestamp, value));

        // Retention horizon: entries more than `ttl` behind the newest one age out
        if let Some(&(newest, _)) = bucket.entries.last() {
            let horizon = newest.saturating_sub(ttl.as_secs() as i64);
            bucket.entries.retain(|(ts, _)| *ts >= horizon);
        }

        if bucket.generation != generation {
            bucket.expiry.abort();
            bucket.expiry = expiry;
            bucket.generation = generation;
        }
        bucket.expires_at = expires_at;

        trace!(
            "Stored {}:{} @ {} ({} entries)",
            series,
            key,
            timestamp,
            bucket.entries.len()
        );
        Ok(())
    }

    /// Values under `(series, key)` with `from <= timestamp <= to`, ascending
    ///
    /// Missing or expired buckets yield an empty vector.
    pub fn query<T: DeserializeOwned>(
        &self,
        series: &str,
        key: &str,
        from: i64,
        to: i64,
    ) -> RelayResult<Vec<T>> {
        let values: Vec<Value> = match self.buckets.get(&bucket_key(series, key)) {
            Some(bucket) if !bucket.is_expired() => bucket
                .entries
                .iter()
                .filter(|(ts, _)| *ts >= from && *ts <= to)
                .map(|(_, value)| value.clone())
                .collect(),
            _ => return Ok(Vec::new()),
        };

        values
            .into_iter()
            .map(|value| {
                serde_json::from_value(value).map_err(|e| {
                    RelayError::store(format!("failed to decode {} value: {}", series, e))
                })
            })
            .collect()
    }

    /// Remove the bucket immediately; no-op when absent
    pub fn delete(&self, series: &str, key: &str) {
        if self.buckets.remove(&bucket_key(series, key)).is_some() {
            debug!("Deleted bucket {}:{}", series, key);
        }
    }

    /// Number of live entries under `(series, key)`
    pub fn len(&self, series: &str, key: &str) -> usize {
        match self.buckets.get(&bucket_key(series, key)) {
            Some(bucket) if !bucket.is_expired() => bucket.entries.len(),
            _ => 0,
        }
    }

    pub fn contains(&self, series: &str, key: &str) -> bool {
        self.len(series, key) > 0
    }

    /// Number of buckets currently held (including ones pending expiry)
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    fn schedule_expiry(&self, bucket_key: String, generation: u64, ttl: Duration) -> AbortHandle {
        let buckets: Weak<DashMap<String, Bucket>> = Arc::downgrade(&self.buckets);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            if let Some(buckets) = buckets.upgrade() {
                // Only the write that scheduled us may expire the bucket
                let removed = buckets.remove_if(&bucket_key, |_, bucket| {
                    bucket.generation == generation
                });
                if let Some((key, _)) = removed {
                    debug!("Bucket {} expired", key);
                }
            }
        });
        handle.abort_handle()
    }
}
