//! Time-indexed record cache.
//!
//! Keyed on the peer's textual address. Reads check freshness themselves, so
//! an expired entry is never served even before the sweep removes it. The
//! sweep only bounds how long dead entries occupy memory.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::broadcast;

use rtt_core::RttRecord;

/// Shared record cache. Clones share the same map.
#[derive(Clone)]
pub struct RecordCache {
    records: Arc<DashMap<String, RttRecord>>,
    ttl: Duration,
}

impl RecordCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            records: Arc::new(DashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Store a record, replacing whatever was there for that address.
    pub fn set(&self, record: RttRecord) {
        self.records.insert(record.address.clone(), record);
    }

    /// Fetch the record for `address` if it is still within TTL.
    pub fn get(&self, address: &str) -> Option<RttRecord> {
        self.get_at(address, Utc::now())
    }

    fn get_at(&self, address: &str, now: DateTime<Utc>) -> Option<RttRecord> {
        let entry = self.records.get(address)?;
        let record = entry.value();
        (record.age(now) <= self.ttl).then(|| record.clone())
    }

    /// Every record currently within TTL, in no particular order.
    pub fn all_fresh(&self) -> Vec<RttRecord> {
        self.all_fresh_at(Utc::now())
    }

    fn all_fresh_at(&self, now: DateTime<Utc>) -> Vec<RttRecord> {
        self.records
            .iter()
            .filter(|e| e.value().age(now) <= self.ttl)
            .map(|e| e.value().clone())
            .collect()
    }

    /// Physically delete expired entries. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Utc::now())
    }

    fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let before = self.records.len();
        self.records.retain(|_, record| record.age(now) <= self.ttl);
        before.saturating_sub(self.records.len())
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Sweep on a fixed interval until shutdown.
    pub async fn run_sweeper(self, interval: Duration, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately; nothing can be stale yet.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::debug!("cache sweeper shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    let removed = self.sweep();
                    if removed > 0 {
                        tracing::debug!(removed, remaining = self.len(), "expired cache entries");
                    }
                }
            }
        }
    }
}
