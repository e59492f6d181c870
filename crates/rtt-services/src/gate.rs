//! Measurement gate: at most one external measurement per address per cooldown.
//!
//! External measurements cost quota, so repeat connections from the same
//! peer inside the cooldown reuse the previous result instead of triggering
//! a new job. Entries are never deleted; one `Instant` per address seen.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::time::Instant;

/// Per-address trigger limiter. Clones share the same map.
#[derive(Clone, Default)]
pub struct MeasurementGate {
    last_trigger: Arc<DashMap<String, Instant>>,
}

impl MeasurementGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if a measurement may be triggered for `address` now, and
    /// records the grant. The check and the update happen under the same
    /// shard lock, so concurrent callers for one address get one `true`.
    pub fn allow(&self, address: &str, cooldown: Duration) -> bool {
        self.allow_at(address, cooldown, Instant::now())
    }

    fn allow_at(&self, address: &str, cooldown: Duration, now: Instant) -> bool {
        match self.last_trigger.entry(address.to_owned()) {
            Entry::Vacant(slot) => {
                slot.insert(now);
                true
            }
            Entry::Occupied(mut slot) => {
                if now.saturating_duration_since(*slot.get()) < cooldown {
                    false
                } else {
                    slot.insert(now);
                    true
                }
            }
        }
    }

    /// Number of addresses ever granted.
    pub fn len(&self) -> usize {
        self.last_trigger.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_trigger.is_empty()
    }
}
