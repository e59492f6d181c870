//! HTTP API handlers: exposes cached RTT records as JSON.

pub mod rtt;
pub mod status;

use std::time::Instant;

use rtt_services::{MeasurementGate, RecordCache};

#[derive(Clone)]
pub struct ApiState {
    pub cache: RecordCache,
    pub gate: MeasurementGate,
    /// Process start, for uptime reporting.
    pub started_at: Instant,
}

impl ApiState {
    pub fn new(cache: RecordCache, gate: MeasurementGate) -> Self {
        Self {
            cache,
            gate,
            started_at: Instant::now(),
        }
    }
}
