//! /status handler.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use super::ApiState;

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    /// Records currently servable.
    pub fresh_records: usize,
    /// Records held, expired ones awaiting the sweep included.
    pub stored_records: usize,
    /// Addresses that have ever triggered a measurement.
    pub gated_addresses: usize,
    pub uptime_secs: u64,
}

pub async fn handle_status(State(state): State<ApiState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        fresh_records: state.cache.all_fresh().len(),
        stored_records: state.cache.len(),
        gated_addresses: state.gate.len(),
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}
