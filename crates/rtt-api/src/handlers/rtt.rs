//! /rtt and /rtt/all handlers.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use rtt_core::RttRecord;

use super::ApiState;

#[derive(Debug, Deserialize)]
pub struct RttQuery {
    pub ip: Option<String>,
}

pub async fn handle_rtt(
    State(state): State<ApiState>,
    Query(query): Query<RttQuery>,
) -> Result<Json<RttRecord>, (StatusCode, String)> {
    let ip = query
        .ip
        .as_deref()
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .ok_or_else(|| (StatusCode::BAD_REQUEST, "missing ip parameter".to_string()))?;

    state
        .cache
        .get(ip)
        .map(Json)
        .ok_or_else(|| (StatusCode::NOT_FOUND, "not found or expired".to_string()))
}

pub async fn handle_rtt_all(State(state): State<ApiState>) -> Json<Vec<RttRecord>> {
    let mut records = state.cache.all_fresh();
    records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    Json(records)
}
